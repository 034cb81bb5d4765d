//! JSON request/response surface over [`IntakeClient`].
//!
//! Transport-agnostic: bodies go in and out as strings, errors come back as an
//! [`ErrorResponse`] with one of three codes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::domain::{Order, OrderId, OrderStatus};
use crate::intake::{IntakeClient, IntakeError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub owner_id: String,
    #[serde(default)]
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListOrdersRequest {
    pub owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub owner_id: String,
    pub status: OrderStatus,
    pub total: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderRecord {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.order_id,
            owner_id: order.owner_id,
            status: order.status,
            total: order.total,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListOrdersResponse {
    pub orders: Vec<OrderRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    InvalidArgument,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorResponse {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<IntakeError> for ErrorResponse {
    fn from(err: IntakeError) -> Self {
        let code = match &err {
            IntakeError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            IntakeError::NotFound(_) => ErrorCode::NotFound,
            // An id collision is worth a retry from the caller's side.
            IntakeError::AlreadyExists(_) | IntakeError::NotEnqueued { .. } | IntakeError::Unavailable(_) => {
                ErrorCode::Unavailable
            }
        };
        Self::new(code, err.to_string())
    }
}

impl From<serde_json::Error> for ErrorResponse {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::InvalidArgument, format!("Malformed request: {err}"))
    }
}

/// Entry points for creating and listing orders.
#[derive(Clone)]
pub struct IntakeApi {
    intake: IntakeClient,
}

impl IntakeApi {
    pub fn new(intake: IntakeClient) -> Self {
        Self { intake }
    }

    pub async fn create(&self, request: CreateOrderRequest) -> Result<CreateOrderResponse, ErrorResponse> {
        let order = self.intake.create_order(&request.owner_id, request.total).await?;
        Ok(CreateOrderResponse {
            order_id: order.order_id,
            status: order.status,
        })
    }

    pub async fn list(&self, request: ListOrdersRequest) -> Result<ListOrdersResponse, ErrorResponse> {
        let orders = self.intake.list_orders(&request.owner_id).await?;
        Ok(ListOrdersResponse {
            orders: orders.into_iter().map(OrderRecord::from).collect(),
        })
    }

    /// `Ok` carries a [`CreateOrderResponse`] body, `Err` an [`ErrorResponse`] body.
    #[instrument(skip_all)]
    pub async fn handle_create(&self, body: &str) -> Result<String, String> {
        let result = match serde_json::from_str::<CreateOrderRequest>(body) {
            Ok(request) => self.create(request).await,
            Err(e) => Err(e.into()),
        };
        encode(result)
    }

    /// `Ok` carries a [`ListOrdersResponse`] body, `Err` an [`ErrorResponse`] body.
    #[instrument(skip_all)]
    pub async fn handle_list(&self, body: &str) -> Result<String, String> {
        let result = match serde_json::from_str::<ListOrdersRequest>(body) {
            Ok(request) => self.list(request).await,
            Err(e) => Err(e.into()),
        };
        encode(result)
    }
}

fn encode<T: Serialize>(result: Result<T, ErrorResponse>) -> Result<String, String> {
    match result {
        Ok(body) => serde_json::to_string(&body).map_err(|e| {
            encode_error(&ErrorResponse::new(ErrorCode::Unavailable, format!("Failed to encode response: {e}")))
        }),
        Err(error) => {
            warn!(code = ?error.code, message = %error.message, "Request failed");
            Err(encode_error(&error))
        }
    }
}

fn encode_error(error: &ErrorResponse) -> String {
    serde_json::to_string(error)
        .unwrap_or_else(|_| r#"{"code":"UNAVAILABLE","message":"failed to encode error"}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_framework::RecordingQueue;
    use crate::retry::RetryPolicy;
    use crate::store::spawn_order_store;
    use std::sync::Arc;

    fn api() -> IntakeApi {
        let store = spawn_order_store(RetryPolicy::none(), 10);
        IntakeApi::new(IntakeClient::new(store, Arc::new(RecordingQueue::default())))
    }

    fn error_of(body: &str) -> ErrorResponse {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn test_handle_create_returns_pending() {
        let api = api();
        let body = api.handle_create(r#"{"owner_id":"U1","total":199}"#).await.unwrap();

        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["status"], "PENDING");
        assert!(value["order_id"].as_str().unwrap().starts_with("ord_"));
    }

    #[tokio::test]
    async fn test_total_defaults_to_zero() {
        let api = api();
        api.handle_create(r#"{"owner_id":"U1"}"#).await.unwrap();

        let list = api.list(ListOrdersRequest { owner_id: "U1".into() }).await.unwrap();
        assert_eq!(list.orders.len(), 1);
        assert_eq!(list.orders[0].total, 0.0);
    }

    #[tokio::test]
    async fn test_error_codes() {
        let api = api();

        let err = api.handle_create(r#"{"owner_id":"U1","total":-5}"#).await.unwrap_err();
        assert_eq!(error_of(&err).code, ErrorCode::InvalidArgument);

        let err = api.handle_create("not json").await.unwrap_err();
        assert_eq!(error_of(&err).code, ErrorCode::InvalidArgument);

        let err = api.handle_list(r#"{}"#).await.unwrap_err();
        assert_eq!(error_of(&err).code, ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_intake_error_mapping() {
        let cases = [
            (IntakeError::NotFound("U1/o1".into()), ErrorCode::NotFound),
            (IntakeError::InvalidArgument("bad".into()), ErrorCode::InvalidArgument),
            (IntakeError::AlreadyExists("U1/o1".into()), ErrorCode::Unavailable),
            (IntakeError::Unavailable("down".into()), ErrorCode::Unavailable),
            (
                IntakeError::NotEnqueued {
                    order_id: OrderId::new("o1"),
                    reason: "down".into(),
                },
                ErrorCode::Unavailable,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(ErrorResponse::from(err).code, code);
        }
    }

    #[tokio::test]
    async fn test_handle_list_returns_owner_orders() {
        let api = api();
        for owner in ["U1", "U1", "U2"] {
            api.create(CreateOrderRequest {
                owner_id: owner.into(),
                total: 1.0,
            })
            .await
            .unwrap();
        }

        let body = api.handle_list(r#"{"owner_id":"U1"}"#).await.unwrap();
        let list: ListOrdersResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(list.orders.len(), 2);
        assert!(list.orders.iter().all(|o| o.owner_id == "U1"));
    }
}
