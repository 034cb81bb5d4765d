//! # Resource Actor
//!
//! A generic single-owner keyed store. One task owns the records and their
//! secondary indexes; every other component talks to it through a cloneable
//! [`ResourceClient`]. Requests are handled one at a time, so an entity action
//! is an atomic read-modify-write on a single record.

use std::collections::{BTreeSet, HashMap};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::ops::Bound;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

// =============================================================================
// 1. THE ABSTRACTION
// =============================================================================

/// Trait that any domain entity must implement to be managed by ResourceActor
pub trait Entity: Clone + Debug + Send + Sync + 'static {
    type Id: Ord + Hash + Clone + Send + Sync + Display + Debug;
    /// Secondary index entries an entity can be scanned by.
    type IndexKey: Ord + Hash + Clone + Send + Sync + Debug;
    type Action: Send + Debug;
    type ActionResult: Send + Debug;

    fn id(&self) -> Self::Id;

    /// Index entries for the entity's current state. Recomputed after every action.
    fn index_keys(&self) -> Vec<Self::IndexKey>;

    /// Apply a domain action in place. Outcomes the caller must distinguish
    /// belong in `ActionResult`.
    fn handle_action(&mut self, action: Self::Action) -> Self::ActionResult;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameworkError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Item already exists: {0}")]
    AlreadyExists(String),
    #[error("Actor closed")]
    ActorClosed,
    #[error("Actor dropped the request")]
    ActorDropped,
    #[error("Actor did not answer within {0:?}")]
    Timeout(Duration),
}

impl FrameworkError {
    /// Failures of the channel rather than of the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FrameworkError::ActorClosed | FrameworkError::ActorDropped | FrameworkError::Timeout(_)
        )
    }
}

/// One page of an index scan. `next` is the cursor to resume after, `None` when exhausted.
#[derive(Debug, Clone)]
pub struct Page<T: Entity> {
    pub items: Vec<T>,
    pub next: Option<T::Id>,
}

// =============================================================================
// 2. THE GENERIC MESSAGES
// =============================================================================

pub type Response<T> = oneshot::Sender<Result<T, FrameworkError>>;

#[derive(Debug)]
pub enum ResourceRequest<T: Entity> {
    Insert {
        item: T,
        respond_to: Response<()>,
    },
    Get {
        id: T::Id,
        respond_to: Response<Option<T>>,
    },
    Scan {
        index: T::IndexKey,
        after: Option<T::Id>,
        limit: usize,
        respond_to: Response<Page<T>>,
    },
    Action {
        id: T::Id,
        action: T::Action,
        respond_to: Response<T::ActionResult>,
    },
    #[cfg(test)]
    Count {
        respond_to: Response<usize>,
    },
}

// =============================================================================
// 3. THE GENERIC ACTOR SERVER
// =============================================================================

pub struct ResourceActor<T: Entity> {
    receiver: mpsc::Receiver<ResourceRequest<T>>,
    store: HashMap<T::Id, T>,
    indexes: HashMap<T::IndexKey, BTreeSet<T::Id>>,
}

impl<T: Entity> ResourceActor<T> {
    pub fn new(buffer_size: usize, request_timeout: Duration) -> (Self, ResourceClient<T>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            receiver,
            store: HashMap::new(),
            indexes: HashMap::new(),
        };
        let client = ResourceClient::new(sender, request_timeout);
        (actor, client)
    }

    #[instrument(name = "resource_actor", skip(self))]
    pub async fn run(mut self) {
        info!("ResourceActor starting");
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                ResourceRequest::Insert { item, respond_to } => {
                    let _ = respond_to.send(self.handle_insert(item));
                }
                ResourceRequest::Get { id, respond_to } => {
                    let _ = respond_to.send(Ok(self.store.get(&id).cloned()));
                }
                ResourceRequest::Scan { index, after, limit, respond_to } => {
                    let _ = respond_to.send(Ok(self.handle_scan(&index, after, limit)));
                }
                ResourceRequest::Action { id, action, respond_to } => {
                    let _ = respond_to.send(self.handle_action(id, action));
                }
                #[cfg(test)]
                ResourceRequest::Count { respond_to } => {
                    let _ = respond_to.send(Ok(self.store.len()));
                }
            }
        }
        info!("ResourceActor stopped");
    }

    fn handle_insert(&mut self, item: T) -> Result<(), FrameworkError> {
        let id = item.id();
        if self.store.contains_key(&id) {
            debug!(%id, "Insert rejected, id taken");
            return Err(FrameworkError::AlreadyExists(id.to_string()));
        }
        self.add_to_indexes(&id, &item.index_keys());
        self.store.insert(id, item);
        Ok(())
    }

    fn handle_scan(&self, index: &T::IndexKey, after: Option<T::Id>, limit: usize) -> Page<T> {
        let Some(ids) = self.indexes.get(index) else {
            return Page { items: Vec::new(), next: None };
        };
        let limit = limit.max(1);
        let lower = match after {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Unbounded,
        };

        let mut window = ids.range((lower, Bound::Unbounded));
        let items: Vec<T> = window
            .by_ref()
            .take(limit)
            .filter_map(|id| self.store.get(id).cloned())
            .collect();
        let next = match window.next() {
            Some(_) => items.last().map(|item| item.id()),
            None => None,
        };
        Page { items, next }
    }

    fn handle_action(&mut self, id: T::Id, action: T::Action) -> Result<T::ActionResult, FrameworkError> {
        let Some(item) = self.store.get_mut(&id) else {
            return Err(FrameworkError::NotFound(id.to_string()));
        };
        let before = item.index_keys();
        let result = item.handle_action(action);
        let after = item.index_keys();

        if before != after {
            self.remove_from_indexes(&id, &before);
            self.add_to_indexes(&id, &after);
        }
        Ok(result)
    }

    fn add_to_indexes(&mut self, id: &T::Id, keys: &[T::IndexKey]) {
        for key in keys {
            self.indexes.entry(key.clone()).or_default().insert(id.clone());
        }
    }

    fn remove_from_indexes(&mut self, id: &T::Id, keys: &[T::IndexKey]) {
        for key in keys {
            if let Some(ids) = self.indexes.get_mut(key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.indexes.remove(key);
                }
            }
        }
    }
}

// =============================================================================
// 4. THE GENERIC CLIENT
// =============================================================================

/// Generate request methods with oneshot channel boilerplate and automatic tracing.
macro_rules! request_method {
    (fn $method:ident($($param:ident: $param_type:ty),*) -> $return_type:ty as $variant:ident) => {
        #[instrument(skip(self))]
        pub async fn $method(&self, $($param: $param_type),*) -> Result<$return_type, FrameworkError> {
            debug!("Sending request");
            self.request(|respond_to| ResourceRequest::$variant {
                $($param,)*
                respond_to,
            })
            .await
        }
    };
}

pub struct ResourceClient<T: Entity> {
    sender: mpsc::Sender<ResourceRequest<T>>,
    request_timeout: Duration,
}

impl<T: Entity> Clone for ResourceClient<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

impl<T: Entity> ResourceClient<T> {
    pub fn new(sender: mpsc::Sender<ResourceRequest<T>>, request_timeout: Duration) -> Self {
        Self { sender, request_timeout }
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(Response<R>) -> ResourceRequest<T>,
    ) -> Result<R, FrameworkError> {
        let (respond_to, response) = oneshot::channel();
        let exchange = async move {
            self.sender
                .send(make(respond_to))
                .await
                .map_err(|_| FrameworkError::ActorClosed)?;
            response.await.map_err(|_| FrameworkError::ActorDropped)?
        };
        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| FrameworkError::Timeout(self.request_timeout))?
    }

    request_method!(fn insert(item: T) -> () as Insert);
    request_method!(fn get(id: T::Id) -> Option<T> as Get);
    request_method!(fn scan(index: T::IndexKey, after: Option<T::Id>, limit: usize) -> Page<T> as Scan);
    request_method!(fn perform_action(id: T::Id, action: T::Action) -> T::ActionResult as Action);

    #[cfg(test)]
    pub async fn count(&self) -> Result<usize, FrameworkError> {
        self.request(|respond_to| ResourceRequest::Count { respond_to }).await
    }
}

// =============================================================================
// 5. TESTS
// =============================================================================
