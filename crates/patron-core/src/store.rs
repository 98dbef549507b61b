//! Persistence boundary for customer documents.
//!
//! [`CustomerStore`] is the narrow interface the service consumes. The
//! service never sees SQL or connection pools; it only awaits these calls.
//! [`InMemoryStore`] is the process-local implementation used by tests and
//! by the `memory` storage backend. The `PostgreSQL` implementation lives in
//! the `patron-db` crate.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use patron_types::{Customer, CustomerId};
use tokio::sync::RwLock;

/// Errors surfaced by a store implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored document could not be decoded.
    #[error("corrupt document {id}: {message}")]
    Corrupt {
        /// Key of the offending document.
        id: String,
        /// Decoder message.
        message: String,
    },
}

/// CRUD persistence over customer documents.
///
/// Every method is a suspension point. Implementations must be safe to
/// share between request tasks.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    /// Stream every stored customer.
    ///
    /// Each call starts a fresh read; nothing is fetched until the stream
    /// is polled.
    fn find_all(&self) -> BoxStream<'static, Result<Customer, StoreError>>;

    /// Look up a customer by key.
    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, StoreError>;

    /// Look up a customer by email address (exact match).
    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError>;

    /// Store a new document under the customer's key.
    ///
    /// Fails with [`StoreError::Conflict`] if the key or the email is
    /// already taken.
    async fn insert(&self, customer: Customer) -> Result<Customer, StoreError>;

    /// Replace the document with the customer's key.
    ///
    /// Returns `None` without writing if no document has that key, so a
    /// concurrent delete is never undone.
    async fn update(&self, customer: Customer) -> Result<Option<Customer>, StoreError>;

    /// Remove the document with this key. Returns `false` if nothing was
    /// stored under it.
    async fn delete(&self, id: &CustomerId) -> Result<bool, StoreError>;
}

/// Process-local store backed by an ordered map.
///
/// Iteration order is key order, which for minted ids is creation order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    documents: Arc<RwLock<BTreeMap<CustomerId, Customer>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Returns `true` if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl CustomerStore for InMemoryStore {
    fn find_all(&self) -> BoxStream<'static, Result<Customer, StoreError>> {
        let documents = Arc::clone(&self.documents);
        stream::once(async move {
            documents
                .read()
                .await
                .values()
                .cloned()
                .collect::<Vec<_>>()
        })
        .flat_map(|snapshot| stream::iter(snapshot.into_iter().map(Ok)))
        .boxed()
    }

    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, StoreError> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError> {
        Ok(self
            .documents
            .read()
            .await
            .values()
            .find(|c| c.email.as_deref() == Some(email))
            .cloned())
    }

    async fn insert(&self, customer: Customer) -> Result<Customer, StoreError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&customer.id) {
            return Err(StoreError::Conflict(format!(
                "customer {} already stored",
                customer.id
            )));
        }
        check_email_free(&documents, &customer)?;
        documents.insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn update(&self, customer: Customer) -> Result<Option<Customer>, StoreError> {
        let mut documents = self.documents.write().await;
        if !documents.contains_key(&customer.id) {
            return Ok(None);
        }
        check_email_free(&documents, &customer)?;
        documents.insert(customer.id.clone(), customer.clone());
        Ok(Some(customer))
    }

    async fn delete(&self, id: &CustomerId) -> Result<bool, StoreError> {
        Ok(self.documents.write().await.remove(id).is_some())
    }
}

fn check_email_free(
    documents: &BTreeMap<CustomerId, Customer>,
    customer: &Customer,
) -> Result<(), StoreError> {
    match customer.email.as_deref() {
        Some(email)
            if documents
                .values()
                .any(|c| c.id != customer.id && c.email.as_deref() == Some(email)) =>
        {
            Err(StoreError::Conflict(format!("email {email} already stored")))
        }
        _ => Ok(()),
    }
}
