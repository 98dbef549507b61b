//! Customer CRUD with change notification.
//!
//! [`CustomerService`] is the only writer to the store. Every mutation that
//! the store commits is followed by exactly one [`CustomerEvent`] on the
//! [`EventHub`], emitted before the result is handed back to the caller. A
//! mutation that fails emits nothing.
//!
//! Persistence and emission are two separate steps; there is no
//! transaction spanning them.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use patron_types::{
    ChangeKind, Customer, CustomerEvent, CustomerId, CustomerPatch, NewCustomer,
};
use tracing::{error, info, warn};
use validator::Validate;

use crate::error::ServiceError;
use crate::event_hub::EventHub;
use crate::store::{CustomerStore, StoreError};

/// Orchestrates customer operations against a [`CustomerStore`] and
/// announces committed changes on an [`EventHub`].
#[derive(Clone)]
pub struct CustomerService {
    store: Arc<dyn CustomerStore>,
    hub: EventHub,
}

impl CustomerService {
    /// Create a service over `store`, publishing to `hub`.
    pub fn new(store: Arc<dyn CustomerStore>, hub: EventHub) -> Self {
        Self { store, hub }
    }

    /// The hub this service publishes to.
    pub const fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Stream every customer.
    ///
    /// Nothing is read until the stream is polled, and each call starts a
    /// new read.
    pub fn get_all(&self) -> BoxStream<'static, Result<Customer, ServiceError>> {
        self.store
            .find_all()
            .map(|result| {
                result.map_err(|e| {
                    error!(error = %e, "failed to fetch customers");
                    ServiceError::Storage(e)
                })
            })
            .boxed()
    }

    /// Fetch one customer.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] if no customer has `id`;
    /// [`ServiceError::Storage`] if the lookup fails.
    pub async fn get_by_id(&self, id: &CustomerId) -> Result<Customer, ServiceError> {
        self.load(id).await.inspect_err(|e| {
            if !e.is_client_facing() {
                error!(customer_id = %id, error = %e, "failed to fetch customer");
            }
        })
    }

    /// Validate and persist a new customer, then emit `Created`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Validation`] if a field rule fails or the email is
    /// already taken; [`ServiceError::Storage`] if persisting fails.
    pub async fn create(&self, input: NewCustomer) -> Result<Customer, ServiceError> {
        input.validate()?;
        if let Some(email) = input.email.as_deref() {
            self.ensure_email_free(email, None).await?;
        }

        let customer = input.into_customer(CustomerId::new(), Utc::now());
        let saved = self
            .store
            .insert(customer)
            .await
            .map_err(|e| storage_failure("create", None, e))?;

        self.announce(&saved.id, ChangeKind::Created);
        info!(customer_id = %saved.id, "customer created");
        Ok(saved)
    }

    /// Merge `patch` over the stored customer, persist, then emit `Updated`.
    ///
    /// Fields absent from the patch keep their stored value. An empty patch
    /// still rewrites the document and emits `Updated`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] if no customer has `id`;
    /// [`ServiceError::Validation`] if the merged customer breaks a field
    /// rule or takes another customer's email; [`ServiceError::Storage`] if
    /// reading or persisting fails.
    pub async fn update(
        &self,
        id: &CustomerId,
        patch: CustomerPatch,
    ) -> Result<Customer, ServiceError> {
        let mut customer = self.load(id).await?;

        if let Some(email) = patch.email.as_deref()
            && customer.email.as_deref() != Some(email)
        {
            self.ensure_email_free(email, Some(id)).await?;
        }
        patch.apply(&mut customer);
        customer.validate()?;

        let saved = self
            .store
            .update(customer)
            .await
            .map_err(|e| storage_failure("update", Some(id), e))?
            .ok_or_else(|| vanished("update", id))?;

        self.announce(&saved.id, ChangeKind::Updated);
        info!(customer_id = %saved.id, "customer updated");
        Ok(saved)
    }

    /// Delete a customer, then emit `Deleted`.
    ///
    /// Always returns `true` on success; a missing id is an error rather
    /// than `false`, matching [`get_by_id`](Self::get_by_id) and
    /// [`update`](Self::update). When deletes race on one id, only the
    /// call that actually removed the document succeeds and emits.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] if no customer has `id`;
    /// [`ServiceError::Storage`] if reading or deleting fails.
    pub async fn delete(&self, id: &CustomerId) -> Result<bool, ServiceError> {
        let customer = self.load(id).await?;
        let removed = self
            .store
            .delete(&customer.id)
            .await
            .map_err(|e| storage_failure("delete", Some(id), e))?;
        if !removed {
            return Err(vanished("delete", id));
        }

        self.announce(&customer.id, ChangeKind::Deleted);
        info!(customer_id = %customer.id, "customer deleted");
        Ok(true)
    }

    async fn load(&self, id: &CustomerId) -> Result<Customer, ServiceError> {
        self.store
            .find_by_id(id)
            .await
            .map_err(|e| storage_failure("lookup", Some(id), e))?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    async fn ensure_email_free(
        &self,
        email: &str,
        owner: Option<&CustomerId>,
    ) -> Result<(), ServiceError> {
        let existing = self
            .store
            .find_by_email(email)
            .await
            .map_err(|e| storage_failure("email lookup", owner, e))?;
        match existing {
            Some(other) if Some(&other.id) != owner => {
                warn!(email, "rejected duplicate customer email");
                Err(ServiceError::Validation(format!(
                    "email {email} is already registered"
                )))
            }
            _ => Ok(()),
        }
    }

    fn announce(&self, id: &CustomerId, kind: ChangeKind) {
        self.hub.emit(CustomerEvent::new(id.clone(), kind));
    }
}

impl std::fmt::Debug for CustomerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomerService")
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

/// The document existed at lookup but was gone by the time of the write.
fn vanished(operation: &str, id: &CustomerId) -> ServiceError {
    warn!(operation, customer_id = %id, "customer removed concurrently");
    ServiceError::NotFound(id.to_string())
}

/// Log a store failure with context and wrap it.
///
/// A uniqueness conflict raised by the store itself (two creates racing on
/// the same email) is reported as a validation error.
fn storage_failure(operation: &str, id: Option<&CustomerId>, err: StoreError) -> ServiceError {
    if let StoreError::Conflict(message) = err {
        warn!(operation, customer_id = ?id.map(CustomerId::as_str), %message, "store rejected write");
        return ServiceError::Validation(message);
    }
    error!(operation, customer_id = ?id.map(CustomerId::as_str), error = %err, "customer store failure");
    ServiceError::Storage(err)
}
