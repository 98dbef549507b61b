//! GraphQL schema: customer queries, mutations, and the change-event
//! subscription.
//!
//! Resolvers are thin. Each one pulls the [`CustomerService`] out of the
//! schema data, delegates, and maps domain types to their GraphQL shapes.
//! Service errors go through [`graphql_error`].

use async_graphql::{
    Context, Enum, InputObject, Object, Schema, SimpleObject, Subscription, ID,
};
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt, TryStreamExt};
use patron_core::CustomerService;
use patron_types::{ChangeKind, Customer, CustomerEvent, CustomerId, CustomerPatch, NewCustomer};

use crate::error::graphql_error;
use crate::plan_cache::{PlanCacheExtension, SharedPlanCache};

/// The complete Patron schema.
pub type PatronSchema = Schema<QueryRoot, MutationRoot, SubscriptionRoot>;

/// Build the schema with the service as context data and the plan cache
/// installed on the parse step.
pub fn build_schema(service: CustomerService, plan_cache: SharedPlanCache) -> PatronSchema {
    Schema::build(QueryRoot, MutationRoot, SubscriptionRoot)
        .data(service)
        .extension(PlanCacheExtension::new(plan_cache))
        .finish()
}

/// A customer as exposed over GraphQL.
#[derive(Debug, Clone, SimpleObject)]
#[graphql(name = "Customer")]
pub struct CustomerObject {
    /// Customer key.
    pub id: ID,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Contact email.
    pub email: Option<String>,
    /// Contact phone number.
    pub phone: Option<String>,
    /// When the customer was created.
    pub created_at: DateTime<Utc>,
}

impl From<Customer> for CustomerObject {
    fn from(customer: Customer) -> Self {
        Self {
            id: ID(customer.id.into_inner()),
            first_name: customer.first_name,
            last_name: customer.last_name,
            email: customer.email,
            phone: customer.phone,
            created_at: customer.created_at,
        }
    }
}

/// Kind of committed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
#[graphql(name = "ChangeKind")]
pub enum ChangeKindObject {
    /// A customer was created.
    Created,
    /// A customer was updated.
    Updated,
    /// A customer was deleted.
    Deleted,
}

impl From<ChangeKind> for ChangeKindObject {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Created => Self::Created,
            ChangeKind::Updated => Self::Updated,
            ChangeKind::Deleted => Self::Deleted,
        }
    }
}

/// A change notification as exposed over GraphQL.
#[derive(Debug, Clone, SimpleObject)]
#[graphql(name = "CustomerEvent")]
pub struct CustomerEventObject {
    /// Key of the customer that changed.
    pub customer_id: ID,
    /// What happened.
    pub kind: ChangeKindObject,
    /// Human-readable description.
    pub message: String,
    /// When the change was announced.
    pub emitted_at: DateTime<Utc>,
}

impl From<CustomerEvent> for CustomerEventObject {
    fn from(event: CustomerEvent) -> Self {
        Self {
            customer_id: ID(event.customer_id.into_inner()),
            kind: event.kind.into(),
            message: event.message,
            emitted_at: event.emitted_at,
        }
    }
}

/// Input for `createCustomer`.
#[derive(Debug, Clone, InputObject)]
pub struct CustomerInput {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Contact email.
    pub email: Option<String>,
    /// Contact phone number.
    pub phone: Option<String>,
}

impl From<CustomerInput> for NewCustomer {
    fn from(input: CustomerInput) -> Self {
        Self {
            first_name: input.first_name,
            last_name: input.last_name,
            email: input.email,
            phone: input.phone,
        }
    }
}

/// Input for `updateCustomer`. Omitted fields keep their stored value.
#[derive(Debug, Clone, InputObject)]
pub struct UpdateCustomerInput {
    /// Key of the customer to update.
    pub id: ID,
    /// New given name.
    pub first_name: Option<String>,
    /// New family name.
    pub last_name: Option<String>,
    /// New contact email.
    pub email: Option<String>,
    /// New contact phone number.
    pub phone: Option<String>,
}

impl UpdateCustomerInput {
    fn into_parts(self) -> (CustomerId, CustomerPatch) {
        let patch = CustomerPatch {
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
        };
        (CustomerId::from(self.id.0), patch)
    }
}

/// Read operations.
#[derive(Debug, Default)]
pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Every customer.
    async fn customers(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<CustomerObject>> {
        let service = ctx.data::<CustomerService>()?;
        service
            .get_all()
            .map_ok(CustomerObject::from)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| graphql_error(&e))
    }

    /// One customer by key.
    async fn customer_by_id(
        &self,
        ctx: &Context<'_>,
        id: ID,
    ) -> async_graphql::Result<CustomerObject> {
        let service = ctx.data::<CustomerService>()?;
        service
            .get_by_id(&CustomerId::from(id.0))
            .await
            .map(CustomerObject::from)
            .map_err(|e| graphql_error(&e))
    }
}

/// Write operations. Each success announces one change event.
#[derive(Debug, Default)]
pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Create a customer.
    async fn create_customer(
        &self,
        ctx: &Context<'_>,
        input: CustomerInput,
    ) -> async_graphql::Result<CustomerObject> {
        let service = ctx.data::<CustomerService>()?;
        service
            .create(input.into())
            .await
            .map(CustomerObject::from)
            .map_err(|e| graphql_error(&e))
    }

    /// Update the provided fields of a customer.
    async fn update_customer(
        &self,
        ctx: &Context<'_>,
        input: UpdateCustomerInput,
    ) -> async_graphql::Result<CustomerObject> {
        let service = ctx.data::<CustomerService>()?;
        let (id, patch) = input.into_parts();
        service
            .update(&id, patch)
            .await
            .map(CustomerObject::from)
            .map_err(|e| graphql_error(&e))
    }

    /// Delete a customer. Fails with `NOT_FOUND` if it does not exist.
    async fn delete_customer(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<bool> {
        let service = ctx.data::<CustomerService>()?;
        service
            .delete(&CustomerId::from(id.0))
            .await
            .map_err(|e| graphql_error(&e))
    }
}

/// Live change notifications.
#[derive(Debug, Default)]
pub struct SubscriptionRoot;

#[Subscription]
impl SubscriptionRoot {
    /// Every committed customer change from now on, optionally preceded by
    /// up to `replayLast` recent ones.
    async fn customer_events(
        &self,
        ctx: &Context<'_>,
        replay_last: Option<i32>,
    ) -> async_graphql::Result<impl Stream<Item = CustomerEventObject>> {
        let hub = ctx.data::<CustomerService>()?.hub();
        let stream = match replay_last {
            None | Some(0) => hub.subscribe(),
            Some(n) => {
                let last = usize::try_from(n)
                    .map_err(|e| async_graphql::Error::new(format!("invalid replayLast: {e}")))?;
                hub.subscribe_with_replay(last)
            }
        };
        Ok(stream.map(CustomerEventObject::from))
    }
}
