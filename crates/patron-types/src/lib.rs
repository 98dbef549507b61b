//! Shared type definitions for the Patron customer service.
//!
//! Every crate in the workspace speaks these types: the store persists
//! [`Customer`] documents, the service accepts [`NewCustomer`] and
//! [`CustomerPatch`] inputs, and the event hub carries [`CustomerEvent`]s.
//!
//! # Modules
//!
//! - [`ids`] -- Opaque customer identifier
//! - [`structs`] -- Customer document and create/update inputs
//! - [`events`] -- Change notifications

pub mod events;
pub mod ids;
pub mod structs;

pub use events::{ChangeKind, CustomerEvent};
pub use ids::CustomerId;
pub use structs::{Customer, CustomerPatch, NewCustomer};
