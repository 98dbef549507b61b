//! Change notifications published after a committed mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::CustomerId;

/// The kind of mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    /// A customer was created.
    Created,
    /// A customer was updated.
    Updated,
    /// A customer was deleted.
    Deleted,
}

impl ChangeKind {
    /// Human-readable message attached to events of this kind.
    pub const fn message(self) -> &'static str {
        match self {
            Self::Created => "New customer created successfully",
            Self::Updated => "Customer updated successfully",
            Self::Deleted => "Customer deleted successfully",
        }
    }
}

/// A notification describing one committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerEvent {
    /// The customer the mutation applied to.
    pub customer_id: CustomerId,
    /// What happened.
    pub kind: ChangeKind,
    /// Human-readable description.
    pub message: String,
    /// When the event was created.
    pub emitted_at: DateTime<Utc>,
}

impl CustomerEvent {
    /// Build an event for `kind`, stamped with the current time.
    pub fn new(customer_id: CustomerId, kind: ChangeKind) -> Self {
        Self {
            customer_id,
            kind,
            message: kind.message().to_owned(),
            emitted_at: Utc::now(),
        }
    }
}
