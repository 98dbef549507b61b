//! Customer document and the inputs that create or modify it.
//!
//! Field rules are declared once with `validator` derives and shared by
//! [`NewCustomer`] (create) and [`Customer`] (re-checked after an update
//! patch has been merged).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ids::CustomerId;

/// A stored customer document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Customer {
    /// Document key.
    pub id: CustomerId,
    /// Given name.
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    /// Family name.
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    /// Contact email, unique across customers when present.
    #[validate(email)]
    pub email: Option<String>,
    /// Contact phone number.
    #[validate(length(min = 3, max = 32))]
    pub phone: Option<String>,
    /// When the document was first persisted.
    pub created_at: DateTime<Utc>,
}

/// Input for creating a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NewCustomer {
    /// Given name.
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    /// Family name.
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    /// Contact email.
    #[validate(email)]
    pub email: Option<String>,
    /// Contact phone number.
    #[validate(length(min = 3, max = 32))]
    pub phone: Option<String>,
}

impl NewCustomer {
    /// Turn the input into a document with the given key and creation time.
    pub fn into_customer(self, id: CustomerId, created_at: DateTime<Utc>) -> Customer {
        Customer {
            id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            created_at,
        }
    }
}

/// Partial update for an existing customer.
///
/// `None` means "keep the stored value". There is no way to clear an
/// optional field through a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerPatch {
    /// New given name.
    pub first_name: Option<String>,
    /// New family name.
    pub last_name: Option<String>,
    /// New contact email.
    pub email: Option<String>,
    /// New contact phone number.
    pub phone: Option<String>,
}

impl CustomerPatch {
    /// Merge the present fields over `existing`, field by field.
    ///
    /// `id` and `created_at` are never touched.
    pub fn apply(self, existing: &mut Customer) {
        if let Some(first_name) = self.first_name {
            existing.first_name = first_name;
        }
        if let Some(last_name) = self.last_name {
            existing.last_name = last_name;
        }
        if let Some(email) = self.email {
            existing.email = Some(email);
        }
        if let Some(phone) = self.phone {
            existing.phone = Some(phone);
        }
    }
}
