//! Customer documents in a `PostgreSQL` JSONB table.
//!
//! Each customer is one row in `customers`: the key, the serialized
//! document, and an `email` column generated from the document so the
//! database enforces email uniqueness. Inserts never overwrite and updates
//! only touch rows that still exist.

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use patron_core::{CustomerStore, StoreError};
use patron_types::{Customer, CustomerId};
use sqlx::PgPool;

use crate::error::DbError;
use crate::postgres::PostgresPool;

/// A raw row from the `customers` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
    /// Document key.
    pub id: String,
    /// Serialized [`Customer`].
    pub document: serde_json::Value,
}

impl DocumentRow {
    /// Decode the stored document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the JSON does not describe a
    /// customer.
    pub fn decode(self) -> Result<Customer, StoreError> {
        serde_json::from_value(self.document).map_err(|e| {
            tracing::error!(customer_id = %self.id, error = %e, "undecodable customer document");
            StoreError::Corrupt {
                id: self.id,
                message: e.to_string(),
            }
        })
    }
}

/// [`CustomerStore`] over a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgCustomerStore {
    pool: PgPool,
}

impl PgCustomerStore {
    /// Create a store sharing the given pool.
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool().clone(),
        }
    }

    async fn fetch_one_where(
        &self,
        predicate: &'static str,
        value: &str,
    ) -> Result<Option<Customer>, StoreError> {
        let sql = format!("SELECT id, document FROM customers WHERE {predicate} = $1");
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?;
        row.map(DocumentRow::decode).transpose()
    }
}

#[async_trait]
impl CustomerStore for PgCustomerStore {
    fn find_all(&self) -> BoxStream<'static, Result<Customer, StoreError>> {
        let pool = self.pool.clone();
        stream::once(async move {
            sqlx::query_as::<_, DocumentRow>(
                "SELECT id, document FROM customers ORDER BY created_at, id",
            )
            .fetch_all(&pool)
            .await
        })
        .flat_map(|result| match result {
            Ok(rows) => {
                tracing::debug!(count = rows.len(), "Fetched customer documents");
                stream::iter(rows.into_iter().map(DocumentRow::decode)).left_stream()
            }
            Err(e) => {
                stream::once(future::ready(Err(StoreError::from(DbError::from(e))))).right_stream()
            }
        })
        .boxed()
    }

    async fn find_by_id(&self, id: &CustomerId) -> Result<Option<Customer>, StoreError> {
        self.fetch_one_where("id", id.as_str()).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError> {
        self.fetch_one_where("email", email).await
    }

    async fn insert(&self, customer: Customer) -> Result<Customer, StoreError> {
        let document = serde_json::to_value(&customer).map_err(DbError::from)?;
        sqlx::query("INSERT INTO customers (id, document, created_at) VALUES ($1, $2, $3)")
            .bind(customer.id.as_str())
            .bind(&document)
            .bind(customer.created_at)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        tracing::debug!(customer_id = %customer.id, "Inserted customer document");
        Ok(customer)
    }

    async fn update(&self, customer: Customer) -> Result<Option<Customer>, StoreError> {
        let document = serde_json::to_value(&customer).map_err(DbError::from)?;
        let result =
            sqlx::query("UPDATE customers SET document = $2, updated_at = now() WHERE id = $1")
                .bind(customer.id.as_str())
                .bind(&document)
                .execute(&self.pool)
                .await
                .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            tracing::debug!(customer_id = %customer.id, "No customer document to update");
            return Ok(None);
        }
        tracing::debug!(customer_id = %customer.id, "Updated customer document");
        Ok(Some(customer))
    }

    async fn delete(&self, id: &CustomerId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM customers WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

        let removed = result.rows_affected() == 1;
        tracing::debug!(customer_id = %id, removed, "Deleted customer document");
        Ok(removed)
    }
}
