//! Query-plan caching as an async-graphql extension.
//!
//! [`PlanCacheExtension`] hooks the engine's parse and validation steps.
//! Each distinct query text maps to one [`QueryPlan`] in a shared
//! [`QueryPlanCache`]: the parsed document, plus the schema validation
//! outcome once one has been computed. Parse and validation failures are
//! cached too and come back as the same errors every time.
//!
//! Validation also checks variable values, so a stored outcome is only
//! reused by requests that carry no variables. Requests with variables
//! still reuse the parsed document and validate afresh.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use async_graphql::extensions::{
    Extension, ExtensionContext, ExtensionFactory, NextParseQuery, NextValidation,
};
use async_graphql::parser::types::ExecutableDocument;
use async_graphql::{ErrorExtensionValues, ServerError, ServerResult, ValidationResult, Variables};
use patron_core::QueryPlanCache;
use tracing::{debug, warn};

/// Outcome of parsing one query document.
pub type ParsedQuery = Result<ExecutableDocument, ServerError>;

/// Outcome of validating one document against the schema.
pub type ValidationOutcome = Result<ValidationResult, Vec<ServerError>>;

/// Cache shared between the extension and the stats endpoint.
pub type SharedPlanCache = Arc<QueryPlanCache<QueryPlan>>;

/// Everything the engine has worked out about one query text.
#[derive(Debug)]
pub struct QueryPlan {
    document: ParsedQuery,
    validation: OnceLock<ValidationOutcome>,
}

impl QueryPlan {
    /// Wrap a parse outcome; validation is filled in later.
    pub const fn new(document: ParsedQuery) -> Self {
        Self {
            document,
            validation: OnceLock::new(),
        }
    }

    /// The parse outcome.
    pub const fn document(&self) -> &ParsedQuery {
        &self.document
    }

    /// The stored validation outcome, if a variable-free request has
    /// validated this document yet.
    pub fn validation(&self) -> Option<&ValidationOutcome> {
        self.validation.get()
    }
}

/// Extension factory installing the plan cache on a schema.
#[derive(Debug, Clone)]
pub struct PlanCacheExtension {
    cache: SharedPlanCache,
}

impl PlanCacheExtension {
    /// Serve parses and validations from `cache`.
    pub const fn new(cache: SharedPlanCache) -> Self {
        Self { cache }
    }
}

impl ExtensionFactory for PlanCacheExtension {
    fn create(&self) -> Arc<dyn Extension> {
        Arc::new(PlanCacheHook {
            cache: Arc::clone(&self.cache),
            reusable: Mutex::new(None),
        })
    }
}

/// Per-request hook. `reusable` holds the plan whose validation outcome
/// this request may read and record.
struct PlanCacheHook {
    cache: SharedPlanCache,
    reusable: Mutex<Option<Arc<QueryPlan>>>,
}

impl PlanCacheHook {
    fn set_reusable(&self, plan: Option<Arc<QueryPlan>>) {
        *self.reusable.lock().unwrap_or_else(PoisonError::into_inner) = plan;
    }

    fn take_reusable(&self) -> Option<Arc<QueryPlan>> {
        self.reusable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait::async_trait]
impl Extension for PlanCacheHook {
    async fn parse_query(
        &self,
        ctx: &ExtensionContext<'_>,
        query: &str,
        variables: &Variables,
        next: NextParseQuery<'_>,
    ) -> ServerResult<ExecutableDocument> {
        let text = query.to_owned();
        match self
            .cache
            .get_or_compute_blocking(query, move || QueryPlan::new(parse(&text)))
            .await
        {
            Ok(plan) => {
                let document = plan.document().clone();
                if variables.is_empty() {
                    self.set_reusable(Some(plan));
                }
                document
            }
            Err(e) => {
                warn!(error = %e, "plan cache unavailable, parsing uncached");
                next.run(ctx, query, variables).await
            }
        }
    }

    async fn validation(
        &self,
        ctx: &ExtensionContext<'_>,
        next: NextValidation<'_>,
    ) -> ValidationOutcome {
        let Some(plan) = self.take_reusable() else {
            return next.run(ctx).await;
        };
        if let Some(outcome) = plan.validation() {
            debug!("reusing cached validation outcome");
            return outcome.clone();
        }
        let outcome = next.run(ctx).await;
        // Racing requests validate the same document identically; keep the first.
        let _ = plan.validation.set(outcome.clone());
        outcome
    }
}

/// Parse a query document, tagging failures as validation errors.
pub fn parse(query: &str) -> ParsedQuery {
    async_graphql::parser::parse_query(query).map_err(|e| {
        let mut err = ServerError::from(e);
        err.extensions
            .get_or_insert_with(ErrorExtensionValues::default)
            .set("code", "VALIDATION_ERROR");
        err
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_graphql::Value;

    use super::*;

    #[test]
    fn parse_accepts_valid_document() {
        let doc = parse("{ customers { id firstName } }").unwrap();
        assert_eq!(doc.operations.iter().count(), 1);
    }

    #[test]
    fn parse_failure_carries_validation_code() {
        let err = parse("{ customers { id ").unwrap_err();
        let code = err
            .extensions
            .as_ref()
            .and_then(|ext| ext.get("code").cloned());
        assert_eq!(code, Some(Value::from("VALIDATION_ERROR")));
        assert!(!err.locations.is_empty());
    }

    #[test]
    fn new_plan_has_no_validation_yet() {
        let plan = QueryPlan::new(parse("{ customers { id } }"));
        assert!(plan.document().is_ok());
        assert!(plan.validation().is_none());
    }
}
