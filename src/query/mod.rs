//! Query abstraction layer
//!
//! Separates the pagination loop from the service that answers queries, so the
//! loop can be driven by any [`QueryClient`].
//!
//! # Architecture
//!
//! - [`QueryClient`] - one page request: subscriptions, query text, optional skip token
//! - [`fetcher`] - follows skip tokens until the service stops returning one
//!
//! # Example
//!
//! ```ignore
//! use crate::query::accumulate;
//!
//! async fn export(client: &ResourceGraphClient) -> crate::error::Result<()> {
//!     let results = accumulate(client, &["sub1".to_string()], "Resources").await?;
//!     println!("{} rows", results.rows.len());
//!     Ok(())
//! }
//! ```

mod fetcher;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use fetcher::{accumulate, QueryResults};

/// One result row: column name to value, in the order the service returned them
pub type Row = Map<String, Value>;

/// A single page of query results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    pub rows: Vec<Row>,
    /// Row count reported by the service for this page
    pub count: u64,
    /// Continuation token; absent on the last page
    pub skip_token: Option<String>,
    /// Total matching records, when the service reports it
    pub total_records: Option<u64>,
    /// Set when the service cut the result short without offering a token
    pub truncated: bool,
}

impl PageResult {
    /// Token to pass on the next request, if there is a next page
    pub fn next_token(&self) -> Option<&str> {
        self.skip_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Something that can answer a single page of a query
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn execute(
        &self,
        subscription_ids: &[String],
        query: &str,
        skip_token: Option<&str>,
    ) -> Result<PageResult>;
}
