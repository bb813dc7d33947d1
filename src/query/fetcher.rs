//! Page Fetcher
//!
//! Drives a [`QueryClient`] through every page of a query.

use super::{QueryClient, Row};
use crate::error::Result;

/// Everything a query returned, across all pages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResults {
    /// Rows in page-arrival order
    pub rows: Vec<Row>,
    /// Sum of the per-page counts reported by the service
    pub total_count: u64,
    /// Number of requests made
    pub pages: usize,
}

/// Fetch all pages of a query (auto-paginate)
///
/// Stops only when a page comes back without a skip token. There is no page
/// limit: a service that keeps handing out tokens keeps the loop running.
pub async fn accumulate<C: QueryClient + ?Sized>(
    client: &C,
    subscription_ids: &[String],
    query: &str,
) -> Result<QueryResults> {
    let mut results = QueryResults::default();
    let mut skip_token: Option<String> = None;

    loop {
        tracing::debug!(
            "Requesting page {} (skip token: {})",
            results.pages + 1,
            if skip_token.is_some() { "yes" } else { "no" }
        );

        let page = client
            .execute(subscription_ids, query, skip_token.as_deref())
            .await?;
        results.pages += 1;

        if results.pages == 1 {
            if let Some(total) = page.total_records {
                tracing::info!("Query matched {} records", total);
            }
        }
        if page.truncated {
            tracing::warn!(
                "Page {} was truncated by the service; results may be incomplete",
                results.pages
            );
        }

        tracing::info!("Retrieved {} records", page.count);
        results.total_count += page.count;

        let next = page.next_token().map(str::to_string);
        results.rows.extend(page.rows);

        match next {
            Some(token) => skip_token = Some(token),
            None => break,
        }
    }

    tracing::info!(
        "Fetched {} records in {} page(s)",
        results.total_count,
        results.pages
    );

    Ok(results)
}
