//! Resource Graph Client
//!
//! Issues Resource Graph queries with a bearer token from the credential chain.

use super::auth::AzureCredentials;
use super::http::{status_hint, AzureHttpClient, HttpError};
use crate::error::{Error, Result};
use crate::query::{PageResult, QueryClient, Row};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Public-cloud Azure Resource Manager endpoint
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";

/// Resource Graph REST API version
const API_VERSION: &str = "2021-03-01";

/// Resource Graph query client
#[derive(Clone)]
pub struct ResourceGraphClient {
    pub credentials: AzureCredentials,
    pub http: AzureHttpClient,
    endpoint: String,
}

/// Body of a Resource Graph query response
#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    data: Vec<Row>,
    count: Option<u64>,
    #[serde(rename = "$skipToken")]
    skip_token: Option<String>,
    #[serde(rename = "totalRecords")]
    total_records: Option<u64>,
    #[serde(rename = "resultTruncated", default)]
    result_truncated: Value,
}

impl From<QueryResponse> for PageResult {
    fn from(response: QueryResponse) -> Self {
        // Documented as a "true"/"false" string; accept a bool as well
        let truncated = match &response.result_truncated {
            Value::Bool(b) => *b,
            Value::String(s) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };

        Self {
            count: response.count.unwrap_or(response.data.len() as u64),
            rows: response.data,
            skip_token: response.skip_token,
            total_records: response.total_records,
            truncated,
        }
    }
}

impl ResourceGraphClient {
    /// Create a client against the given Resource Manager endpoint
    pub fn new(credentials: AzureCredentials, http: AzureHttpClient, endpoint: &str) -> Self {
        Self {
            credentials,
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Create a client using the ambient credential chain
    ///
    /// `AZURE_RESOURCE_MANAGER_ENDPOINT` overrides the public-cloud endpoint.
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("AZURE_RESOURCE_MANAGER_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_ARM_ENDPOINT.to_string());

        let http = AzureHttpClient::new()
            .map_err(|e| Error::query(format!("Failed to create HTTP client: {}", e)))?;
        let credentials = AzureCredentials::from_env(&http, &endpoint)?;

        Ok(Self::new(credentials, http, &endpoint))
    }

    /// Build the query URL
    pub fn resources_url(&self) -> String {
        format!(
            "{}/providers/Microsoft.ResourceGraph/resources?api-version={}",
            self.endpoint, API_VERSION
        )
    }

    /// Build the request body for one page
    fn request_body(subscription_ids: &[String], query: &str, skip_token: Option<&str>) -> Value {
        let mut options = json!({ "resultFormat": "objectArray" });
        if let Some(token) = skip_token {
            options["$skipToken"] = Value::String(token.to_string());
        }

        json!({
            "subscriptions": subscription_ids,
            "query": query,
            "options": options,
        })
    }
}

#[async_trait]
impl QueryClient for ResourceGraphClient {
    async fn execute(
        &self,
        subscription_ids: &[String],
        query: &str,
        skip_token: Option<&str>,
    ) -> Result<PageResult> {
        let token = self.credentials.get_token().await?;

        let request_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!("Resource Graph request id {}", request_id);

        let request = self
            .http
            .post(&self.resources_url())
            .bearer_auth(token)
            .header("x-ms-client-request-id", request_id.as_str())
            .json(&Self::request_body(subscription_ids, query, skip_token));

        let response = self
            .http
            .send(request)
            .await
            .map_err(|e| query_error(e, &request_id))?;

        let response: QueryResponse = serde_json::from_value(response)
            .map_err(|e| Error::query(format!("Unexpected Resource Graph response: {}", e)))?;

        Ok(response.into())
    }
}

/// Format a Resource Graph failure for the log
fn query_error(err: HttpError, request_id: &str) -> Error {
    let hint = match &err {
        HttpError::Status { status, .. } => status_hint(*status),
        _ => None,
    };

    match hint {
        Some(hint) => Error::query(format!("{} ({}; request id {})", err, hint, request_id)),
        None => Error::query(format!("{} (request id {})", err, request_id)),
    }
}
