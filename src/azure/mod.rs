//! Azure API interaction module
//!
//! This module provides authentication and the Resource Graph client used to
//! run inventory queries.
//!
//! # Module Structure
//!
//! - [`auth`] - Ambient credential chain (environment, managed identity, Azure CLI)
//! - [`client`] - Resource Graph query client
//! - [`http`] - HTTP utilities for REST API calls
//!
//! # Example
//!
//! ```ignore
//! use crate::azure::client::ResourceGraphClient;
//! use crate::query::QueryClient;
//!
//! async fn example() -> crate::error::Result<()> {
//!     let client = ResourceGraphClient::from_env()?;
//!     let page = client.execute(&["sub1".to_string()], "Resources | limit 5", None).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
