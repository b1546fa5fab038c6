//! Shopify Admin API client and authentication.
//!
//! This module provides the [`ShopifyClient`] for paging through the REST
//! Admin API, along with authentication types ([`Auth`], [`AuthType`]).

mod auth;
mod shopify;

pub use auth::{Auth, AuthType};
pub use shopify::{DEFAULT_API_VERSION, Page, RetryPolicy, ShopifyClient, next_link};
