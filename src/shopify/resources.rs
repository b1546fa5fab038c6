//! Extractable Shopify resources

use crate::decompose::EntitySchema;

use super::entities;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A listing endpoint of the Admin API
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Orders,
    Products,
    Customers,
    Events,
    Metafields,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Orders,
        Resource::Products,
        Resource::Customers,
        Resource::Events,
        Resource::Metafields,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Orders => "orders",
            Resource::Products => "products",
            Resource::Customers => "customers",
            Resource::Events => "events",
            Resource::Metafields => "metafields",
        }
    }

    /// Path of the listing endpoint, relative to the API base URL
    pub fn path(&self) -> String {
        format!("{}.json", self.as_str())
    }

    /// Name of the array holding the items in a response body
    pub fn response_key(&self) -> &'static str {
        self.as_str()
    }

    /// Timestamp field the query windows filter on
    pub fn incremental_field(&self) -> &'static str {
        match self {
            Resource::Events => "created_at",
            _ => "updated_at",
        }
    }

    /// Fixed query parameters sent with every request
    pub fn extra_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Resource::Orders => &[("status", "any")],
            Resource::Products => &[("status", "active")],
            _ => &[],
        }
    }

    /// Decomposition rules of the returned records
    pub fn schema(&self) -> &'static EntitySchema {
        match self {
            Resource::Orders => &entities::ORDER,
            Resource::Products => &entities::PRODUCT,
            Resource::Customers => &entities::CUSTOMER,
            Resource::Events => &entities::EVENT,
            Resource::Metafields => &entities::METAFIELD,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| {
                eyre::eyre!(
                    "Unknown resource '{}'. Available resources: {}",
                    s,
                    Resource::ALL.map(|r| r.as_str()).join(", ")
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resource() {
        assert_eq!("orders".parse::<Resource>().unwrap(), Resource::Orders);
        assert_eq!(" Events ".parse::<Resource>().unwrap(), Resource::Events);
        let err = "refunds".parse::<Resource>().unwrap_err();
        assert!(err.to_string().contains("Available resources"));
    }

    #[test]
    fn test_resource_endpoints() {
        assert_eq!(Resource::Orders.path(), "orders.json");
        assert_eq!(Resource::Orders.extra_params(), &[("status", "any")]);
        assert_eq!(Resource::Products.extra_params(), &[("status", "active")]);
        assert!(Resource::Customers.extra_params().is_empty());
        assert_eq!(Resource::Events.incremental_field(), "created_at");
        assert_eq!(Resource::Customers.incremental_field(), "updated_at");
        assert_eq!(Resource::Products.schema().name, "product");
        assert_eq!(Resource::Customers.schema().name, "customer");
    }
}
