//! Decomposition rules of the Shopify entities
//!
//! Every nested field that ends up in its own table is declared here. Fields
//! not listed stay on the parent row; nested objects there are flattened into
//! `parent__child` columns and undeclared arrays are kept as JSON text.

use crate::decompose::{ChildRule, EntitySchema};

pub static ORDER: EntitySchema = EntitySchema {
    name: "order",
    primary_key: &["id"],
    children: &[
        ChildRule::entity("line_items", &LINE_ITEM).foreign_key("order_id"),
        ChildRule::entity("fulfillments", &ORDER_FULFILLMENT).foreign_key("order_id"),
        ChildRule::table(
            "discount_applications",
            "order_discount_applications",
            &["order_id", "row_nr"],
        )
        .foreign_key("order_id")
        .positional(),
        ChildRule::table(
            "discount_codes",
            "order_discount_codes",
            &["order_id", "row_nr"],
        )
        .foreign_key("order_id")
        .positional(),
        ChildRule::table("tax_lines", "order_tax_lines", &["order_id", "row_nr"])
            .foreign_key("order_id")
            .positional(),
        ChildRule::shared("customer", "customer", "customer_id"),
    ],
    dedupe: false,
};

pub static LINE_ITEM: EntitySchema = EntitySchema {
    name: "line_item",
    primary_key: &["id"],
    children: &[
        ChildRule::table(
            "discount_allocations",
            "line_item_discount_allocations",
            &["row_nr", "line_item_id"],
        )
        .foreign_key("line_item_id")
        .positional(),
        ChildRule::table(
            "tax_lines",
            "line_item_tax_lines",
            &["row_nr", "line_item_id"],
        )
        .foreign_key("line_item_id")
        .positional(),
    ],
    dedupe: false,
};

pub static ORDER_FULFILLMENT: EntitySchema = EntitySchema {
    name: "order_fulfillments",
    primary_key: &["id"],
    children: &[
        ChildRule::entity("line_items", &LINE_ITEM)
            .prefixed("fulfillment_")
            .foreign_key("fulfillment_id"),
        ChildRule::table(
            "discount_applications",
            "fulfillment_discount_allocations",
            &["row_nr", "fulfillment_id"],
        )
        .foreign_key("fulfillment_id")
        .positional(),
        ChildRule::table(
            "tax_lines",
            "fulfillment_tax_lines",
            &["row_nr", "fulfillment_id"],
        )
        .foreign_key("fulfillment_id")
        .positional(),
    ],
    dedupe: false,
};

pub static PRODUCT: EntitySchema = EntitySchema {
    name: "product",
    primary_key: &["id"],
    children: &[
        ChildRule::table("images", "product_images", &["id", "product_id"])
            .foreign_key("product_id"),
        // options carry their own product_id
        ChildRule::table("options", "product_options", &["id", "product_id"]),
        ChildRule::entity("variants", &PRODUCT_VARIANT).foreign_key("product_id"),
    ],
    dedupe: false,
};

pub static PRODUCT_VARIANT: EntitySchema = EntitySchema {
    name: "product_variant",
    primary_key: &["id"],
    children: &[ChildRule::table(
        "presentment_prices",
        "product_variant_presentment_prices",
        &["row_nr", "product_variant_id"],
    )
    .foreign_key("product_variant_id")
    .positional()],
    dedupe: false,
};

/// Customers arrive both from their own endpoint and embedded in orders, so
/// the writer skips ids it has already seen.
pub static CUSTOMER: EntitySchema = EntitySchema {
    name: "customer",
    primary_key: &["id"],
    children: &[
        ChildRule::table("addresses", "customer_addresses", &["id", "customer_id"])
            .foreign_key("customer_id"),
    ],
    dedupe: true,
};

pub static EVENT: EntitySchema = EntitySchema::flat("event", &["id"]);

pub static METAFIELD: EntitySchema = EntitySchema::flat("metafield", &["id"]);
