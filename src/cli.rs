//! CLI helper functions

use crate::{
    client::ShopifyClient,
    config::{Credentials, RunConfig},
    run::{RunSummary, execute},
    shopify::WindowedExtractor,
    storage::JsonStateFile,
};
use chrono::Utc;
use eyre::{Context, Result};
use owo_colors::OwoColorize;

/// Load the Shopify client from environment variables
///
/// See [`Credentials::from_env`] for the expected variables.
pub fn load_shopify_client() -> Result<ShopifyClient> {
    let credentials = Credentials::from_env()?;
    log::debug!(
        "Using {} authentication for shop {}",
        credentials.auth,
        credentials.shop
    );
    ShopifyClient::try_new(
        &credentials.shop,
        &credentials.api_version,
        credentials.auth,
    )
    .context("Failed to create Shopify client")
}

/// Verify the credentials by fetching the shop
///
/// Returns the shop's name
pub async fn test_authorization() -> Result<String> {
    let client = load_shopify_client()?;
    log::info!("Connecting to {}", client.url().bright_black());
    let shop = client
        .test_connection()
        .await
        .context("Failed to reach the Shopify Admin API")?;
    let name = shop["name"].as_str().unwrap_or("(unnamed)").to_string();
    log::info!("✓ Authorized for shop {}", name.green());
    Ok(name)
}

/// Run an extraction as configured
///
/// The client is created before anything is written, so bad credentials
/// fail the run without touching the output directory or state.
pub async fn run_extraction(config: &RunConfig) -> Result<RunSummary> {
    let client = load_shopify_client()?;
    let store = JsonStateFile::new(&config.state_file);
    log::info!(
        "Extracting {} to {}",
        config
            .endpoints
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ")
            .cyan(),
        config.output_dir.display().bright_black()
    );

    let summary = execute(config, &store, Utc::now(), |resource, windows| {
        WindowedExtractor::new(client.clone(), resource, windows)
            .with_fields(config.fields_for(resource))
    })
    .await?;

    log::info!(
        "✓ Extracted {} record(s) into {} table(s) in {}",
        summary.records(),
        summary.artifacts.len(),
        config.output_dir.display()
    );
    Ok(summary)
}
