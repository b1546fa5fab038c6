//! Lazy extraction of one resource over a series of date windows

use super::resources::Resource;
use super::windows::DateWindow;
use crate::client::ShopifyClient;
use crate::etl::Extractor;

use eyre::{Context, Result};
use serde_json::Value;
use std::collections::VecDeque;
use url::Url;

/// Largest page size the API accepts
pub const PAGE_LIMIT: u32 = 250;

/// Pages through a resource window by window
///
/// Each call to [`Extractor::next_batch`] fetches exactly one page. Within a
/// window the `Link` header is followed; when it runs out the next window is
/// queried, until no windows remain.
pub struct WindowedExtractor {
    client: ShopifyClient,
    resource: Resource,
    windows: VecDeque<DateWindow>,
    fields: Option<String>,
    next: Option<Url>,
}

impl WindowedExtractor {
    pub fn new(client: ShopifyClient, resource: Resource, windows: Vec<DateWindow>) -> Self {
        Self {
            client,
            resource,
            windows: windows.into(),
            fields: None,
            next: None,
        }
    }

    /// Only request these fields; an empty list requests everything
    pub fn with_fields(mut self, fields: &[String]) -> Self {
        self.fields = (!fields.is_empty()).then(|| fields.join(","));
        self
    }

    /// Query parameters of the first page of `window`
    pub fn query(&self, window: &DateWindow) -> Vec<(String, String)> {
        let mut query: Vec<(String, String)> = self
            .resource
            .extra_params()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        query.extend(window.params(self.resource.incremental_field()));
        query.push(("limit".to_string(), PAGE_LIMIT.to_string()));
        if let Some(fields) = &self.fields {
            query.push(("fields".to_string(), fields.clone()));
        }
        query
    }
}

impl Extractor for WindowedExtractor {
    type Item = Value;

    async fn next_batch(&mut self) -> Result<Option<Vec<Self::Item>>> {
        let url = match self.next.take() {
            Some(url) => url,
            None => {
                let Some(window) = self.windows.pop_front() else {
                    return Ok(None);
                };
                log::debug!("Querying {} for {}", self.resource, window);
                self.client
                    .endpoint(&self.resource.path(), &self.query(&window))?
            }
        };

        let page = self
            .client
            .fetch_page(url, self.resource.response_key())
            .await
            .with_context(|| format!("Failed to fetch {}", self.resource))?;
        self.next = page.next;
        Ok(Some(page.items))
    }
}
