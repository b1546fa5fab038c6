//! Shopify client module
//!
//! Provides `ShopifyClient` for making paged requests to the Admin REST API,
//! retrying transient failures on the way.

use super::Auth;
use base64::Engine;
use eyre::{Context, Result, eyre};
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

/// API version used when none is configured
pub const DEFAULT_API_VERSION: &str = "2020-10";

static NEXT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).expect("valid Link header pattern")
});

/// Extract the `rel="next"` target from a `Link` header
///
/// # Example
/// ```
/// use shopify_extractor::client::next_link;
///
/// let header = r#"<https://shop.myshopify.com/admin/api/2020-10/orders.json?page_info=abc>; rel="next""#;
/// let next = next_link(header).unwrap();
/// assert_eq!(next.query(), Some("page_info=abc"));
/// ```
pub fn next_link(header: &str) -> Option<Url> {
    header
        .split(',')
        .filter_map(|part| NEXT_LINK.captures(part))
        .find_map(|caps| Url::parse(&caps[1]).ok())
}

/// How often and how long to retry failed requests
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Attempts for server errors and connection failures, including the first
    pub max_attempts: u32,
    /// Consecutive rate-limit responses tolerated per request
    pub max_rate_limited: u32,
    /// First backoff delay; doubled after every server error
    pub base_delay: Duration,
    /// Wait used when a 429 response carries no `Retry-After`
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_rate_limited: 10,
            base_delay: Duration::from_secs(1),
            default_retry_after: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// One page of a listing endpoint
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<Value>,
    pub next: Option<Url>,
}

/// Shopify client for making API requests.
///
/// # Example
/// ```no_run
/// use shopify_extractor::client::{Auth, ShopifyClient};
///
/// # async fn example() -> eyre::Result<()> {
/// let client = ShopifyClient::try_new(
///     "my-shop",
///     "2020-10",
///     Auth::AccessToken("shpat_xxx".to_string()),
/// )?;
/// let shop = client.test_connection().await?;
/// println!("{}", shop["name"]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ShopifyClient {
    client: Client,
    url: Url,
    retry: RetryPolicy,
}

impl ShopifyClient {
    /// Create a client for `https://{shop}.myshopify.com/admin/api/{api_version}/`
    ///
    /// `shop` may be the bare shop name or the full `*.myshopify.com` host.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be built, the credentials cannot be
    /// used as HTTP headers, or the HTTP client cannot be built
    pub fn try_new(shop: &str, api_version: &str, auth: Auth) -> Result<Self> {
        let shop = shop
            .trim()
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .trim_end_matches(".myshopify.com");
        if shop.is_empty() {
            eyre::bail!("Shop name is empty; set SHOPIFY_SHOP to your shop's name");
        }
        let url = Url::parse(&format!(
            "https://{}.myshopify.com/admin/api/{}/",
            shop, api_version
        ))
        .with_context(|| format!("Invalid shop name '{}'", shop))?;
        Self::with_base_url(url, auth)
    }

    /// Create a client against an explicit base URL
    pub fn with_base_url(url: Url, auth: Auth) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        match auth {
            Auth::Basic(api_key, password) => {
                let credentials = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", api_key, password));
                let value = HeaderValue::from_str(&format!("Basic {}", credentials))
                    .wrap_err("API key or password cannot be sent as an HTTP header")?;
                headers.insert(AUTHORIZATION, value);
            }
            Auth::AccessToken(token) => {
                let mut value = HeaderValue::from_str(&token).wrap_err(
                    "Access token contains characters not allowed in an HTTP header; check SHOPIFY_API_TOKEN",
                )?;
                value.set_sensitive(true);
                headers.insert("x-shopify-access-token", value);
            }
        }
        let client = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            url,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get the base URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Build the URL of an endpoint below the base URL
    ///
    /// # Errors
    /// Returns an error if `path` does not form a valid URL
    pub fn endpoint(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let mut url = self
            .url
            .join(path.strip_prefix('/').unwrap_or(path))
            .with_context(|| format!("Invalid endpoint path '{}'", path))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Verify the connection and authentication to Shopify.
    ///
    /// Fetches `shop.json` and returns the shop object.
    pub async fn test_connection(&self) -> Result<Value> {
        let url = self.endpoint("shop.json", &[])?;
        let response = self.get(url).await?;
        let mut body: Value = response
            .json()
            .await
            .wrap_err("Failed to parse shop.json response")?;
        body.get_mut("shop")
            .map(Value::take)
            .ok_or_else(|| eyre!("Response from {} has no 'shop' object", self.url))
    }

    /// Fetch one page of a listing and the link to the next one
    ///
    /// `key` is the name of the array in the response body, e.g. `orders`.
    pub async fn fetch_page(&self, url: Url, key: &str) -> Result<Page> {
        let response = self.get(url.clone()).await?;
        let next = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_link);

        let mut body: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))?;
        let items = match body.get_mut(key).map(Value::take) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => eyre::bail!(
                "Expected '{}' to be a list in response from {}, got {}",
                key,
                url,
                other
            ),
        };
        log::debug!(
            "Fetched {} {} (more pages: {})",
            items.len(),
            key,
            next.is_some()
        );

        Ok(Page { items, next })
    }

    /// GET a URL, retrying server errors with exponential backoff and
    /// honoring `Retry-After` on rate limiting
    pub async fn get(&self, url: Url) -> Result<Response> {
        let mut attempt = 0u32;
        let mut rate_limited = 0u32;
        loop {
            log::trace!("GET {}", url);
            let result = self.client.get(url.clone()).send().await;

            let failure = match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    rate_limited += 1;
                    if rate_limited > self.retry.max_rate_limited {
                        eyre::bail!(
                            "Rate limited {} times in a row requesting {}",
                            rate_limited - 1,
                            url
                        );
                    }
                    let wait = retry_after(response.headers())
                        .unwrap_or(self.retry.default_retry_after);
                    log::info!("Received 429 -- sleeping for {} seconds", wait.as_secs());
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Ok(response) if response.status().is_server_error() => {
                    eyre!("Server error {} from {}", response.status(), url)
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    eyre::bail!("Request to {} failed with {}: {}", url, status, body);
                }
                Err(e) => eyre!("Failed to send request to {}: {}", url, e),
            };

            attempt += 1;
            if attempt >= self.retry.max_attempts {
                return Err(failure.wrap_err(format!("Giving up after {} attempts", attempt)));
            }
            let wait = self.retry.backoff(attempt);
            log::warn!(
                "{} -- retry {}/{} in {:?}",
                failure,
                attempt,
                self.retry.max_attempts - 1,
                wait
            );
            tokio::time::sleep(wait).await;
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let seconds: f64 = value.trim().parse().ok()?;
    (seconds >= 0.0).then(|| Duration::from_secs(seconds.floor() as u64))
}

impl std::fmt::Display for ShopifyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ShopifyClient {
        ShopifyClient::try_new("my-shop", "2020-10", Auth::AccessToken("t".to_string())).unwrap()
    }

    #[test]
    fn test_base_url() {
        assert_eq!(
            client().url().as_str(),
            "https://my-shop.myshopify.com/admin/api/2020-10/"
        );

        let full = ShopifyClient::try_new(
            "https://my-shop.myshopify.com/",
            "2023-01",
            Auth::Basic("key".to_string(), "secret".to_string()),
        )
        .unwrap();
        assert_eq!(
            full.url().as_str(),
            "https://my-shop.myshopify.com/admin/api/2023-01/"
        );
    }

    #[test]
    fn test_empty_shop_is_rejected() {
        let result = ShopifyClient::try_new(" ", "2020-10", Auth::AccessToken("t".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_token_header() {
        let result = ShopifyClient::try_new(
            "my-shop",
            "2020-10",
            Auth::AccessToken("bad\ntoken".to_string()),
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("SHOPIFY_API_TOKEN"));
    }

    #[test]
    fn test_endpoint_query() {
        let url = client()
            .endpoint(
                "/orders.json",
                &[
                    ("status".to_string(), "any".to_string()),
                    ("limit".to_string(), "250".to_string()),
                ],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://my-shop.myshopify.com/admin/api/2020-10/orders.json?status=any&limit=250"
        );
    }

    #[test]
    fn test_next_link() {
        let header = concat!(
            r#"<https://s.myshopify.com/admin/api/2020-10/orders.json?page_info=prev>; rel="previous", "#,
            r#"<https://s.myshopify.com/admin/api/2020-10/orders.json?page_info=next&limit=250>; rel="next""#
        );
        let next = next_link(header).unwrap();
        assert_eq!(next.query(), Some("page_info=next&limit=250"));

        let only_previous = r#"<https://s.myshopify.com/orders.json?page_info=p>; rel="previous""#;
        assert!(next_link(only_previous).is_none());
        assert!(next_link("").is_none());
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2.0"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));
    }
}
