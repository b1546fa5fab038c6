//! Run configuration
//!
//! Credentials come from the environment (optionally sourced from a `.env`
//! file), everything else from a YAML file. Example format:
//! ```yaml
//! endpoints: [orders, products, customers]
//! date_since: last_run
//! date_to: now
//! window_days: 1
//! output_dir: out/tables
//! state_file: out/state.json
//! fields:
//!   orders: [id, updated_at, line_items, customer]
//! slice_rows: 50000
//! continue_on_error: true
//! ```

use crate::client::{Auth, AuthType, DEFAULT_API_VERSION};
use crate::shopify::Resource;
use crate::storage::SchemaRetention;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use eyre::{Context, Result, eyre};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Date expression meaning "where the previous successful run stopped"
pub const LAST_RUN: &str = "last_run";

static RELATIVE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s*(minute|hour|day|week)s?\s+ago$").expect("valid relative date pattern")
});

/// Settings of one extraction run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Resources to extract, in order
    pub endpoints: Vec<Resource>,
    /// Start of the period, see [`parse_date`]; `last_run` resumes per resource
    pub date_since: String,
    /// End of the period (exclusive)
    pub date_to: String,
    /// Days covered by a single API query
    pub window_days: u32,
    /// Directory receiving the tables and manifests
    pub output_dir: PathBuf,
    /// JSON file keeping known columns and cursors between runs
    pub state_file: PathBuf,
    /// Restrict the fields requested per resource
    pub fields: BTreeMap<Resource, Vec<String>>,
    /// Mark manifests for incremental (upsert) loading
    pub incremental_output: bool,
    /// Split tables into header-less slices of this many rows
    pub slice_rows: Option<usize>,
    /// Let tables grow new columns; when off, the known schema is enforced
    pub fix_headers: bool,
    /// Keep going with the remaining resources when one fails
    pub continue_on_error: bool,
    /// What happens to known columns of tables a run did not produce
    pub schema_retention: SchemaRetention,
    /// Start used by `last_run` when there is no cursor yet
    pub fallback_since: String,
    /// Prefix manifests' destinations with this bucket
    pub destination_bucket: Option<String>,
    /// Add an `extraction_time` column to every row
    pub extraction_time: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![Resource::Orders, Resource::Products],
            date_since: LAST_RUN.to_string(),
            date_to: "now".to_string(),
            window_days: 1,
            output_dir: PathBuf::from("out/tables"),
            state_file: PathBuf::from("out/state.json"),
            fields: BTreeMap::new(),
            incremental_output: false,
            slice_rows: None,
            fix_headers: true,
            continue_on_error: false,
            schema_retention: SchemaRetention::default(),
            fallback_since: "30 days ago".to_string(),
            destination_bucket: None,
            extraction_time: true,
        }
    }
}

impl RunConfig {
    /// Read configuration from a YAML file
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read run config: {}", path.as_ref().display())
        })?;

        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse run config {}", path.as_ref().display()))?;
        config.validate()?;

        Ok(config)
    }

    /// Read the file if given, otherwise use the defaults
    pub fn load(path: Option<impl AsRef<Path>>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => {
                log::debug!("No run config given, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check settings that cannot be expressed in types
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            eyre::bail!("No endpoints configured");
        }
        let mut seen = BTreeSet::new();
        if let Some(repeated) = self.endpoints.iter().find(|&&r| !seen.insert(r)) {
            eyre::bail!("Endpoint '{}' is listed more than once", repeated);
        }
        if self.window_days == 0 {
            eyre::bail!("window_days must be at least 1");
        }
        if self.slice_rows == Some(0) {
            eyre::bail!("slice_rows must be at least 1");
        }
        let now = Utc::now();
        if self.date_since != LAST_RUN {
            parse_date(&self.date_since, now).wrap_err("Invalid date_since")?;
        }
        parse_date(&self.fallback_since, now).wrap_err("Invalid fallback_since")?;
        parse_date(&self.date_to, now).wrap_err("Invalid date_to")?;
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::days(i64::from(self.window_days))
    }

    /// Fields requested for `resource`; empty means all
    pub fn fields_for(&self, resource: Resource) -> &[String] {
        self.fields.get(&resource).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve the period `[since, until)` of one resource
    ///
    /// `cursor` is where the previous successful run of that resource stopped.
    pub fn period(
        &self,
        now: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let until = parse_date(&self.date_to, now).wrap_err("Invalid date_to")?;
        let since = if self.date_since == LAST_RUN {
            match cursor {
                Some(cursor) => parse_date(cursor, now)
                    .with_context(|| format!("Invalid stored cursor '{}'", cursor))?,
                None => parse_date(&self.fallback_since, now).wrap_err("Invalid fallback_since")?,
            }
        } else {
            parse_date(&self.date_since, now).wrap_err("Invalid date_since")?
        };
        Ok((since, until))
    }
}

/// Parse a date expression relative to `now`
///
/// Accepts `now`, `today`, `yesterday`, `N minutes|hours|days|weeks ago`,
/// `YYYY-MM-DD` (midnight UTC) and RFC 3339 timestamps.
pub fn parse_date(expr: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let normalized = expr.trim().to_lowercase();
    let today = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| eyre!("Invalid current date"))?
        .and_utc();

    match normalized.as_str() {
        "now" => return Ok(now),
        "today" => return Ok(today),
        "yesterday" => return Ok(today - Duration::days(1)),
        _ => {}
    }

    if let Some(caps) = RELATIVE_DATE.captures(&normalized) {
        let amount: i64 = caps[1]
            .parse()
            .with_context(|| format!("Invalid amount in '{}'", expr))?;
        let offset = match &caps[2] {
            "minute" => Duration::try_minutes(amount),
            "hour" => Duration::try_hours(amount),
            "day" => Duration::try_days(amount),
            _ => Duration::try_weeks(amount),
        }
        .ok_or_else(|| eyre!("Date offset out of range in '{}'", expr))?;
        return Ok(now - offset);
    }

    if let Ok(date) = NaiveDate::parse_from_str(expr.trim(), "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .ok_or_else(|| eyre!("Invalid date '{}'", expr));
    }

    DateTime::parse_from_rfc3339(expr.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| {
            eyre!(
                "Unrecognized date '{}'. Use now, today, yesterday, 'N days ago', YYYY-MM-DD or an RFC 3339 timestamp",
                expr
            )
        })
}

/// Shopify connection settings from the environment
///
/// Expected environment variables:
/// - SHOPIFY_SHOP: Shop name or `*.myshopify.com` host (required)
/// - SHOPIFY_API_TOKEN: Admin API access token
/// - SHOPIFY_API_KEY / SHOPIFY_PASSWORD: Private app credentials
/// - SHOPIFY_AUTH_TYPE: `token` or `basic` (optional, inferred otherwise)
/// - SHOPIFY_API_VERSION: API version (optional, defaults to 2020-10)
pub struct Credentials {
    pub shop: String,
    pub api_version: String,
    pub auth: Auth,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        let shop =
            std::env::var("SHOPIFY_SHOP").context("SHOPIFY_SHOP environment variable not set")?;
        let api_version =
            std::env::var("SHOPIFY_API_VERSION").unwrap_or_else(|_| DEFAULT_API_VERSION.to_string());

        let token = std::env::var("SHOPIFY_API_TOKEN").ok();
        let api_key = std::env::var("SHOPIFY_API_KEY").ok();
        let password = std::env::var("SHOPIFY_PASSWORD").ok();

        let auth_type = match std::env::var("SHOPIFY_AUTH_TYPE") {
            Ok(value) => value
                .parse::<AuthType>()
                .map_err(|_| eyre!("Invalid SHOPIFY_AUTH_TYPE '{}': use token or basic", value))?,
            Err(_) if token.is_some() => AuthType::Token,
            Err(_) if api_key.is_some() || password.is_some() => AuthType::Basic,
            Err(_) => eyre::bail!(
                "No Shopify credentials found: set SHOPIFY_API_TOKEN, or SHOPIFY_API_KEY and SHOPIFY_PASSWORD"
            ),
        };
        let auth = Auth::new(&auth_type, api_key, password, token)?;

        Ok(Self {
            shop,
            api_version,
            auth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serial_test::serial;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 15, 30, 0).unwrap()
    }

    #[test]
    fn test_parse_keywords() {
        assert_eq!(parse_date("now", now()).unwrap(), now());
        assert_eq!(
            parse_date("Today", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_date("yesterday", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 9, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_relative() {
        assert_eq!(
            parse_date("3 days ago", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 7, 15, 30, 0).unwrap()
        );
        assert_eq!(
            parse_date("1 hour ago", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 10, 14, 30, 0).unwrap()
        );
        assert_eq!(
            parse_date("2 weeks ago", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 26, 15, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_absolute() {
        assert_eq!(
            parse_date("2024-01-31", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_date("2024-01-31T10:00:00+02:00", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 8, 0, 0).unwrap()
        );
        assert!(parse_date("last tuesday", now()).is_err());
    }

    #[test]
    fn test_period_uses_cursor_for_last_run() {
        let config = RunConfig::default();
        let (since, until) = config.period(now(), Some("2024-05-09T12:00:00Z")).unwrap();
        assert_eq!(since, Utc.with_ymd_and_hms(2024, 5, 9, 12, 0, 0).unwrap());
        assert_eq!(until, now());

        let (since, _) = config.period(now(), None).unwrap();
        assert_eq!(since, now() - Duration::days(30));

        let fixed = RunConfig {
            date_since: "2024-05-01".to_string(),
            ..RunConfig::default()
        };
        let (since, _) = fixed.period(now(), Some("2024-05-09T12:00:00Z")).unwrap();
        assert_eq!(since, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_read_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        std::fs::write(
            &path,
            "endpoints: [orders, customers]\n\
             date_since: 7 days ago\n\
             fields:\n  orders: [id, line_items]\n\
             slice_rows: 1000\n\
             schema_retention: retain\n",
        )
        .unwrap();

        let config = RunConfig::read(&path).unwrap();
        assert_eq!(config.endpoints, vec![Resource::Orders, Resource::Customers]);
        assert_eq!(config.fields_for(Resource::Orders), ["id", "line_items"]);
        assert!(config.fields_for(Resource::Customers).is_empty());
        assert_eq!(config.slice_rows, Some(1000));
        assert_eq!(config.schema_retention, SchemaRetention::Retain);
        assert!(config.fix_headers);
        assert_eq!(config.window_days, 1);
    }

    #[test]
    fn test_read_rejects_bad_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");

        std::fs::write(&path, "endpoints: [refunds]\n").unwrap();
        assert!(RunConfig::read(&path).is_err());

        std::fs::write(&path, "endpoints: [orders, customers, orders]\n").unwrap();
        let err = RunConfig::read(&path).unwrap_err();
        assert!(format!("{err:?}").contains("Endpoint 'orders' is listed more than once"));

        std::fs::write(&path, "window_days: 0\n").unwrap();
        assert!(RunConfig::read(&path).is_err());

        std::fs::write(&path, "date_since: someday\n").unwrap();
        assert!(RunConfig::read(&path).is_err());

        std::fs::write(&path, "unknown_key: 1\n").unwrap();
        assert!(RunConfig::read(&path).is_err());
    }

    fn clear_env() {
        for key in [
            "SHOPIFY_SHOP",
            "SHOPIFY_API_TOKEN",
            "SHOPIFY_API_KEY",
            "SHOPIFY_PASSWORD",
            "SHOPIFY_AUTH_TYPE",
            "SHOPIFY_API_VERSION",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn test_credentials_from_env() {
        clear_env();
        unsafe {
            std::env::set_var("SHOPIFY_SHOP", "my-shop");
            std::env::set_var("SHOPIFY_API_TOKEN", "shpat_test");
        }
        let credentials = Credentials::from_env().unwrap();
        assert_eq!(credentials.shop, "my-shop");
        assert_eq!(credentials.api_version, DEFAULT_API_VERSION);
        assert_eq!(credentials.auth.to_string(), "Token");

        clear_env();
        unsafe {
            std::env::set_var("SHOPIFY_SHOP", "my-shop");
            std::env::set_var("SHOPIFY_API_KEY", "key");
            std::env::set_var("SHOPIFY_PASSWORD", "secret");
            std::env::set_var("SHOPIFY_API_VERSION", "2023-01");
        }
        let credentials = Credentials::from_env().unwrap();
        assert_eq!(credentials.auth.to_string(), "Basic");
        assert_eq!(credentials.api_version, "2023-01");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_credentials_missing() {
        clear_env();
        assert!(Credentials::from_env().is_err());

        unsafe { std::env::set_var("SHOPIFY_SHOP", "my-shop") };
        let err = Credentials::from_env().err().unwrap();
        assert!(err.to_string().contains("No Shopify credentials"));

        unsafe { std::env::set_var("SHOPIFY_API_KEY", "key") };
        assert!(Credentials::from_env().is_err());
        clear_env();
    }
}
