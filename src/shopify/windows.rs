//! Splitting of a requested period into fixed-size query windows

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use eyre::Result;

/// A half-open time range `[start, end)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    /// Query parameters filtering `field` to this window, e.g.
    /// `updated_at_min` and `updated_at_max`
    pub fn params(&self, field: &str) -> [(String, String); 2] {
        [
            (format!("{}_min", field), format_timestamp(self.start)),
            (format!("{}_max", field), format_timestamp(self.end)),
        ]
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} .. {}",
            format_timestamp(self.start),
            format_timestamp(self.end)
        )
    }
}

/// RFC 3339 with whole seconds, as the API expects
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Split `[since, until)` into consecutive windows of `size`; the last one is
/// cut short at `until`. An empty or inverted period yields no windows.
pub fn split_windows(
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    size: Duration,
) -> Result<Vec<DateWindow>> {
    if size <= Duration::zero() {
        eyre::bail!("Window size must be positive, got {}", size);
    }

    let mut windows = Vec::new();
    let mut start = since;
    while start < until {
        let end = (start + size).min(until);
        windows.push(DateWindow { start, end });
        start = end;
    }
    Ok(windows)
}
