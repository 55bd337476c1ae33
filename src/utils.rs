use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Length of the trailing window used by every metric primitive.
pub const WINDOW_DAYS: u64 = 14;

/// Smoothing term for rate denominators. Exact-zero denominators are
/// overridden before it applies.
pub const EPSILON: f64 = 1e-9;

/// Half-open `[start, end)` day range ending at the latest observed date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TrailingWindow {
    /// Builds the window from the latest date in `dates`, or from `today` when
    /// there is none. The window is data-relative so static historical
    /// datasets produce the same metrics whenever they are analysed.
    pub fn ending_at_latest<I>(dates: I, today: NaiveDate) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        let latest = dates.into_iter().max().unwrap_or(today);
        let end = latest.checked_add_days(Days::new(1)).unwrap_or(latest);
        let start = end.checked_sub_days(Days::new(WINDOW_DAYS)).unwrap_or(end);
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// Parses a cell into a UTC calendar day. Accepts RFC 3339 timestamps,
/// `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS` and `YYYY/MM/DD`.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.date());
        }
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    None
}

/// Permissive numeric coercion. Missing, empty and non-numeric cells are
/// absent rather than zero.
pub fn coerce_number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok()?
        }
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    n.is_finite().then_some(n)
}

/// Renders an identifying cell (sku, campaign, date) as text. Null and
/// structured values yield an empty string.
pub fn cell_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Clamps a sum that overflowed to the largest finite value. NaN becomes zero.
pub fn saturate(n: f64) -> f64 {
    if n.is_nan() {
        0.0
    } else {
        n.clamp(f64::MIN, f64::MAX)
    }
}

/// Rounds to 2 decimals. Always returns a finite value.
pub fn round2(n: f64) -> f64 {
    let n = saturate(n);
    let scaled = n * 100.0;
    if !scaled.is_finite() {
        return n;
    }
    scaled.round() / 100.0
}
