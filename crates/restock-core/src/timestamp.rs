//! Timestamp normalization for values read out of stored documents.
//!
//! History records were written by several generations of the app, so a
//! purchase time can arrive as a store-native `{seconds, nanoseconds}` object,
//! an epoch number in seconds or milliseconds, an ISO-like string, or the
//! console's Japanese rendering (`2025年9月1日 12:34:56 UTC+9`). Anything else
//! parses to `None`.

use chrono::{
  DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone as _, Utc,
};
use serde_json::{Map, Value};

/// Epoch magnitudes at or above this are read as milliseconds. `1e11` seconds
/// is the year 5138; `1e11` milliseconds is early 1973.
pub const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

/// Offset assumed for Japanese-format dates that carry no `UTC±H` suffix.
pub const DEFAULT_JA_OFFSET_SECS: i32 = 9 * 3600;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%d %H:%M:%S%.f",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M",
  "%Y/%m/%d %H:%M:%S",
  "%Y/%m/%d %H:%M",
];

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Parse any supported timestamp encoding into a UTC instant.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
  match value {
    Value::Number(n) => match n.as_i64() {
      Some(i) => from_epoch(i),
      None => n.as_f64().and_then(from_epoch_f64),
    },
    Value::String(s) => parse_timestamp_str(s),
    Value::Object(map) => from_native(map),
    Value::Null | Value::Bool(_) | Value::Array(_) => None,
  }
}

/// The first field of `record`, in `fields` order, holding a parseable
/// timestamp.
pub fn first_timestamp(record: &Map<String, Value>, fields: &[&str]) -> Option<DateTime<Utc>> {
  fields
    .iter()
    .filter_map(|f| record.get(*f))
    .find_map(parse_timestamp)
}

fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
  if n.unsigned_abs() < EPOCH_MILLIS_CUTOFF.unsigned_abs() {
    DateTime::from_timestamp(n, 0)
  } else {
    DateTime::from_timestamp_millis(n)
  }
}

fn from_epoch_f64(f: f64) -> Option<DateTime<Utc>> {
  if !f.is_finite() {
    return None;
  }
  let millis = if f.abs() < EPOCH_MILLIS_CUTOFF as f64 { f * 1000.0 } else { f };
  if millis.abs() >= i64::MAX as f64 {
    return None;
  }
  DateTime::from_timestamp_millis(millis.round() as i64)
}

fn from_native(map: &Map<String, Value>) -> Option<DateTime<Utc>> {
  let seconds = map
    .get("seconds")
    .or_else(|| map.get("_seconds"))
    .and_then(Value::as_i64)?;
  let nanos = map
    .get("nanoseconds")
    .or_else(|| map.get("_nanoseconds"))
    .and_then(Value::as_u64)
    .unwrap_or(0);
  DateTime::from_timestamp(seconds, u32::try_from(nanos).ok()?)
}

/// Parse the string encodings: digit-only epochs, RFC 3339, naive ISO-like
/// forms (read as UTC) and the Japanese console form.
pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
  let s = s.trim();
  if s.is_empty() {
    return None;
  }
  if s.bytes().all(|b| b.is_ascii_digit()) {
    return s.parse().ok().and_then(from_epoch);
  }
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  if let Some(dt) = NAIVE_DATETIME_FORMATS
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
  {
    return Some(dt.and_utc());
  }
  if let Some(date) = NAIVE_DATE_FORMATS
    .iter()
    .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
  {
    return Some(date.and_time(NaiveTime::MIN).and_utc());
  }
  parse_japanese(s)
}

// ─── Japanese console form ───────────────────────────────────────────────────

fn parse_japanese(s: &str) -> Option<DateTime<Utc>> {
  let (year, rest) = s.split_once('年')?;
  let (month, rest) = rest.split_once('月')?;
  let (day, rest) = rest.split_once('日')?;
  let date = NaiveDate::from_ymd_opt(
    year.trim().parse().ok()?,
    month.trim().parse().ok()?,
    day.trim().parse().ok()?,
  )?;

  let mut parts = rest.split_whitespace();
  let time = match parts.next() {
    Some(clock) => parse_clock(clock)?,
    None => NaiveTime::MIN,
  };
  let offset = match parts.next() {
    Some(zone) => parse_utc_offset(zone)?,
    None => FixedOffset::east_opt(DEFAULT_JA_OFFSET_SECS)?,
  };
  if parts.next().is_some() {
    return None;
  }

  offset
    .from_local_datetime(&date.and_time(time))
    .single()
    .map(|dt| dt.with_timezone(&Utc))
}

/// `H:MM` or `H:MM:SS`, hours without zero padding.
fn parse_clock(s: &str) -> Option<NaiveTime> {
  let mut fields = s.split(':').map(|f| f.parse::<u32>().ok());
  let hour = fields.next()??;
  let minute = fields.next()??;
  let second = fields.next().unwrap_or(Some(0))?;
  if fields.next().is_some() {
    return None;
  }
  NaiveTime::from_hms_opt(hour, minute, second)
}

/// `UTC`, `UTC+9`, `UTC-05:30`, `GMT+09:00`.
fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
  let rest = s.strip_prefix("UTC").or_else(|| s.strip_prefix("GMT"))?;
  if rest.is_empty() {
    return FixedOffset::east_opt(0);
  }
  let (sign, rest) = match rest.as_bytes().first()? {
    b'+' => (1, &rest[1..]),
    b'-' => (-1, &rest[1..]),
    _ => return None,
  };
  let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
  let hours: i32 = hours.parse().ok()?;
  let minutes: i32 = minutes.parse().ok()?;
  if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
    return None;
  }
  FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
