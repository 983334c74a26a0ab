//! Payment metadata pushed by the agent.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One payment listed by the agent for a platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    /// Position of the payment in the agent's own list; used to request its proof.
    pub original_index: u32,

    #[serde(default)]
    pub hidden: bool,

    #[serde(default, deserialize_with = "string_or_number")]
    pub amount: String,

    #[serde(default, deserialize_with = "string_or_number")]
    pub date: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,

    /// Platform-specific fields passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// The most recent metadata push for one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub entries: Vec<MetadataEntry>,

    /// `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,

    pub received_at: DateTime<Utc>,
}

impl MetadataRecord {
    /// Build a record from an agent push. `expires_at_ms <= 0` means no expiry;
    /// instants past the representable range clamp to the latest one.
    pub fn new(entries: Vec<MetadataEntry>, expires_at_ms: i64, received_at: DateTime<Utc>) -> Self {
        let expires_at = (expires_at_ms > 0).then(|| {
            DateTime::<Utc>::from_timestamp_millis(expires_at_ms).unwrap_or(DateTime::<Utc>::MAX_UTC)
        });
        Self {
            entries,
            expires_at,
            received_at,
        }
    }

    /// Expired once `now` reaches the expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Drop hidden entries.
pub fn visible(entries: &[MetadataEntry]) -> Vec<MetadataEntry> {
    entries.iter().filter(|e| !e.hidden).cloned().collect()
}

/// Sort newest first. Unparseable dates sort as the earliest.
pub fn sort_by_date_desc(entries: &mut [MetadataEntry]) {
    entries.sort_by(|a, b| date_key(&b.date).cmp(&date_key(&a.date)));
}

/// The entry the agent listed at `original_index`.
pub fn select_by_origin_index(entries: &[MetadataEntry], original_index: u32) -> Option<&MetadataEntry> {
    entries.iter().find(|e| e.original_index == original_index)
}

/// Visible entries, newest first.
pub fn prepare_for_display(entries: &[MetadataEntry]) -> Vec<MetadataEntry> {
    let mut list = visible(entries);
    sort_by_date_desc(&mut list);
    list
}

/// Millisecond sort key for an embedded date.
fn date_key(date: &str) -> Option<i64> {
    let date = date.trim();
    if date.is_empty() {
        return None;
    }
    if let Ok(n) = date.parse::<i64>() {
        return Some(n);
    }
    if let Ok(n) = date.parse::<f64>() {
        return n.is_finite().then_some(n as i64);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(date, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}
