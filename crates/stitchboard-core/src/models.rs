//! Core data models for Stitchboard.
//!
//! Visits, page views, interactions, and orders are append-only records.
//! Each typed model implements [`Entity`], which binds it to a
//! [`Collection`] and lets it round-trip through the dynamic
//! [`Record`](crate::store::Record) shape that stores work with.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Named collections in the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Visits,
    PageViews,
    Orders,
    Interactions,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Visits,
        Collection::PageViews,
        Collection::Orders,
        Collection::Interactions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Visits => "visits",
            Collection::PageViews => "page_views",
            Collection::Orders => "orders",
            Collection::Interactions => "interactions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown collection: '{}'. Must be visits, page_views, orders, or interactions.",
                    s
                )
            })
    }
}

/// Coarse device category of a visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub const ALL: [DeviceType; 3] = [DeviceType::Desktop, DeviceType::Mobile, DeviceType::Tablet];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browser family of a visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
    Edge,
    Opera,
    Ie,
    Unknown,
}

impl Browser {
    /// Human-readable label for dashboards.
    pub fn display_name(&self) -> &'static str {
        match self {
            Browser::Chrome => "Chrome",
            Browser::Firefox => "Firefox",
            Browser::Safari => "Safari",
            Browser::Edge => "Edge",
            Browser::Opera => "Opera",
            Browser::Ie => "Internet Explorer",
            Browser::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A typed model stored in a fixed [`Collection`].
pub trait Entity: Serialize + DeserializeOwned {
    const COLLECTION: Collection;
    /// Field holding the creation instant, used for recency ordering.
    const TIMESTAMP_FIELD: &'static str;
}

/// One record per browsing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitEvent {
    pub device_type: DeviceType,
    pub browser: Browser,
    #[serde(default)]
    pub user_agent: String,
    pub referrer: String,
    /// `"<w>x<h>"` of the visitor's screen.
    pub screen_resolution: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Entity for VisitEvent {
    const COLLECTION: Collection = Collection::Visits;
    const TIMESTAMP_FIELD: &'static str = "timestamp";
}

/// One record per navigation within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageViewEvent {
    /// Route path.
    pub page_id: String,
    /// Human label; the dashboard groups by this field.
    pub page_name: String,
    #[serde(default)]
    pub user_agent: String,
    pub referrer: String,
    pub screen_width: u32,
    pub screen_height: u32,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Entity for PageViewEvent {
    const COLLECTION: Collection = Collection::PageViews;
    const TIMESTAMP_FIELD: &'static str = "timestamp";
}

/// A free-form UI interaction (button clicks, modal opens, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub interaction_type: String,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Entity for Interaction {
    const COLLECTION: Collection = Collection::Interactions;
    const TIMESTAMP_FIELD: &'static str = "timestamp";
}

/// Status given to every newly submitted order.
pub const ORDER_STATUS_PENDING: &str = "pending";

/// A customer order request submitted through the storefront form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub customer_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub product_id: String,
    pub product_name: String,
    #[serde(default)]
    pub custom_description: String,
    #[serde(default)]
    pub course_details: String,
    pub status: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Entity for OrderRequest {
    const COLLECTION: Collection = Collection::Orders;
    const TIMESTAMP_FIELD: &'static str = "created_at";
}

/// Format an instant the way it is stored: RFC 3339, UTC, millisecond
/// precision, `Z` suffix. Stored strings therefore sort chronologically.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serde adapter for stored timestamps.
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_collection_names_round_trip() {
        for c in Collection::ALL {
            assert_eq!(c.as_str().parse::<Collection>().unwrap(), c);
        }
        assert!("customers".parse::<Collection>().is_err());
    }

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let a = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        let b = a + chrono::Duration::milliseconds(1);
        let c = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let (sa, sb, sc) = (format_timestamp(&a), format_timestamp(&b), format_timestamp(&c));
        assert_eq!(sa, "2024-03-09T23:59:59.000Z");
        assert!(sa < sb && sb < sc);
    }

    #[test]
    fn test_browser_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Browser::Ie).unwrap(), "ie");
        assert_eq!(Browser::Ie.display_name(), "Internet Explorer");
        assert_eq!(serde_json::to_value(DeviceType::Tablet).unwrap(), "tablet");
    }
}
