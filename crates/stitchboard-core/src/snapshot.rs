//! Dashboard aggregation: the read path of the analytics pipeline.
//!
//! [`load_snapshot`] issues every sub-query against the [`RecordStore`]
//! concurrently and folds the answers into a [`Snapshot`]. Sub-queries are
//! independent: when one fails its section keeps its zero value, the
//! failure is logged and listed in [`Snapshot::failed`], and the rest of the
//! snapshot is still populated.
//!
//! There is no cross-query consistency: each sub-query sees the store as it
//! is when that query runs. Refreshing is the caller's job; this module
//! holds no timers.
//!
//! # Sections
//!
//! | Section | Source |
//! |---------|--------|
//! | `total_visits` | count of `visits` |
//! | `total_page_views` | count of `page_views` |
//! | `today_visits` | count of `visits` since local midnight |
//! | `visits_by_device` | one count of `visits` per device type |
//! | `popular_pages` | most recent page views grouped by `page_name` |
//! | `recent_visits` | newest `visits` by `timestamp` |
//! | `recent_orders` | newest `orders` by `created_at` |

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{format_timestamp, Collection, DeviceType, Entity, OrderRequest, PageViewEvent, VisitEvent};
use crate::store::{compare_values, query_entities, Filter, OrderBy, Query, RecordStore};

pub const DEFAULT_POPULAR_PAGES_LIMIT: usize = 5;
pub const DEFAULT_POPULAR_PAGES_WINDOW: usize = 1000;
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Tuning for one snapshot load.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotOptions {
    /// Start of the current local day, in UTC.
    pub day_start: DateTime<Utc>,
    /// How many pages to report.
    pub popular_pages_limit: usize,
    /// How many of the most recent page views to group. `None` reads all.
    pub popular_pages_window: Option<usize>,
    /// How many recent visits and orders to return.
    pub recent_limit: usize,
}

impl SnapshotOptions {
    /// Default options with "today" anchored to `now`'s own time zone.
    pub fn at<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        Self {
            day_start: start_of_local_day(now),
            popular_pages_limit: DEFAULT_POPULAR_PAGES_LIMIT,
            popular_pages_window: Some(DEFAULT_POPULAR_PAGES_WINDOW),
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceCounts {
    pub desktop: u64,
    pub mobile: u64,
    pub tablet: u64,
}

impl DeviceCounts {
    pub fn total(&self) -> u64 {
        self.desktop + self.mobile + self.tablet
    }

    pub fn get(&self, device: DeviceType) -> u64 {
        match device {
            DeviceType::Desktop => self.desktop,
            DeviceType::Mobile => self.mobile,
            DeviceType::Tablet => self.tablet,
        }
    }
}

/// Share of each device type in percent, rounded to one decimal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DevicePercentages {
    pub desktop: f64,
    pub mobile: f64,
    pub tablet: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageCount {
    pub name: String,
    pub count: u64,
}

/// Identifies a snapshot sub-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSection {
    TotalVisits,
    TotalPageViews,
    TodayVisits,
    VisitsByDevice,
    PopularPages,
    RecentVisits,
    RecentOrders,
}

impl SnapshotSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotSection::TotalVisits => "total_visits",
            SnapshotSection::TotalPageViews => "total_page_views",
            SnapshotSection::TodayVisits => "today_visits",
            SnapshotSection::VisitsByDevice => "visits_by_device",
            SnapshotSection::PopularPages => "popular_pages",
            SnapshotSection::RecentVisits => "recent_visits",
            SnapshotSection::RecentOrders => "recent_orders",
        }
    }
}

impl fmt::Display for SnapshotSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time aggregation for the dashboard. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub total_visits: u64,
    pub total_page_views: u64,
    pub today_visits: u64,
    pub visits_by_device: DeviceCounts,
    pub device_percentages: DevicePercentages,
    pub popular_pages: Vec<PageCount>,
    pub recent_visits: Vec<VisitEvent>,
    pub recent_orders: Vec<OrderRequest>,
    /// Sections whose sub-query failed and hold zero values.
    pub failed: Vec<SnapshotSection>,
}

impl Snapshot {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Load a fresh [`Snapshot`] from the store.
pub async fn load_snapshot<S>(store: &S, options: &SnapshotOptions) -> Snapshot
where
    S: RecordStore + ?Sized,
{
    let all = Filter::new();
    let today = Filter::new().gte(
        VisitEvent::TIMESTAMP_FIELD,
        format_timestamp(&options.day_start),
    );
    let recent_visits_query = Query::new()
        .order_by(OrderBy::desc(VisitEvent::TIMESTAMP_FIELD))
        .limit(options.recent_limit);
    let recent_orders_query = Query::new()
        .order_by(OrderBy::desc(OrderRequest::TIMESTAMP_FIELD))
        .limit(options.recent_limit);

    let (total_visits, total_page_views, today_visits, by_device, pages, recent_visits, recent_orders) = futures::join!(
        store.count(Collection::Visits, &all),
        store.count(Collection::PageViews, &all),
        store.count(Collection::Visits, &today),
        count_by_device(store),
        fetch_popular_pages(store, options),
        query_entities::<S, VisitEvent>(store, &recent_visits_query),
        query_entities::<S, OrderRequest>(store, &recent_orders_query),
    );

    let mut failed = Vec::new();
    let visits_by_device = settle(SnapshotSection::VisitsByDevice, by_device, &mut failed);
    let snapshot = Snapshot {
        generated_at: Utc::now(),
        total_visits: settle(SnapshotSection::TotalVisits, total_visits, &mut failed),
        total_page_views: settle(SnapshotSection::TotalPageViews, total_page_views, &mut failed),
        today_visits: settle(SnapshotSection::TodayVisits, today_visits, &mut failed),
        visits_by_device,
        device_percentages: device_percentages(&visits_by_device),
        popular_pages: settle(SnapshotSection::PopularPages, pages, &mut failed),
        recent_visits: settle(SnapshotSection::RecentVisits, recent_visits, &mut failed),
        recent_orders: settle(SnapshotSection::RecentOrders, recent_orders, &mut failed),
        failed,
    };

    debug!(
        total_visits = snapshot.total_visits,
        failed = snapshot.failed.len(),
        "snapshot loaded"
    );
    snapshot
}

fn settle<T: Default>(section: SnapshotSection, result: Result<T>, failed: &mut Vec<SnapshotSection>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(%section, error = %e, "snapshot section failed");
            failed.push(section);
            T::default()
        }
    }
}

async fn count_by_device<S: RecordStore + ?Sized>(store: &S) -> Result<DeviceCounts> {
    let filter = |device: DeviceType| Filter::new().eq("device_type", device.as_str());
    let (desktop_filter, mobile_filter, tablet_filter) = (
        filter(DeviceType::Desktop),
        filter(DeviceType::Mobile),
        filter(DeviceType::Tablet),
    );
    let (desktop, mobile, tablet) = futures::try_join!(
        store.count(Collection::Visits, &desktop_filter),
        store.count(Collection::Visits, &mobile_filter),
        store.count(Collection::Visits, &tablet_filter),
    )?;
    Ok(DeviceCounts {
        desktop,
        mobile,
        tablet,
    })
}

/// Group the most recent page views by name, counted in chronological order.
async fn fetch_popular_pages<S: RecordStore + ?Sized>(
    store: &S,
    options: &SnapshotOptions,
) -> Result<Vec<PageCount>> {
    let mut query = Query::new().order_by(OrderBy::desc(PageViewEvent::TIMESTAMP_FIELD));
    if let Some(window) = options.popular_pages_window {
        query = query.limit(window);
    }
    let mut records = store.query(Collection::PageViews, &query).await?;

    records.sort_by(|a, b| {
        match (a.field(PageViewEvent::TIMESTAMP_FIELD), b.field(PageViewEvent::TIMESTAMP_FIELD)) {
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal),
            _ => std::cmp::Ordering::Equal,
        }
    });

    let names = records
        .iter()
        .filter_map(|r| r.field("page_name").and_then(Value::as_str));
    Ok(popular_pages(names, options.popular_pages_limit))
}

/// Count page names and return the `limit` most frequent, descending.
///
/// Pages with equal counts keep the order in which they first appear.
pub fn popular_pages<'a, I>(names: I, limit: usize) -> Vec<PageCount>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<PageCount> = Vec::new();

    for name in names {
        match index.get(name) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(name, counts.len());
                counts.push(PageCount {
                    name: name.to_string(),
                    count: 1,
                });
            }
        }
    }

    // `sort_by` is stable, which keeps first-seen order among ties.
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(limit);
    counts
}

/// Percent share of each device type, rounded to one decimal place.
///
/// All zero when there are no visits.
pub fn device_percentages(counts: &DeviceCounts) -> DevicePercentages {
    let total = counts.total();
    let pct = |n: u64| {
        if total == 0 {
            0.0
        } else {
            (n as f64 / total as f64 * 1000.0).round() / 10.0
        }
    };
    DevicePercentages {
        desktop: pct(counts.desktop),
        mobile: pct(counts.mobile),
        tablet: pct(counts.tablet),
    }
}

/// Local midnight of `now`'s day in `now`'s time zone, as a UTC instant.
///
/// When midnight does not exist locally (a DST jump), the first instant
/// after the gap is used.
pub fn start_of_local_day<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Utc> {
    let tz = now.timezone();
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(midnight + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Browser, ORDER_STATUS_PENDING};
    use crate::store::faulty::FaultyStore;
    use crate::store::insert_entity;
    use crate::store::memory::InMemoryStore;
    use chrono::FixedOffset;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn visit(device_type: DeviceType, at: &str) -> VisitEvent {
        VisitEvent {
            device_type,
            browser: Browser::Chrome,
            user_agent: String::new(),
            referrer: "direct".to_string(),
            screen_resolution: "1920x1080".to_string(),
            timestamp: ts(at),
        }
    }

    fn page_view(name: &str, at: &str) -> PageViewEvent {
        PageViewEvent {
            page_id: name.to_string(),
            page_name: name.to_string(),
            user_agent: String::new(),
            referrer: "direct".to_string(),
            screen_width: 1920,
            screen_height: 1080,
            timestamp: ts(at),
        }
    }

    fn order(name: &str, at: &str) -> OrderRequest {
        OrderRequest {
            customer_name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: String::new(),
            product_id: "1".to_string(),
            product_name: "Apple Keychain".to_string(),
            custom_description: String::new(),
            course_details: String::new(),
            status: ORDER_STATUS_PENDING.to_string(),
            created_at: ts(at),
        }
    }

    fn options_at(now: &str) -> SnapshotOptions {
        SnapshotOptions::at(&DateTime::parse_from_rfc3339(now).unwrap())
    }

    #[test]
    fn test_popular_pages_scenario() {
        let pages = popular_pages(["/", "/crochet-store", "/", "/contact"], 5);
        assert_eq!(
            pages,
            vec![
                PageCount { name: "/".into(), count: 2 },
                PageCount { name: "/crochet-store".into(), count: 1 },
                PageCount { name: "/contact".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn test_popular_pages_sorted_and_truncated() {
        let names = ["a", "b", "c", "b", "d", "e", "f", "c", "c", "f"];
        let pages = popular_pages(names, 5);
        let got: Vec<(&str, u64)> = pages.iter().map(|p| (p.name.as_str(), p.count)).collect();
        assert_eq!(got, vec![("c", 3), ("b", 2), ("f", 2), ("a", 1), ("d", 1)]);
        assert!(pages.windows(2).all(|w| w[0].count >= w[1].count));
        assert!(popular_pages(std::iter::empty(), 5).is_empty());
    }

    #[test]
    fn test_device_percentages_scenario() {
        let p = device_percentages(&DeviceCounts { desktop: 4, mobile: 2, tablet: 1 });
        assert_eq!(p, DevicePercentages { desktop: 57.1, mobile: 28.6, tablet: 14.3 });
    }

    #[test]
    fn test_device_percentages_zero_total() {
        assert_eq!(device_percentages(&DeviceCounts::default()), DevicePercentages::default());
    }

    #[test]
    fn test_device_percentages_sum_to_hundred() {
        for desktop in 1..=12u64 {
            for mobile in 1..=12u64 {
                for tablet in 1..=12u64 {
                    let p = device_percentages(&DeviceCounts { desktop, mobile, tablet });
                    let sum = p.desktop + p.mobile + p.tablet;
                    assert!(
                        (sum - 100.0).abs() <= 0.1 + 1e-9,
                        "{}/{}/{} summed to {}",
                        desktop,
                        mobile,
                        tablet,
                        sum
                    );
                }
            }
        }
    }

    #[test]
    fn test_start_of_local_day() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T02:00:00+05:30").unwrap();
        assert_eq!(start_of_local_day(&now), ts("2024-04-30T18:30:00Z"));

        let now = DateTime::parse_from_rfc3339("2024-05-01T23:59:59-07:00").unwrap();
        assert_eq!(start_of_local_day(&now), ts("2024-05-01T07:00:00Z"));

        let now = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(start_of_local_day(&now), ts("2024-05-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_snapshot_counts() {
        let store = InMemoryStore::new();
        let visits = [
            (DeviceType::Desktop, "2024-04-30T10:00:00Z"),
            (DeviceType::Desktop, "2024-04-30T23:59:59Z"),
            (DeviceType::Desktop, "2024-05-01T00:00:00Z"),
            (DeviceType::Desktop, "2024-05-01T08:00:00Z"),
            (DeviceType::Mobile, "2024-05-01T09:00:00Z"),
            (DeviceType::Mobile, "2024-04-29T09:00:00Z"),
            (DeviceType::Tablet, "2024-05-01T11:00:00Z"),
        ];
        for (device, at) in visits {
            insert_entity(&store, &visit(device, at)).await.unwrap();
        }
        for (name, at) in [
            ("/", "2024-05-01T08:00:00Z"),
            ("/crochet-store", "2024-05-01T08:01:00Z"),
            ("/", "2024-05-01T08:02:00Z"),
            ("/contact", "2024-05-01T08:03:00Z"),
        ] {
            insert_entity(&store, &page_view(name, at)).await.unwrap();
        }

        let snap = load_snapshot(&store, &options_at("2024-05-01T12:00:00Z")).await;

        assert!(snap.is_complete());
        assert_eq!(snap.total_visits, 7);
        assert_eq!(snap.total_page_views, 4);
        assert_eq!(snap.today_visits, 4);
        assert_eq!(snap.visits_by_device, DeviceCounts { desktop: 4, mobile: 2, tablet: 1 });
        assert_eq!(snap.device_percentages.desktop, 57.1);
        let names: Vec<&str> = snap.popular_pages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["/", "/crochet-store", "/contact"]);
        assert_eq!(snap.recent_visits.len(), 7);
        assert_eq!(snap.recent_visits[0].timestamp, ts("2024-05-01T11:00:00Z"));
        assert!(snap.recent_orders.is_empty());
    }

    #[tokio::test]
    async fn test_today_respects_local_midnight() {
        let store = InMemoryStore::new();
        insert_entity(&store, &visit(DeviceType::Mobile, "2024-04-30T18:29:59Z")).await.unwrap();
        insert_entity(&store, &visit(DeviceType::Mobile, "2024-04-30T18:30:00Z")).await.unwrap();

        let snap = load_snapshot(&store, &options_at("2024-05-01T09:00:00+05:30")).await;
        assert_eq!(snap.today_visits, 1);
    }

    #[tokio::test]
    async fn test_recent_lists_are_newest_first_and_limited() {
        let store = InMemoryStore::new();
        for day in 1..=12 {
            let at = format!("2024-05-{:02}T10:00:00Z", day);
            insert_entity(&store, &visit(DeviceType::Desktop, &at)).await.unwrap();
            insert_entity(&store, &order(&format!("Customer{}", day), &at)).await.unwrap();
        }

        let snap = load_snapshot(&store, &options_at("2024-05-12T12:00:00Z")).await;
        assert_eq!(snap.recent_visits.len(), 10);
        assert_eq!(snap.recent_orders.len(), 10);
        assert_eq!(snap.recent_orders[0].customer_name, "Customer12");
        assert_eq!(snap.recent_orders[9].customer_name, "Customer3");
        assert!(snap
            .recent_visits
            .windows(2)
            .all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_popular_pages_window_keeps_most_recent() {
        let store = InMemoryStore::new();
        for (name, at) in [
            ("/old", "2024-05-01T08:00:00Z"),
            ("/old", "2024-05-01T08:01:00Z"),
            ("/old", "2024-05-01T08:02:00Z"),
            ("/new", "2024-05-01T09:00:00Z"),
            ("/contact", "2024-05-01T09:01:00Z"),
        ] {
            insert_entity(&store, &page_view(name, at)).await.unwrap();
        }

        let mut options = options_at("2024-05-01T12:00:00Z");
        options.popular_pages_window = Some(2);
        let snap = load_snapshot(&store, &options).await;
        let names: Vec<&str> = snap.popular_pages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["/new", "/contact"]);
    }

    #[tokio::test]
    async fn test_failed_section_does_not_block_others() {
        let store = FaultyStore::new(&[Collection::PageViews]);
        insert_entity(&store.inner, &visit(DeviceType::Tablet, "2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        insert_entity(&store.inner, &page_view("/", "2024-05-01T10:00:00Z"))
            .await
            .unwrap();

        let snap = load_snapshot(&store, &options_at("2024-05-01T12:00:00Z")).await;

        assert!(!snap.is_complete());
        assert_eq!(
            snap.failed,
            vec![SnapshotSection::TotalPageViews, SnapshotSection::PopularPages]
        );
        assert_eq!(snap.total_page_views, 0);
        assert!(snap.popular_pages.is_empty());
        assert_eq!(snap.total_visits, 1);
        assert_eq!(snap.today_visits, 1);
        assert_eq!(snap.visits_by_device.tablet, 1);
        assert_eq!(snap.device_percentages.tablet, 100.0);
        assert_eq!(snap.recent_visits.len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_orders_fail_only_their_section() {
        let store = InMemoryStore::new();
        store
            .insert(
                Collection::Orders,
                serde_json::json!({"created_at": "2024-05-01T10:00:00.000Z"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .await
            .unwrap();
        insert_entity(&store, &visit(DeviceType::Mobile, "2024-05-01T10:00:00Z")).await.unwrap();

        let snap = load_snapshot(&store, &options_at("2024-05-01T12:00:00Z")).await;
        assert_eq!(snap.failed, vec![SnapshotSection::RecentOrders]);
        assert_eq!(snap.total_visits, 1);
    }
}
