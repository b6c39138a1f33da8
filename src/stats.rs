//! Terminal dashboard.
//!
//! `stitch stats` loads one analytics snapshot from the local database and
//! prints it; `stitch watch` re-loads it on a fixed interval until Ctrl+C.
//! Sections that failed to load are listed at the bottom and shown with
//! zero values, the same way the web dashboard degrades.

use std::fmt::Write as _;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use stitchboard_core::models::DeviceType;
use stitchboard_core::snapshot::{load_snapshot, Snapshot};

use crate::config::Config;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

/// Run the stats command: load a snapshot and print it once.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    let store = SqliteStore::new(pool);

    let snapshot = load_snapshot(&store, &config.analytics.snapshot_options(&Local::now())).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{}", render(&snapshot, config, Utc::now()));
    }

    store.pool().close().await;
    Ok(())
}

/// Reload and print the snapshot every `interval` until interrupted.
///
/// The interval defaults to `[analytics].refresh_interval_secs`.
pub async fn run_watch(config: &Config, interval: Option<u64>) -> Result<()> {
    let secs = interval.unwrap_or(config.analytics.refresh_interval_secs).max(1);
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    let store = SqliteStore::new(pool);

    let mut ticker = tokio::time::interval(Duration::from_secs(secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let options = config.analytics.snapshot_options(&Local::now());
                let snapshot = load_snapshot(&store, &options).await;
                // Clear the screen and home the cursor between refreshes.
                print!("\x1B[2J\x1B[H");
                print!("{}", render(&snapshot, config, Utc::now()));
                println!("  Refreshing every {}s. Press Ctrl+C to stop.", secs);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    store.pool().close().await;
    Ok(())
}

/// Render a snapshot as the text dashboard.
pub fn render(snapshot: &Snapshot, config: &Config, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Stitchboard Analytics");
    let _ = writeln!(out, "=====================");
    let _ = writeln!(out);
    let _ = writeln!(out, "  Database:     {}", config.db.path.display());
    let _ = writeln!(out, "  Generated:    {}", format_local(snapshot.generated_at));
    let _ = writeln!(out);
    let _ = writeln!(out, "  Total visits:     {}", snapshot.total_visits);
    let _ = writeln!(out, "  Today's visits:   {}", snapshot.today_visits);
    let _ = writeln!(out, "  Page views:       {}", snapshot.total_page_views);

    let _ = writeln!(out);
    let _ = writeln!(out, "  Devices:");
    for device in DeviceType::ALL {
        let pct = match device {
            DeviceType::Desktop => snapshot.device_percentages.desktop,
            DeviceType::Mobile => snapshot.device_percentages.mobile,
            DeviceType::Tablet => snapshot.device_percentages.tablet,
        };
        let _ = writeln!(
            out,
            "  {:<10} {:>6}  {:>5.1}%",
            device.as_str(),
            snapshot.visits_by_device.get(device),
            pct
        );
    }

    if !snapshot.popular_pages.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  Popular pages:");
        let _ = writeln!(out, "  {:<32} {:>6}", "PAGE", "VIEWS");
        let _ = writeln!(out, "  {}", "-".repeat(39));
        for page in &snapshot.popular_pages {
            let _ = writeln!(out, "  {:<32} {:>6}", truncate(&page.name, 32), page.count);
        }
    }

    if !snapshot.recent_visits.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  Recent visits:");
        let _ = writeln!(
            out,
            "  {:<8} {:<18} {:<24} {}",
            "DEVICE", "BROWSER", "REFERRER", "WHEN"
        );
        let _ = writeln!(out, "  {}", "-".repeat(76));
        for visit in &snapshot.recent_visits {
            let _ = writeln!(
                out,
                "  {:<8} {:<18} {:<24} {}",
                visit.device_type.as_str(),
                visit.browser.display_name(),
                truncate(&visit.referrer, 24),
                format_relative(visit.timestamp, now)
            );
        }
    }

    if !snapshot.recent_orders.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  Recent orders:");
        let _ = writeln!(
            out,
            "  {:<20} {:<24} {:<10} {}",
            "CUSTOMER", "PRODUCT", "STATUS", "WHEN"
        );
        let _ = writeln!(out, "  {}", "-".repeat(76));
        for order in &snapshot.recent_orders {
            let _ = writeln!(
                out,
                "  {:<20} {:<24} {:<10} {}",
                truncate(&order.customer_name, 20),
                truncate(&order.product_name, 24),
                order.status,
                format_relative(order.created_at, now)
            );
        }
    }

    if !snapshot.failed.is_empty() {
        let names: Vec<&str> = snapshot.failed.iter().map(|s| s.as_str()).collect();
        let _ = writeln!(out);
        let _ = writeln!(out, "  Unavailable: {}", names.join(", "));
    }

    let _ = writeln!(out);
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max.saturating_sub(1)).collect();
        t.push('…');
        t
    }
}

fn format_local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Format a timestamp relative to `now` (e.g. "3 hours ago").
fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return format_local(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_local(ts)
    }
}
