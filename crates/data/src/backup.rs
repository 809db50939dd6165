//! Store backup and retention.
//!
//! Copies the primary store into a dated snapshot, enforces a daily/weekly
//! retention policy over the snapshot directory, and prunes old OHLCV and
//! ratio rows from the primary store.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use binance_feed_core::CandleInterval;
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use tokio::sync::watch;

use crate::db::Database;
use crate::repositories::{CandleRepository, RatioRepository};

const BACKUP_PREFIX: &str = "binance_data_";
const BACKUP_SUFFIX: &str = ".sqlite";
const SINGLE_FILE_NAME: &str = "binance_data_latest.sqlite";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Rows older than this are pruned from the primary store on each run.
const PRUNE_HORIZON: chrono::Duration = chrono::Duration::days(7);

/// Backup behaviour knobs.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Directory receiving snapshot files.
    pub target_dir: PathBuf,
    /// Time between runs.
    pub interval: Duration,
    /// Overwrite one fixed file instead of dated snapshots.
    pub single_file: bool,
    /// Keep every snapshot newer than this many days.
    pub daily_days: u32,
    /// Beyond the daily band, keep one snapshot per ISO week for this many
    /// weeks.
    pub weekly_weeks: u32,
}

/// Periodic snapshot + retention scheduler.
pub struct BackupScheduler {
    db: Database,
    config: BackupConfig,
    in_flight: AtomicBool,
}

impl BackupScheduler {
    #[must_use]
    pub fn new(db: Database, config: BackupConfig) -> Self {
        Self {
            db,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Runs immediately, then on every interval tick until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.run_once().await {
                tracing::error!("backup run failed: {e:#}");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("backup scheduler stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One snapshot + retention + prune pass. Skipped when a previous run is
    /// still in flight.
    ///
    /// # Errors
    /// Returns an error when the copy or retention enforcement fails.
    pub async fn run_once(&self) -> Result<()> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::warn!("backup still in flight, skipping run");
            return Ok(());
        }
        let result = self.run_inner().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self) -> Result<()> {
        let source = self.db.path();
        tokio::fs::metadata(source)
            .await
            .with_context(|| format!("backup source unreadable: {}", source.display()))?;
        tokio::fs::create_dir_all(&self.config.target_dir)
            .await
            .with_context(|| {
                format!("creating backup dir {}", self.config.target_dir.display())
            })?;

        let now = Utc::now();
        let file_name = if self.config.single_file {
            SINGLE_FILE_NAME.to_string()
        } else {
            format!(
                "{BACKUP_PREFIX}{}{BACKUP_SUFFIX}",
                now.format(TIMESTAMP_FORMAT)
            )
        };
        let target = self.config.target_dir.join(&file_name);

        tokio::fs::copy(source, &target)
            .await
            .with_context(|| format!("copying store to {}", target.display()))?;

        let size = tokio::fs::metadata(&target).await?.len();
        tracing::info!(file = %file_name, size_bytes = size, "backup written");

        if !self.config.single_file {
            self.enforce_retention(now).await?;
        }
        self.prune_primary(now).await?;

        Ok(())
    }

    async fn enforce_retention(&self, now: DateTime<Utc>) -> Result<()> {
        let mut snapshots = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.target_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(ts) = parse_backup_timestamp(&name) {
                snapshots.push((name, ts));
            }
        }

        let doomed = plan_retention(
            &snapshots,
            now,
            self.config.daily_days,
            self.config.weekly_weeks,
        );
        for name in doomed {
            let path = self.config.target_dir.join(&name);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(file = %name, "failed to delete expired backup: {e}");
            } else {
                tracing::info!(file = %name, "deleted expired backup");
            }
        }
        Ok(())
    }

    async fn prune_primary(&self, now: DateTime<Utc>) -> Result<()> {
        let cutoff = (now - PRUNE_HORIZON).timestamp_millis();

        let candles = CandleRepository::new(self.db.clone());
        let mut removed = 0;
        for interval in CandleInterval::ALL {
            removed += candles.prune_before(interval, cutoff).await?;
        }

        let ratios = RatioRepository::new(self.db.clone());
        removed += ratios.prune_before(cutoff).await?;

        if removed > 0 {
            tracing::info!(rows = removed, "pruned expired primary-store rows");
        }
        Ok(())
    }
}

/// Extracts the UTC timestamp from a dated snapshot name.
#[must_use]
pub fn parse_backup_timestamp(file_name: &str) -> Option<DateTime<Utc>> {
    let ts = file_name
        .strip_prefix(BACKUP_PREFIX)?
        .strip_suffix(BACKUP_SUFFIX)?;
    let naive = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Decides which snapshots to delete.
///
/// Keeps every file newer than `now - daily_days`; in the band back to
/// `now - weekly_weeks * 7d` keeps the newest file of each ISO week; deletes
/// everything older.
#[must_use]
pub fn plan_retention(
    files: &[(String, DateTime<Utc>)],
    now: DateTime<Utc>,
    daily_days: u32,
    weekly_weeks: u32,
) -> Vec<String> {
    let daily_cutoff = now - chrono::Duration::days(i64::from(daily_days));
    let weekly_cutoff = now - chrono::Duration::weeks(i64::from(weekly_weeks));

    // Newest snapshot per ISO week within the weekly band.
    let mut weekly_keep: std::collections::HashMap<(i32, u32), &(String, DateTime<Utc>)> =
        std::collections::HashMap::new();
    for file in files {
        let ts = file.1;
        if ts <= daily_cutoff && ts >= weekly_cutoff {
            let week = ts.iso_week();
            let slot = weekly_keep.entry((week.year(), week.week())).or_insert(file);
            if ts > slot.1 {
                *slot = file;
            }
        }
    }

    files
        .iter()
        .filter(|(name, ts)| {
            if *ts > daily_cutoff {
                return false;
            }
            if *ts < weekly_cutoff {
                return true;
            }
            let week = ts.iso_week();
            weekly_keep
                .get(&(week.year(), week.week()))
                .map_or(true, |kept| kept.0 != *name)
        })
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
        Utc.from_utc_datetime(&naive)
    }

    fn file(ts_str: &str) -> (String, DateTime<Utc>) {
        let t = ts(ts_str);
        (
            format!("{BACKUP_PREFIX}{}{BACKUP_SUFFIX}", t.format(TIMESTAMP_FORMAT)),
            t,
        )
    }

    // =========================================================================
    // Timestamp parsing
    // =========================================================================

    #[test]
    fn test_parse_backup_timestamp() {
        let parsed = parse_backup_timestamp("binance_data_20250115T030000Z.sqlite").unwrap();
        assert_eq!(parsed, ts("2025-01-15 03:00:00"));
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        assert!(parse_backup_timestamp("binance.db").is_none());
        assert!(parse_backup_timestamp("binance_data_garbage.sqlite").is_none());
        assert!(parse_backup_timestamp("binance_data_latest.sqlite").is_none());
    }

    #[test]
    fn test_timestamps_order_lexicographically() {
        let a = ts("2025-01-15 03:00:00").format(TIMESTAMP_FORMAT).to_string();
        let b = ts("2025-01-15 04:00:00").format(TIMESTAMP_FORMAT).to_string();
        let c = ts("2025-02-01 00:00:00").format(TIMESTAMP_FORMAT).to_string();
        assert!(a < b && b < c);
    }

    // =========================================================================
    // Retention planning
    // =========================================================================

    #[test]
    fn test_retention_keeps_recent_files() {
        let now = ts("2025-03-01 12:00:00");
        let files = vec![
            file("2025-03-01 03:00:00"),
            file("2025-02-28 03:00:00"),
            file("2025-02-24 03:00:00"),
        ];

        // All within 7 days.
        let doomed = plan_retention(&files, now, 7, 1);
        assert!(doomed.is_empty());
    }

    #[test]
    fn test_retention_deletes_beyond_weekly_horizon() {
        let now = ts("2025-03-01 12:00:00");
        let old = file("2025-02-01 03:00:00");
        let files = vec![file("2025-03-01 03:00:00"), old.clone()];

        let doomed = plan_retention(&files, now, 7, 1);
        assert_eq!(doomed, vec![old.0]);
    }

    #[test]
    fn test_retention_keeps_newest_per_iso_week_in_band() {
        // 30-day daily band, 12-week weekly band.
        let now = ts("2025-03-31 12:00:00");
        let keep_week_a = file("2025-02-20 03:00:00"); // newest of its week
        let drop_week_a = file("2025-02-18 03:00:00");
        let keep_week_b = file("2025-02-13 03:00:00");
        let recent = file("2025-03-30 03:00:00");

        let files = vec![
            recent.clone(),
            drop_week_a.clone(),
            keep_week_a.clone(),
            keep_week_b.clone(),
        ];
        let doomed = plan_retention(&files, now, 30, 12);

        assert_eq!(doomed, vec![drop_week_a.0]);
    }

    #[test]
    fn test_retention_age_buckets_hold() {
        let now = ts("2025-03-31 12:00:00");
        let daily_days = 7;
        let weekly_weeks = 4;

        let files = vec![
            file("2025-03-31 03:00:00"), // daily band
            file("2025-03-28 03:00:00"), // daily band
            file("2025-03-20 03:00:00"), // weekly band, week 12
            file("2025-03-19 03:00:00"), // weekly band, week 12 (older)
            file("2025-03-12 03:00:00"), // weekly band, week 11
            file("2025-02-01 03:00:00"), // beyond weekly horizon
        ];

        let doomed = plan_retention(&files, now, daily_days, weekly_weeks);
        let daily_cutoff = now - chrono::Duration::days(i64::from(daily_days));
        let weekly_cutoff = now - chrono::Duration::weeks(i64::from(weekly_weeks));

        for (name, ts) in &files {
            let deleted = doomed.contains(name);
            if *ts > daily_cutoff {
                assert!(!deleted, "{name} in daily band must survive");
            } else if *ts < weekly_cutoff {
                assert!(deleted, "{name} beyond weekly horizon must be deleted");
            }
        }
        // Exactly one survivor per ISO week in the weekly band.
        assert!(doomed.contains(&files[3].0));
        assert!(!doomed.contains(&files[2].0));
        assert!(!doomed.contains(&files[4].0));
    }

    // =========================================================================
    // Scheduler runs
    // =========================================================================

    #[tokio::test]
    async fn test_run_once_writes_snapshot_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("primary.db")).await.unwrap();

        // Seed an old candle that the prune pass must remove.
        let candles = CandleRepository::new(db.clone());
        candles
            .insert_batch(
                CandleInterval::OneMinute,
                &[crate::models::CandleRecord {
                    symbol: "BTCUSDT".to_string(),
                    open_time: 1_000,
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: 1.0,
                    quote_volume: 1.0,
                    trade_count: 1,
                    close_time: 1_059,
                }],
            )
            .await
            .unwrap();

        let backup_dir = dir.path().join("backups");
        let scheduler = BackupScheduler::new(
            db.clone(),
            BackupConfig {
                target_dir: backup_dir.clone(),
                interval: Duration::from_secs(3600),
                single_file: false,
                daily_days: 7,
                weekly_weeks: 1,
            },
        );

        scheduler.run_once().await.unwrap();

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&backup_dir).unwrap() {
            names.push(entry.unwrap().file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names.len(), 1);
        assert!(parse_backup_timestamp(&names[0]).is_some());

        // The 1970-era candle is far beyond the prune horizon.
        let remaining = candles
            .get_range(CandleInterval::OneMinute, "BTCUSDT", 0, i64::MAX)
            .await
            .unwrap();
        assert!(remaining.is_empty());

        db.close().await;
    }

    #[tokio::test]
    async fn test_single_file_mode_overwrites_fixed_name() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("primary.db")).await.unwrap();
        let backup_dir = dir.path().join("backups");

        let scheduler = BackupScheduler::new(
            db.clone(),
            BackupConfig {
                target_dir: backup_dir.clone(),
                interval: Duration::from_secs(3600),
                single_file: true,
                daily_days: 7,
                weekly_weeks: 1,
            },
        );

        scheduler.run_once().await.unwrap();
        scheduler.run_once().await.unwrap();

        let names: Vec<_> = std::fs::read_dir(&backup_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![SINGLE_FILE_NAME.to_string()]);

        db.close().await;
    }
}
