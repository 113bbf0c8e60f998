//! Record Store - SQLite persistence for metric and risk records
//!
//! Schema:
//! - metric_records: one row per (entity, producer, analysis_day), payload and
//!   quality as JSON, confidence tier and multiplier as plain columns
//! - risk_records: one row per (entity, analysis_day), the full record as JSON
//!   with tier, category and impact columns for ranking queries
//! - schema_version: applied schema revision
//!
//! Writes are upserts on the natural key, so re-running a producer for the
//! same day replaces its row instead of adding another.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::quality::QualityAssessment;
use crate::record::{MetricRecord, ProducerKind, ProducerPayload};
use crate::risk::RiskRecord;

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS metric_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity TEXT NOT NULL,
    producer TEXT NOT NULL,
    analysis_day TEXT NOT NULL,
    created_at TEXT NOT NULL,
    confidence_tier TEXT NOT NULL,
    confidence_multiplier REAL NOT NULL,
    quality_json TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    UNIQUE(entity, producer, analysis_day)
);

CREATE INDEX IF NOT EXISTS idx_metric_entity_producer
    ON metric_records(entity, producer, analysis_day);

CREATE TABLE IF NOT EXISTS risk_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity TEXT NOT NULL,
    analysis_day TEXT NOT NULL,
    created_at TEXT NOT NULL,
    tier TEXT NOT NULL,
    category TEXT NOT NULL,
    business_impact REAL NOT NULL,
    overall_confidence REAL NOT NULL,
    record_json TEXT NOT NULL,
    UNIQUE(entity, analysis_day)
);

CREATE INDEX IF NOT EXISTS idx_risk_day_impact
    ON risk_records(analysis_day, business_impact);
"#;

/// SQLite-backed record store
pub struct MetricStore {
    conn: Connection,
}

impl MetricStore {
    /// Open or create a store file (parent directories are created)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn };
        store.init_schema()?;
        debug!("Opened record store at {}", path.display());
        Ok(store)
    }

    /// In-memory store for tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64> {
        let version = self
            .conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get::<_, i64>(0)
            })?;
        Ok(version)
    }

    // ========================================================================
    // Metric records
    // ========================================================================

    /// Insert or replace the record for (entity, producer, analysis_day)
    pub fn upsert_metric(&self, record: &MetricRecord) -> Result<()> {
        let quality_json = serde_json::to_string(&record.quality)?;
        let payload_json = serde_json::to_string(&record.payload)?;
        self.conn.execute(
            "INSERT INTO metric_records
                (entity, producer, analysis_day, created_at, confidence_tier,
                 confidence_multiplier, quality_json, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(entity, producer, analysis_day) DO UPDATE SET
                created_at = excluded.created_at,
                confidence_tier = excluded.confidence_tier,
                confidence_multiplier = excluded.confidence_multiplier,
                quality_json = excluded.quality_json,
                payload_json = excluded.payload_json",
            params![
                record.entity,
                record.producer().as_str(),
                record.analysis_day,
                record.created_at,
                record.quality.confidence_tier.label(),
                record.quality.confidence_multiplier,
                quality_json,
                payload_json,
            ],
        )?;
        Ok(())
    }

    /// Most recent record for one entity and producer
    pub fn latest_metric(&self, entity: &str, producer: ProducerKind) -> Result<Option<MetricRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT entity, analysis_day, created_at, quality_json, payload_json
                 FROM metric_records
                 WHERE entity = ?1 AND producer = ?2
                 ORDER BY analysis_day DESC, created_at DESC
                 LIMIT 1",
                params![entity, producer.as_str()],
                metric_row,
            )
            .optional()?;
        row.map(MetricRow::decode).transpose()
    }

    /// Most recent record that already existed at `as_of`
    pub fn latest_metric_as_of(
        &self,
        entity: &str,
        producer: ProducerKind,
        as_of: DateTime<Utc>,
    ) -> Result<Option<MetricRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT entity, analysis_day, created_at, quality_json, payload_json
                 FROM metric_records
                 WHERE entity = ?1 AND producer = ?2 AND created_at <= ?3
                 ORDER BY analysis_day DESC, created_at DESC
                 LIMIT 1",
                params![entity, producer.as_str(), as_of],
                metric_row,
            )
            .optional()?;
        row.map(MetricRow::decode).transpose()
    }

    pub fn metric_count(&self, entity: &str, producer: ProducerKind) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM metric_records WHERE entity = ?1 AND producer = ?2",
            params![entity, producer.as_str()],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(count.max(0) as usize)
    }

    // ========================================================================
    // Risk records
    // ========================================================================

    /// Insert or replace the risk record for (entity, analysis_day)
    pub fn upsert_risk(&self, record: &RiskRecord) -> Result<()> {
        let record_json = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT INTO risk_records
                (entity, analysis_day, created_at, tier, category,
                 business_impact, overall_confidence, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(entity, analysis_day) DO UPDATE SET
                created_at = excluded.created_at,
                tier = excluded.tier,
                category = excluded.category,
                business_impact = excluded.business_impact,
                overall_confidence = excluded.overall_confidence,
                record_json = excluded.record_json",
            params![
                record.entity,
                record.analysis_day,
                record.created_at,
                record.tier.label(),
                record.category.label(),
                record.business_impact,
                record.overall_confidence,
                record_json,
            ],
        )?;
        Ok(())
    }

    pub fn latest_risk(&self, entity: &str) -> Result<Option<RiskRecord>> {
        let json = self
            .conn
            .query_row(
                "SELECT record_json FROM risk_records
                 WHERE entity = ?1
                 ORDER BY analysis_day DESC, created_at DESC
                 LIMIT 1",
                params![entity],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// All risk records for one day, highest business impact first
    pub fn risk_records_for_day(&self, day: NaiveDate) -> Result<Vec<RiskRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_json FROM risk_records
             WHERE analysis_day = ?1
             ORDER BY business_impact DESC, entity ASC",
        )?;
        let rows = stmt.query_map(params![day], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for json in rows {
            records.push(serde_json::from_str(&json?)?);
        }
        Ok(records)
    }
}

struct MetricRow {
    entity: String,
    analysis_day: NaiveDate,
    created_at: DateTime<Utc>,
    quality_json: String,
    payload_json: String,
}

impl MetricRow {
    fn decode(self) -> Result<MetricRecord> {
        let quality: QualityAssessment = serde_json::from_str(&self.quality_json)?;
        let payload: ProducerPayload = serde_json::from_str(&self.payload_json)?;
        Ok(MetricRecord {
            entity: self.entity,
            analysis_day: self.analysis_day,
            created_at: self.created_at,
            quality,
            payload,
        })
    }
}

fn metric_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricRow> {
    Ok(MetricRow {
        entity: row.get(0)?,
        analysis_day: row.get(1)?,
        created_at: row.get(2)?,
        quality_json: row.get(3)?,
        payload_json: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efficiency::{EfficiencyReport, EfficiencyTrend};
    use crate::record::Grade;
    use chrono::{Duration, TimeZone};

    fn efficiency_record(entity: &str, created_at: DateTime<Utc>, score: f64) -> MetricRecord {
        let report = EfficiencyReport {
            samples_used: 20,
            mean_dedup_ratio: 2.8,
            mean_compression_ratio: 1.7,
            dedup_score: score,
            compression_score: score,
            trend: EfficiencyTrend::InsufficientData,
            trend_percentage: 0.0,
            trend_p_value: None,
            trend_score: 70.0,
            consistency_score: score,
            anomalies: 1,
            anomaly_score: 85.0,
            efficiency_score: score,
            grade: Grade::standard(score),
        };
        MetricRecord::new(
            entity,
            created_at,
            QualityAssessment::clean(20, 20.0),
            ProducerPayload::Efficiency(report),
        )
    }

    #[test]
    fn test_schema_version_recorded() {
        let store = MetricStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_metric_round_trip_and_missing() {
        let store = MetricStore::open_in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2026, 2, 10, 4, 30, 0).unwrap();
        let record = efficiency_record("JOB-A", t, 72.0);
        store.upsert_metric(&record).unwrap();

        let loaded = store
            .latest_metric("JOB-A", ProducerKind::Efficiency)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, record);
        assert!(store
            .latest_metric("JOB-A", ProducerKind::Health)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_latest_metric_prefers_newest_day() {
        let store = MetricStore::open_in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2026, 2, 10, 4, 30, 0).unwrap();
        store.upsert_metric(&efficiency_record("JOB-A", t + Duration::days(1), 60.0)).unwrap();
        store.upsert_metric(&efficiency_record("JOB-A", t, 90.0)).unwrap();

        let latest = store
            .latest_metric("JOB-A", ProducerKind::Efficiency)
            .unwrap()
            .unwrap();
        assert_eq!(latest.payload.headline_score(), Some(60.0));
        assert_eq!(store.metric_count("JOB-A", ProducerKind::Efficiency).unwrap(), 2);
    }

    #[test]
    fn test_latest_metric_as_of_skips_later_records() {
        let store = MetricStore::open_in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2026, 2, 10, 4, 30, 0).unwrap();
        store.upsert_metric(&efficiency_record("JOB-A", t, 90.0)).unwrap();
        store.upsert_metric(&efficiency_record("JOB-A", t + Duration::days(2), 60.0)).unwrap();

        let mid = store
            .latest_metric_as_of("JOB-A", ProducerKind::Efficiency, t + Duration::days(1))
            .unwrap()
            .unwrap();
        assert_eq!(mid.payload.headline_score(), Some(90.0));
        assert_eq!(mid.created_at, t);

        let exact = store
            .latest_metric_as_of("JOB-A", ProducerKind::Efficiency, t + Duration::days(2))
            .unwrap()
            .unwrap();
        assert_eq!(exact.payload.headline_score(), Some(60.0));

        assert!(store
            .latest_metric_as_of("JOB-A", ProducerKind::Efficiency, t - Duration::hours(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_same_day_upsert_replaces() {
        let store = MetricStore::open_in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2026, 2, 10, 4, 30, 0).unwrap();
        store.upsert_metric(&efficiency_record("JOB-A", t, 50.0)).unwrap();
        store.upsert_metric(&efficiency_record("JOB-A", t + Duration::hours(3), 55.0)).unwrap();

        assert_eq!(store.metric_count("JOB-A", ProducerKind::Efficiency).unwrap(), 1);
        let latest = store
            .latest_metric("JOB-A", ProducerKind::Efficiency)
            .unwrap()
            .unwrap();
        assert_eq!(latest.payload.headline_score(), Some(55.0));
    }
}
