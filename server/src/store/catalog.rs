use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::{HighlightRange, MatchRecord};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CatalogedMatch {
    pub id: i64,
    pub match_uuid: String,
    pub recorded_at: DateTime<Utc>,
    pub video_path: Option<String>,
    pub log_path: String,
    pub duration_seconds: f64,
    pub total_kills: i64,
    pub total_rounds: i64,
    pub processed: bool,
    pub highlights_generated: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CatalogedHighlight {
    pub id: i64,
    pub match_id: i64,
    pub clip_path: String,
    pub start_time: f64,
    pub end_time: f64,
    pub label: String,
    pub priority: i64,
}

/// Match history and generated clips, kept in SQLite.
#[derive(Clone)]
pub struct MatchCatalog {
    pool: SqlitePool,
}

impl MatchCatalog {
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open match catalog {}", path.display()))?;
        Self::migrate(pool).await
    }

    /// Private in-memory catalog; everything is lost when it is dropped.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("Invalid in-memory SQLite options")?
            .foreign_keys(true);
        // Each connection to :memory: is its own database, so hold exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory match catalog")?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run match catalog migrations")?;
        Ok(MatchCatalog { pool })
    }

    /// Insert or refresh the catalog row for a match record. Returns the row id.
    pub async fn record_match(&self, record: &MatchRecord, log_path: &Path) -> Result<i64> {
        let summary = record.summary();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO matches (match_uuid, recorded_at, video_path, log_path, duration_seconds, total_kills, total_rounds)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(match_uuid) DO UPDATE SET
                video_path = COALESCE(excluded.video_path, matches.video_path),
                log_path = excluded.log_path,
                duration_seconds = excluded.duration_seconds,
                total_kills = excluded.total_kills,
                total_rounds = excluded.total_rounds
            RETURNING id
            "#,
        )
        .bind(record.match_id.to_string())
        .bind(common::util::now())
        .bind(record.video_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(log_path.to_string_lossy().into_owned())
        .bind(summary.duration_seconds)
        .bind(summary.total_kills as i64)
        .bind(summary.total_rounds as i64)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to catalog match {}", record.match_id))?;

        info!(
            "Cataloged match #{} ({} kills, {} rounds, {:.1}s)",
            id, summary.total_kills, summary.total_rounds, summary.duration_seconds
        );
        Ok(id)
    }

    pub async fn record_highlight(&self, match_id: i64, clip_path: &Path, range: &HighlightRange) -> Result<i64> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO highlights (match_id, clip_path, start_time, end_time, label, priority, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(match_id)
        .bind(clip_path.to_string_lossy().into_owned())
        .bind(range.start)
        .bind(range.end)
        .bind(&range.label)
        .bind(range.priority as i64)
        .bind(common::util::now())
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("Failed to record highlight for match #{}", match_id))?;

        sqlx::query("UPDATE matches SET highlights_generated = highlights_generated + 1 WHERE id = ?")
            .bind(match_id)
            .execute(&mut *tx)
            .await
            .context("Failed to bump highlight count")?;

        tx.commit().await.context("Failed to commit highlight")?;
        Ok(id)
    }

    pub async fn mark_processed(&self, match_id: i64) -> Result<()> {
        sqlx::query("UPDATE matches SET processed = 1 WHERE id = ?")
            .bind(match_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to mark match #{} processed", match_id))?;
        Ok(())
    }

    /// Most recently cataloged match.
    pub async fn last_match(&self) -> Result<Option<CatalogedMatch>> {
        sqlx::query_as::<_, CatalogedMatch>(
            r#"
            SELECT id, match_uuid, recorded_at, video_path, log_path, duration_seconds,
                   total_kills, total_rounds, processed, highlights_generated
            FROM matches
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query last match")
    }

    pub async fn highlights_for(&self, match_id: i64) -> Result<Vec<CatalogedHighlight>> {
        sqlx::query_as::<_, CatalogedHighlight>(
            r#"
            SELECT id, match_id, clip_path, start_time, end_time, label, priority
            FROM highlights
            WHERE match_id = ?
            ORDER BY start_time
            "#,
        )
        .bind(match_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load highlights for match #{}", match_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Detection, EventKind, EventLog, PhaseScope, TimeBase};
    use std::path::PathBuf;

    fn record(kills: u64) -> MatchRecord {
        let reference = common::util::now();
        let time_base = TimeBase::with_reference(reference);
        let mut log = EventLog::new();
        log.append(
            Detection {
                detected_at: reference,
                round: 1,
                kind: EventKind::PhaseChange { scope: PhaseScope::Map, phase: "live".to_string() },
            }
            .stamp(&time_base),
        );
        for k in 1..=kills {
            log.append(
                Detection {
                    detected_at: reference + chrono::Duration::seconds(30 * k as i64),
                    round: k as u32,
                    kind: EventKind::Kill {
                        weapon: "weapon_awp".to_string(),
                        headshot: false,
                        health: 100,
                        total_kills: k,
                    },
                }
                .stamp(&time_base),
            );
        }
        log.close(Some(reference), Some(PathBuf::from("/videos/match.mkv")))
    }

    #[tokio::test]
    async fn test_record_and_fetch_last_match() {
        let catalog = MatchCatalog::open_in_memory().await.unwrap();
        assert!(catalog.last_match().await.unwrap().is_none());

        let first = catalog.record_match(&record(2), Path::new("logs/a.json")).await.unwrap();
        let second_record = record(3);
        let second = catalog.record_match(&second_record, Path::new("logs/b.json")).await.unwrap();
        assert_ne!(first, second);

        let last = catalog.last_match().await.unwrap().unwrap();
        assert_eq!(last.id, second);
        assert_eq!(last.match_uuid, second_record.match_id.to_string());
        assert_eq!(last.total_kills, 3);
        assert_eq!(last.total_rounds, 3);
        assert!((last.duration_seconds - 90.0).abs() < 1e-6);
        assert_eq!(last.video_path.as_deref(), Some("/videos/match.mkv"));
        assert!(!last.processed);
    }

    #[tokio::test]
    async fn test_record_match_is_idempotent() {
        let catalog = MatchCatalog::open_in_memory().await.unwrap();
        let record = record(1);
        let id = catalog.record_match(&record, Path::new("logs/a.json")).await.unwrap();
        let again = catalog.record_match(&record, Path::new("logs/a2.json")).await.unwrap();
        assert_eq!(id, again);
        assert_eq!(catalog.last_match().await.unwrap().unwrap().log_path, "logs/a2.json");
    }

    #[tokio::test]
    async fn test_highlights_and_processed_flag() {
        let catalog = MatchCatalog::open_in_memory().await.unwrap();
        let id = catalog.record_match(&record(2), Path::new("logs/a.json")).await.unwrap();

        let range = HighlightRange { start: 28.0, end: 36.5, label: "awp flick".to_string(), priority: 8 };
        catalog.record_highlight(id, Path::new("highlights/clip_1.mp4"), &range).await.unwrap();
        catalog.mark_processed(id).await.unwrap();

        let last = catalog.last_match().await.unwrap().unwrap();
        assert!(last.processed);
        assert_eq!(last.highlights_generated, 1);

        let highlights = catalog.highlights_for(id).await.unwrap();
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].label, "awp flick");
        assert_eq!(highlights[0].priority, 8);
    }

    #[tokio::test]
    async fn test_open_file_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matches.db");
        let catalog = MatchCatalog::open(&path).await.unwrap();
        catalog.record_match(&record(0), Path::new("logs/a.json")).await.unwrap();
        drop(catalog);

        let reopened = MatchCatalog::open(&path).await.unwrap();
        assert_eq!(reopened.last_match().await.unwrap().unwrap().total_kills, 0);
    }
}
