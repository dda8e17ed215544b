//! src/db_adapter.rs
//! Database adapter layer: row extraction into plain structs and the
//! transactional write helpers used by submission and settlement.

use crate::error::{EngineError, EngineResult};
use crate::lifecycle::EventStatus;
use crate::scoring_core::RankedEntry;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::Row;

/// Event row as settlement and the lock gate see it.
#[derive(Debug)]
pub struct EventRow {
    pub id: i32,
    pub name: String,
    pub status: EventStatus,
    pub lock_time: DateTime<Utc>,
}

/// One prediction joined with its owner's rating state at load time.
#[derive(Debug)]
pub struct PredictionRow {
    pub id: i32,
    pub user_id: i32,
    pub event_id: i32,
    pub username: String,
    pub entries: Vec<RankedEntry>,
    pub rating: i32,
    pub prediction_count: i32,
}

/// Extraction helpers shared by the transactional code paths.
pub struct DbAdapter;

impl DbAdapter {
    pub fn extract_event(row: &sqlx::postgres::PgRow) -> EngineResult<EventRow> {
        let status_str: String = row.try_get("status")?;
        let status = EventStatus::from_str(&status_str).map_err(EngineError::Internal)?;

        Ok(EventRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            status,
            lock_time: row.try_get("lock_time")?,
        })
    }

    pub fn extract_prediction(row: &sqlx::postgres::PgRow) -> EngineResult<PredictionRow> {
        let Json(entries): Json<Vec<RankedEntry>> = row.try_get("entries")?;

        Ok(PredictionRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            event_id: row.try_get("event_id")?,
            username: row.try_get("username")?,
            entries,
            rating: row.try_get("rating")?,
            prediction_count: row.try_get("prediction_count")?,
        })
    }
}

/// Transactional write operations.
impl DbAdapter {
    /// Insert a new prediction. A duplicate (user, event) pair is reported
    /// as the submission policy fault, not a raw constraint error.
    pub async fn insert_prediction(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: i32,
        event_id: i32,
        entries: &[RankedEntry],
    ) -> EngineResult<i32> {
        let row = sqlx::query(
            "INSERT INTO predictions (user_id, event_id, entries)
             VALUES ($1, $2, $3)
             RETURNING id",
        )
        .bind(user_id)
        .bind(event_id)
        .bind(Json(entries))
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            if EngineError::is_unique_violation(&e) {
                EngineError::AlreadySubmitted
            } else {
                EngineError::Database(e)
            }
        })?;

        Ok(row.try_get("id")?)
    }

    /// Rewrite a prediction's ordering before lock.
    pub async fn update_prediction_entries(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        prediction_id: i32,
        entries: &[RankedEntry],
    ) -> EngineResult<()> {
        sqlx::query(
            "UPDATE predictions SET entries = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(Json(entries))
        .bind(prediction_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn increment_prediction_count(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: i32,
    ) -> EngineResult<()> {
        sqlx::query(
            "UPDATE users SET prediction_count = prediction_count + 1, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Attach the official result to an event. The UNIQUE key on event_id is
    /// the backstop against a concurrent second settlement; tripping it is
    /// reported as the settlement policy fault.
    pub async fn insert_official_result(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event_id: i32,
        entries: &[RankedEntry],
        fastest_lap: Option<&str>,
        dnfs: Option<&[String]>,
        sprint_entries: Option<&[RankedEntry]>,
    ) -> EngineResult<i32> {
        let row = sqlx::query(
            "INSERT INTO official_results (event_id, entries, fastest_lap, dnfs, sprint_entries)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(event_id)
        .bind(Json(entries))
        .bind(fastest_lap)
        .bind(dnfs.map(Json))
        .bind(sprint_entries.map(Json))
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            if EngineError::is_unique_violation(&e) {
                EngineError::AlreadySettled
            } else {
                EngineError::Database(e)
            }
        })?;

        Ok(row.try_get("id")?)
    }

    /// First and only write of a prediction's settlement fields.
    pub async fn write_prediction_settlement(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        prediction_id: i32,
        rating_delta: i32,
        score: i32,
        breakdown: &serde_json::Value,
    ) -> EngineResult<()> {
        sqlx::query(
            "UPDATE predictions SET rating_delta = $1, score = $2, breakdown = $3
             WHERE id = $4",
        )
        .bind(rating_delta)
        .bind(score)
        .bind(breakdown)
        .bind(prediction_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Write the clamped rating and fold the score into the accumulator.
    /// total_score is incremented in SQL, never computed from a prior read.
    pub async fn apply_user_settlement(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: i32,
        new_rating: i32,
        score: i32,
    ) -> EngineResult<()> {
        sqlx::query(
            "UPDATE users SET rating = $1, total_score = total_score + $2, updated_at = NOW()
             WHERE id = $3",
        )
        .bind(new_rating)
        .bind(i64::from(score))
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Terminal lifecycle transition.
    pub async fn mark_event_settled(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event_id: i32,
    ) -> EngineResult<()> {
        sqlx::query("UPDATE events SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(EventStatus::Settled.as_str())
            .bind(event_id)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }
}
