//! src/settlement_api.rs
//! Submission gating and the settlement orchestrator.
//!
//! Every mutation runs inside a SERIALIZABLE transaction with bounded retry
//! on serialization conflicts, so settlements of different events touching
//! the same user never apply a stale rating read, and a settlement either
//! commits whole or leaves nothing behind.

use crate::config::Config;
use crate::db_adapter::{DbAdapter, EventRow, PredictionRow};
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::can_modify;
use crate::scoring_core::{
    apply_rating_delta, calculate_rating, evaluate_accuracy, validate_ordering, RankedEntry,
};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::{Executor, PgPool, Row};
use std::time::Duration as StdDuration;
use tokio::time::sleep;
use tracing::{info, warn};

// Configuration constants for concurrency control
const MAX_RETRY_ATTEMPTS: u32 = 5;
const BASE_RETRY_DELAY_MS: u64 = 10;

/// The authoritative classification for an event. Only `entries` is scored;
/// the auxiliary facts are stored and returned verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficialResult {
    pub entries: Vec<RankedEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fastest_lap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dnfs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprint_entries: Option<Vec<RankedEntry>>,
}

/// One user's rating movement from a settlement, in prediction-load order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRatingUpdate {
    pub user_id: i32,
    pub username: String,
    pub old_rating: i32,
    pub new_rating: i32,
    pub rating_delta: i32,
    pub score: i32,
}

/// Everything a settlement produced.
#[derive(Debug, Serialize)]
pub struct SettlementOutcome {
    pub event_id: i32,
    pub result: OfficialResult,
    pub updates: Vec<UserRatingUpdate>,
}

/// Macro for executing transactions with SERIALIZABLE isolation and retry logic
macro_rules! with_serializable_tx {
    ($pool:expr, $tx_var:ident, $body:block) => {{
        let mut attempt = 1;
        loop {
            let mut $tx_var = $pool.begin().await?;

            // Set SERIALIZABLE isolation level
            $tx_var
                .execute(sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"))
                .await?;

            let result: EngineResult<_> = async { $body }.await;

            match result {
                Ok(value) => {
                    $tx_var.commit().await?;
                    break Ok(value);
                }
                Err(e) => {
                    $tx_var.rollback().await.ok();

                    if e.is_serialization_conflict() && attempt < MAX_RETRY_ATTEMPTS {
                        // Exponential backoff with jitter
                        let jitter = rand::thread_rng().gen_range(0..10);
                        let delay_ms = BASE_RETRY_DELAY_MS * (1 << (attempt - 1)) + jitter;
                        warn!(attempt, delay_ms, "serialization conflict, retrying");
                        sleep(StdDuration::from_millis(delay_ms)).await;
                        attempt += 1;
                        continue;
                    } else {
                        break Err(e);
                    }
                }
            }
        }
    }};
}

/// Create a prediction for (user, event). Single-shot: a second create for
/// the same pair fails with a distinct error from the edit path.
pub async fn submit_prediction(
    pool: &PgPool,
    config: &Config,
    user_id: i32,
    event_id: i32,
    entries: Vec<RankedEntry>,
) -> EngineResult<i32> {
    // Validate inputs first (outside transaction)
    validate_ordering(&entries, config.scoring.field_size).map_err(EngineError::InvalidOrdering)?;

    with_serializable_tx!(pool, tx, {
        submit_prediction_transaction(&mut tx, user_id, event_id, &entries).await
    })
}

async fn submit_prediction_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: i32,
    event_id: i32,
    entries: &[RankedEntry],
) -> EngineResult<i32> {
    let event = load_event(tx, event_id, false).await?;

    // Lock state is derived from the clock at this instant, not from the
    // persisted status alone.
    if !can_modify(event.status, Utc::now(), event.lock_time) {
        return Err(EngineError::AlreadyLocked);
    }

    let prediction_id = DbAdapter::insert_prediction(tx, user_id, event_id, entries).await?;
    DbAdapter::increment_prediction_count(tx, user_id).await?;

    info!(user_id, event_id, prediction_id, "prediction submitted");
    Ok(prediction_id)
}

/// Rewrite an existing prediction's ordering. Owner-only, and only while the
/// event is open and unlocked.
pub async fn edit_prediction(
    pool: &PgPool,
    config: &Config,
    prediction_id: i32,
    user_id: i32,
    entries: Vec<RankedEntry>,
) -> EngineResult<()> {
    validate_ordering(&entries, config.scoring.field_size).map_err(EngineError::InvalidOrdering)?;

    with_serializable_tx!(pool, tx, {
        edit_prediction_transaction(&mut tx, prediction_id, user_id, &entries).await
    })
}

async fn edit_prediction_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    prediction_id: i32,
    user_id: i32,
    entries: &[RankedEntry],
) -> EngineResult<()> {
    let row = sqlx::query(
        "SELECT p.user_id, e.id, e.name, e.status, e.lock_time
         FROM predictions p
         JOIN events e ON e.id = p.event_id
         WHERE p.id = $1",
    )
    .bind(prediction_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(EngineError::PredictionNotFound)?;

    let owner_id: i32 = row.try_get("user_id")?;
    if owner_id != user_id {
        return Err(EngineError::NotOwner);
    }

    let event = DbAdapter::extract_event(&row)?;
    if !can_modify(event.status, Utc::now(), event.lock_time) {
        return Err(EngineError::AlreadyLocked);
    }

    DbAdapter::update_prediction_entries(tx, prediction_id, entries).await?;

    info!(user_id, prediction_id, "prediction updated");
    Ok(())
}

/// Attach an official result to an event and score every prediction for it,
/// as a single atomic unit. Exactly-once per event: re-invocation fails with
/// the settled policy fault and leaves the first settlement untouched.
pub async fn settle_event(
    pool: &PgPool,
    config: &Config,
    event_id: i32,
    result: OfficialResult,
) -> EngineResult<SettlementOutcome> {
    validate_ordering(&result.entries, config.scoring.field_size)
        .map_err(EngineError::InvalidResult)?;

    with_serializable_tx!(pool, tx, {
        settle_event_transaction(&mut tx, event_id, &result).await
    })
    .map(|updates| SettlementOutcome {
        event_id,
        result,
        updates,
    })
}

async fn settle_event_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_id: i32,
    result: &OfficialResult,
) -> EngineResult<Vec<UserRatingUpdate>> {
    // Row lock on the event serializes settlements of the same event without
    // blocking activity on any other event.
    let event = load_event(tx, event_id, true).await?;
    if event.status == crate::lifecycle::EventStatus::Settled {
        return Err(EngineError::AlreadySettled);
    }

    // The UNIQUE key on official_results.event_id backstops the status check
    // against a concurrent settlement that has not committed yet.
    DbAdapter::insert_official_result(
        tx,
        event_id,
        &result.entries,
        result.fastest_lap.as_deref(),
        result.dnfs.as_deref(),
        result.sprint_entries.as_deref(),
    )
    .await?;

    let predictions = load_predictions(tx, event_id).await?;

    let mut updates = Vec::with_capacity(predictions.len());
    for prediction in &predictions {
        let update = settle_one_prediction(tx, prediction, &result.entries).await?;
        updates.push(update);
    }

    DbAdapter::mark_event_settled(tx, event_id).await?;

    info!(
        event_id,
        event_name = %event.name,
        predictions = updates.len(),
        "settlement committed"
    );
    Ok(updates)
}

/// Score one prediction and persist its outcome. Pure math in the middle,
/// writes on either side; called once per prediction per event, ever.
async fn settle_one_prediction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    prediction: &PredictionRow,
    official_entries: &[RankedEntry],
) -> EngineResult<UserRatingUpdate> {
    let facts = evaluate_accuracy(&prediction.entries, official_entries);
    let calc = calculate_rating(&facts, prediction.rating, prediction.prediction_count);
    let new_rating = apply_rating_delta(prediction.rating, calc.rating_delta);

    let breakdown = serde_json::json!({
        "accuracy": facts.accuracy,
        "correlation": facts.correlation,
        "exact_podium": facts.exact_podium,
        "correct_winner": facts.correct_winner,
        "top_five_correct": facts.top_five_correct,
        "breakdown": calc.breakdown,
    });

    DbAdapter::write_prediction_settlement(
        tx,
        prediction.id,
        calc.rating_delta,
        calc.score,
        &breakdown,
    )
    .await?;
    DbAdapter::apply_user_settlement(tx, prediction.user_id, new_rating, calc.score).await?;

    Ok(UserRatingUpdate {
        user_id: prediction.user_id,
        username: prediction.username.clone(),
        old_rating: prediction.rating,
        new_rating,
        rating_delta: calc.rating_delta,
        score: calc.score,
    })
}

async fn load_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_id: i32,
    for_update: bool,
) -> EngineResult<EventRow> {
    let sql = if for_update {
        "SELECT id, name, status, lock_time FROM events WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT id, name, status, lock_time FROM events WHERE id = $1"
    };

    let row = sqlx::query(sql)
        .bind(event_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(EngineError::EventNotFound)?;

    DbAdapter::extract_event(&row)
}

async fn load_predictions(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_id: i32,
) -> EngineResult<Vec<PredictionRow>> {
    let rows = sqlx::query(
        "SELECT p.id, p.user_id, p.event_id, p.entries,
                u.username, u.rating, u.prediction_count
         FROM predictions p
         JOIN users u ON u.id = p.user_id
         WHERE p.event_id = $1
         ORDER BY p.id",
    )
    .bind(event_id)
    .fetch_all(&mut **tx)
    .await?;

    rows.iter().map(DbAdapter::extract_prediction).collect()
}
