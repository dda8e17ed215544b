// Database connection and read-side query functions
use crate::lifecycle;
use crate::scoring_core::RankedEntry;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

// A user's persistent rating state
#[derive(Debug)]
pub struct UserRatingState {
    pub user_id: i32,
    pub username: String,
    pub rating: i32,
    pub total_score: i64,
    pub prediction_count: i32,
}

// Event header with the lock state derived at read time
#[derive(Debug)]
pub struct EventSummary {
    pub id: i32,
    pub name: String,
    pub season: i32,
    pub round: i32,
    pub status: String,
    pub lock_time: DateTime<Utc>,
    pub locked: bool,
    pub has_result: bool,
    pub prediction_count: i64,
}

// A stored prediction as its owner sees it
#[derive(Debug)]
pub struct StoredPrediction {
    pub id: i32,
    pub event_id: i32,
    pub entries: Vec<RankedEntry>,
    pub rating_delta: Option<i32>,
    pub score: Option<i32>,
    pub breakdown: Option<serde_json::Value>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// One settled prediction's rating movement, for per-event displays
#[derive(Debug)]
pub struct SettledDelta {
    pub user_id: i32,
    pub username: String,
    pub rating_delta: i32,
    pub score: i32,
}

// Create a connection pool to PostgreSQL
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}

// Fetch one user's rating state
pub async fn fetch_user_rating(pool: &PgPool, user_id: i32) -> Result<Option<UserRatingState>> {
    let row = sqlx::query(
        "SELECT id AS user_id, username, rating, total_score, prediction_count
         FROM users
         WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| UserRatingState {
        user_id: row.get("user_id"),
        username: row.get("username"),
        rating: row.get("rating"),
        total_score: row.get("total_score"),
        prediction_count: row.get("prediction_count"),
    }))
}

fn event_summary_from_row(row: &sqlx::postgres::PgRow) -> EventSummary {
    let status: String = row.get("status");
    let lock_time: DateTime<Utc> = row.get("lock_time");
    let settled = status == lifecycle::EventStatus::Settled.as_str();
    // Derived: an open event reads as locked once the clock passes lock_time
    let locked = settled || lifecycle::is_locked(Utc::now(), lock_time);

    EventSummary {
        id: row.get("id"),
        name: row.get("name"),
        season: row.get("season"),
        round: row.get("round"),
        status,
        lock_time,
        locked,
        has_result: row.get("has_result"),
        prediction_count: row.get("prediction_count"),
    }
}

// Event header plus whether a result is attached and how many predictions exist
pub async fn get_event_summary(pool: &PgPool, event_id: i32) -> Result<Option<EventSummary>> {
    let row = sqlx::query(
        r#"
        SELECT
            e.id,
            e.name,
            e.season,
            e.round,
            e.status,
            e.lock_time,
            EXISTS (SELECT 1 FROM official_results r WHERE r.event_id = e.id) AS has_result,
            COUNT(p.id) AS prediction_count
        FROM events e
        LEFT JOIN predictions p ON p.event_id = e.id
        WHERE e.id = $1
        GROUP BY e.id
        "#,
    )
    .bind(event_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| event_summary_from_row(&row)))
}

// Open events whose lock time is still ahead, soonest first
pub async fn get_upcoming_events(pool: &PgPool, limit: i32) -> Result<Vec<EventSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT
            e.id,
            e.name,
            e.season,
            e.round,
            e.status,
            e.lock_time,
            EXISTS (SELECT 1 FROM official_results r WHERE r.event_id = e.id) AS has_result,
            COUNT(p.id) AS prediction_count
        FROM events e
        LEFT JOIN predictions p ON p.event_id = e.id
        WHERE e.status = 'open' AND e.lock_time > NOW()
        GROUP BY e.id
        ORDER BY e.lock_time ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(event_summary_from_row).collect())
}

// Top users by rating; score and prediction volume break ties
pub async fn get_top_rated(pool: &PgPool, limit: i32) -> Result<Vec<UserRatingState>> {
    let rows = sqlx::query(
        r#"
        SELECT id AS user_id, username, rating, total_score, prediction_count
        FROM users
        WHERE prediction_count > 0
        ORDER BY rating DESC, total_score DESC, prediction_count DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut users = Vec::new();
    for row in rows {
        users.push(UserRatingState {
            user_id: row.get("user_id"),
            username: row.get("username"),
            rating: row.get("rating"),
            total_score: row.get("total_score"),
            prediction_count: row.get("prediction_count"),
        });
    }

    Ok(users)
}

// A user's prediction for one event, including settlement fields once filled
pub async fn get_user_prediction(
    pool: &PgPool,
    user_id: i32,
    event_id: i32,
) -> Result<Option<StoredPrediction>> {
    let row = sqlx::query(
        "SELECT id, event_id, entries, rating_delta, score, breakdown, submitted_at, updated_at
         FROM predictions
         WHERE user_id = $1 AND event_id = $2",
    )
    .bind(user_id)
    .bind(event_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let Json(entries): Json<Vec<RankedEntry>> = row.get("entries");
        StoredPrediction {
            id: row.get("id"),
            event_id: row.get("event_id"),
            entries,
            rating_delta: row.get("rating_delta"),
            score: row.get("score"),
            breakdown: row.get("breakdown"),
            submitted_at: row.get("submitted_at"),
            updated_at: row.get("updated_at"),
        }
    }))
}

// Rating movements recorded on an event's predictions at settlement
pub async fn get_event_deltas(pool: &PgPool, event_id: i32) -> Result<Vec<SettledDelta>> {
    let rows = sqlx::query(
        r#"
        SELECT p.user_id, u.username, p.rating_delta, p.score
        FROM predictions p
        JOIN users u ON u.id = p.user_id
        WHERE p.event_id = $1 AND p.rating_delta IS NOT NULL
        ORDER BY p.score DESC, p.rating_delta DESC
        "#,
    )
    .bind(event_id)
    .fetch_all(pool)
    .await?;

    let mut deltas = Vec::new();
    for row in rows {
        deltas.push(SettledDelta {
            user_id: row.get("user_id"),
            username: row.get("username"),
            rating_delta: row.get("rating_delta"),
            score: row.get("score"),
        });
    }

    Ok(deltas)
}
