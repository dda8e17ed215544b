// HTTP surface for the rating engine
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;

use rating_engine::config::Config;
use rating_engine::database;
use rating_engine::error::EngineError;
use rating_engine::scoring_core::RankedEntry;
use rating_engine::settlement_api::{self, OfficialResult};

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("🏁 Starting Rating Engine...");

    let config = Config::from_env();
    config.print_config();

    // Get database URL from environment variable
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://rating_user:password@db:5432/ratingdb".to_string());

    let pool = database::create_pool(&database_url, config.scoring.max_connections).await?;
    println!("✅ Connected to database!");

    let app = Router::new()
        .route("/", get(hello))
        .route("/health", get(health_check))
        .route("/events/upcoming", get(get_upcoming_events))
        .route("/events/:event_id", get(get_event))
        .route("/events/:event_id/deltas", get(get_event_deltas))
        .route("/events/:event_id/predictions", post(submit_prediction))
        .route("/events/:event_id/result", post(settle_event))
        .route("/predictions/:prediction_id", patch(edit_prediction))
        .route("/users/:user_id/rating", get(get_user_rating))
        .route(
            "/users/:user_id/events/:event_id/prediction",
            get(get_user_prediction),
        )
        .route("/leaderboard", get(get_leaderboard))
        .layer(CorsLayer::permissive())
        .with_state(AppState { pool, config });

    let addr = SocketAddr::from(([0, 0, 0, 0], 3001));

    println!("🚀 Server running on http://{}", addr);
    println!("📊 Available endpoints:");
    println!("  GET   /health - Health check");
    println!("  GET   /events/upcoming - Open events still accepting predictions");
    println!("  GET   /events/:id - Event summary with derived lock state");
    println!("  POST  /events/:id/predictions - Submit a prediction");
    println!("  PATCH /predictions/:id - Edit a prediction before lock");
    println!("  POST  /events/:id/result - Publish the official result and settle");
    println!("  GET   /users/:id/rating - User rating state");
    println!("  GET   /leaderboard - Top users by rating");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn hello() -> Json<Value> {
    Json(json!({
        "message": "Rating Engine 🏁",
        "status": "running"
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "rating-engine"
    }))
}

fn internal(e: anyhow::Error) -> EngineError {
    EngineError::Internal(e.to_string())
}

#[derive(Debug, Deserialize)]
struct PredictionBody {
    user_id: i32,
    entries: Vec<RankedEntry>,
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i32>,
}

async fn submit_prediction(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
    Json(body): Json<PredictionBody>,
) -> Result<Json<Value>, EngineError> {
    let prediction_id = settlement_api::submit_prediction(
        &state.pool,
        &state.config,
        body.user_id,
        event_id,
        body.entries,
    )
    .await?;

    Ok(Json(json!({
        "prediction_id": prediction_id,
        "message": "Prediction submitted"
    })))
}

async fn edit_prediction(
    State(state): State<AppState>,
    Path(prediction_id): Path<i32>,
    Json(body): Json<PredictionBody>,
) -> Result<Json<Value>, EngineError> {
    settlement_api::edit_prediction(
        &state.pool,
        &state.config,
        prediction_id,
        body.user_id,
        body.entries,
    )
    .await?;

    Ok(Json(json!({
        "prediction_id": prediction_id,
        "message": "Prediction updated"
    })))
}

async fn settle_event(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
    Json(result): Json<OfficialResult>,
) -> Result<Json<Value>, EngineError> {
    let outcome =
        settlement_api::settle_event(&state.pool, &state.config, event_id, result).await?;

    Ok(Json(json!({
        "event_id": outcome.event_id,
        "result": outcome.result,
        "updates": outcome.updates,
        "message": format!("Event settled. {} predictions scored.", outcome.updates.len())
    })))
}

async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
) -> Result<Json<Value>, EngineError> {
    let summary = database::get_event_summary(&state.pool, event_id)
        .await
        .map_err(internal)?
        .ok_or(EngineError::EventNotFound)?;

    Ok(Json(event_summary_json(&summary)))
}

async fn get_upcoming_events(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, EngineError> {
    let events = database::get_upcoming_events(&state.pool, query.limit.unwrap_or(10))
        .await
        .map_err(internal)?;

    let events: Vec<Value> = events.iter().map(event_summary_json).collect();
    Ok(Json(json!({ "events": events })))
}

async fn get_event_deltas(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
) -> Result<Json<Value>, EngineError> {
    let deltas = database::get_event_deltas(&state.pool, event_id)
        .await
        .map_err(internal)?;

    let deltas: Vec<Value> = deltas
        .into_iter()
        .map(|d| {
            json!({
                "user_id": d.user_id,
                "username": d.username,
                "rating_delta": d.rating_delta,
                "score": d.score,
            })
        })
        .collect();

    Ok(Json(json!({ "event_id": event_id, "deltas": deltas })))
}

async fn get_user_rating(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> Result<Json<Value>, EngineError> {
    let user = database::fetch_user_rating(&state.pool, user_id)
        .await
        .map_err(internal)?
        .ok_or(EngineError::UserNotFound)?;

    Ok(Json(json!({
        "user_id": user.user_id,
        "username": user.username,
        "rating": user.rating,
        "total_score": user.total_score,
        "prediction_count": user.prediction_count,
    })))
}

async fn get_user_prediction(
    State(state): State<AppState>,
    Path((user_id, event_id)): Path<(i32, i32)>,
) -> Result<Json<Value>, EngineError> {
    let prediction = database::get_user_prediction(&state.pool, user_id, event_id)
        .await
        .map_err(internal)?
        .ok_or(EngineError::PredictionNotFound)?;

    Ok(Json(json!({
        "prediction_id": prediction.id,
        "event_id": prediction.event_id,
        "entries": prediction.entries,
        "rating_delta": prediction.rating_delta,
        "score": prediction.score,
        "breakdown": prediction.breakdown,
        "submitted_at": prediction.submitted_at,
        "updated_at": prediction.updated_at,
    })))
}

async fn get_leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Value>, EngineError> {
    let users = database::get_top_rated(&state.pool, query.limit.unwrap_or(10))
        .await
        .map_err(internal)?;

    let users: Vec<Value> = users
        .into_iter()
        .map(|user| {
            json!({
                "user_id": user.user_id,
                "username": user.username,
                "rating": user.rating,
                "total_score": user.total_score,
                "prediction_count": user.prediction_count,
            })
        })
        .collect();

    Ok(Json(json!({ "leaderboard": users })))
}

fn event_summary_json(summary: &database::EventSummary) -> Value {
    json!({
        "event_id": summary.id,
        "name": summary.name,
        "season": summary.season,
        "round": summary.round,
        "status": summary.status,
        "lock_time": summary.lock_time,
        "locked": summary.locked,
        "has_result": summary.has_result,
        "prediction_count": summary.prediction_count,
    })
}
