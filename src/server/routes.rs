//! Axum router and handlers for the pipeline REST surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, patch, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::analytics::aggregator;
use crate::analytics::snapshot;
use crate::db::Database;
use crate::engine::entries;
use crate::error::PipelineError;
use crate::models::{
    AgentPerformance, ConversionTrendPoint, CreatePipelineEntryInput, PipelineEntry,
    PipelineFilters, PipelineOverview, SourceConversion, StageBreakdown, StageVelocity,
    TopPerformer, UpdatePipelineEntryInput,
};

/// Shared state accessible from handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
}

/// Build the router with all routes mounted.
pub fn router(db: Arc<Database>) -> Router {
    let state = AppState { db };

    let pipeline = Router::new()
        .route("/", get(list_entries).post(create_entry))
        .route("/active", get(active_entries))
        .route("/urgent", get(urgent_leads))
        .route("/high-probability", get(high_probability))
        .route("/follow-up", get(follow_up))
        .route("/upcoming-actions", get(upcoming_actions))
        .route("/agent/{agent_id}", get(entries_by_agent))
        .route("/stage/{stage}", get(entries_by_stage))
        .route("/analytics/overview", get(analytics_overview))
        .route("/analytics/stages", get(analytics_stages))
        .route("/analytics/agents", get(analytics_agents))
        .route("/analytics/sources", get(analytics_sources))
        .route("/analytics/velocity", get(analytics_velocity))
        .route("/analytics/trends", get(analytics_trends))
        .route("/analytics/top-performers", get(analytics_top_performers))
        .route("/analytics/generate", post(analytics_generate))
        .route("/{id}", get(get_entry).put(update_entry).delete(delete_entry))
        .route("/{id}/stage", patch(move_to_stage))
        .route("/{id}/contact", patch(update_contact))
        .route("/{id}/close", patch(close_deal))
        .route("/{id}/lose", patch(lose_deal));

    Router::new()
        .route("/health", get(health))
        .nest("/api/pipeline", pipeline)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn list_entries(
    State(state): State<AppState>,
    Query(filters): Query<PipelineFilters>,
) -> Result<Json<Vec<PipelineEntry>>, PipelineError> {
    Ok(Json(entries::list_entries(&state.db, Some(filters))?))
}

async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PipelineEntry>, PipelineError> {
    Ok(Json(entries::get_entry(&state.db, &id)?))
}

async fn create_entry(
    State(state): State<AppState>,
    Json(input): Json<CreatePipelineEntryInput>,
) -> Result<(StatusCode, Json<PipelineEntry>), PipelineError> {
    let entry = entries::create_entry(&state.db, input)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn update_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<UpdatePipelineEntryInput>,
) -> Result<Json<PipelineEntry>, PipelineError> {
    Ok(Json(entries::update_entry(&state.db, &id, input)?))
}

async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, PipelineError> {
    entries::delete_entry(&state.db, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct StageParams {
    stage: String,
    notes: Option<String>,
}

async fn move_to_stage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<StageParams>,
) -> Result<Json<PipelineEntry>, PipelineError> {
    Ok(Json(entries::move_to_stage(
        &state.db,
        &id,
        &params.stage,
        params.notes,
    )?))
}

#[derive(Deserialize)]
struct ContactParams {
    notes: Option<String>,
}

async fn update_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ContactParams>,
) -> Result<Json<PipelineEntry>, PipelineError> {
    Ok(Json(entries::update_contact(&state.db, &id, params.notes)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseParams {
    close_reason: Option<String>,
    actual_value: Option<String>,
    commission_earned: Option<String>,
}

fn parse_amount(value: Option<&str>, name: &str) -> Result<f64, PipelineError> {
    let raw = value.ok_or_else(|| {
        PipelineError::InvalidArgument(format!("{} is required", name))
    })?;
    raw.parse::<f64>()
        .map_err(|_| PipelineError::InvalidArgument(format!("{} is not a valid amount: {}", name, raw)))
}

async fn close_deal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<CloseParams>,
) -> Result<Json<PipelineEntry>, PipelineError> {
    let actual_value = parse_amount(params.actual_value.as_deref(), "actualValue")?;
    let commission_earned = parse_amount(params.commission_earned.as_deref(), "commissionEarned")?;

    Ok(Json(entries::close_deal(
        &state.db,
        &id,
        params.close_reason,
        actual_value,
        commission_earned,
    )?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoseParams {
    close_reason: Option<String>,
}

async fn lose_deal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LoseParams>,
) -> Result<Json<PipelineEntry>, PipelineError> {
    Ok(Json(entries::lose_deal(&state.db, &id, params.close_reason)?))
}

async fn entries_by_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<i64>,
) -> Result<Json<Vec<PipelineEntry>>, PipelineError> {
    Ok(Json(entries::list_by_agent(&state.db, agent_id)?))
}

async fn entries_by_stage(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> Result<Json<Vec<PipelineEntry>>, PipelineError> {
    Ok(Json(entries::list_by_stage(&state.db, &stage)?))
}

async fn active_entries(
    State(state): State<AppState>,
) -> Result<Json<Vec<PipelineEntry>>, PipelineError> {
    Ok(Json(aggregator::active_entries(&state.db)?))
}

async fn urgent_leads(
    State(state): State<AppState>,
) -> Result<Json<Vec<PipelineEntry>>, PipelineError> {
    Ok(Json(aggregator::urgent_leads(&state.db)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HighProbabilityParams {
    min_probability: Option<i64>,
}

async fn high_probability(
    State(state): State<AppState>,
    Query(params): Query<HighProbabilityParams>,
) -> Result<Json<Vec<PipelineEntry>>, PipelineError> {
    let min = params.min_probability.unwrap_or(70);
    Ok(Json(aggregator::high_probability_leads(&state.db, min)?))
}

#[derive(Deserialize)]
struct FollowUpParams {
    days: Option<i64>,
}

async fn follow_up(
    State(state): State<AppState>,
    Query(params): Query<FollowUpParams>,
) -> Result<Json<Vec<PipelineEntry>>, PipelineError> {
    let days = params.days.unwrap_or(7);
    Ok(Json(aggregator::leads_needing_follow_up(&state.db, days)?))
}

async fn upcoming_actions(
    State(state): State<AppState>,
) -> Result<Json<Vec<PipelineEntry>>, PipelineError> {
    Ok(Json(aggregator::upcoming_actions(&state.db)?))
}

async fn analytics_overview(
    State(state): State<AppState>,
) -> Result<Json<PipelineOverview>, PipelineError> {
    Ok(Json(aggregator::overview(&state.db)?))
}

async fn analytics_stages(
    State(state): State<AppState>,
) -> Result<Json<Vec<StageBreakdown>>, PipelineError> {
    Ok(Json(aggregator::stage_breakdown(&state.db)?))
}

async fn analytics_agents(
    State(state): State<AppState>,
) -> Result<Json<Vec<AgentPerformance>>, PipelineError> {
    Ok(Json(aggregator::agent_performance(&state.db)?))
}

async fn analytics_sources(
    State(state): State<AppState>,
) -> Result<Json<Vec<SourceConversion>>, PipelineError> {
    Ok(Json(aggregator::source_analysis(&state.db)?))
}

async fn analytics_velocity(
    State(state): State<AppState>,
) -> Result<Json<Vec<StageVelocity>>, PipelineError> {
    Ok(Json(aggregator::stage_velocity(&state.db)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DateRangeParams {
    start_date: Option<String>,
    end_date: Option<String>,
    limit: Option<i64>,
}

fn require_range(params: &DateRangeParams) -> Result<(String, String), PipelineError> {
    let start = params
        .start_date
        .clone()
        .ok_or_else(|| PipelineError::InvalidArgument("startDate is required".to_string()))?;
    let end = params
        .end_date
        .clone()
        .ok_or_else(|| PipelineError::InvalidArgument("endDate is required".to_string()))?;
    Ok((start, end))
}

async fn analytics_trends(
    State(state): State<AppState>,
    Query(params): Query<DateRangeParams>,
) -> Result<Json<Vec<ConversionTrendPoint>>, PipelineError> {
    let (start, end) = require_range(&params)?;
    Ok(Json(aggregator::conversion_trends(&state.db, &start, &end)?))
}

async fn analytics_top_performers(
    State(state): State<AppState>,
    Query(params): Query<DateRangeParams>,
) -> Result<Json<Vec<TopPerformer>>, PipelineError> {
    let (start, end) = require_range(&params)?;
    let limit = params.limit.unwrap_or(10);
    Ok(Json(aggregator::top_performers(&state.db, &start, &end, limit)?))
}

#[derive(Serialize)]
struct GenerateResponse {
    generated: usize,
}

async fn analytics_generate(
    State(state): State<AppState>,
) -> Result<Json<GenerateResponse>, PipelineError> {
    let generated = snapshot::generate_daily_snapshot(&state.db)?;
    Ok(Json(GenerateResponse { generated }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let db = Arc::new(Database::open_in_memory().unwrap());
        router(db)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create_lead(app: &Router) -> Value {
        let payload = json!({
            "leadId": 11,
            "propertyId": 22,
            "agentId": 7,
            "stage": "LEAD",
            "probability": 10,
            "expectedValue": 250000.0,
            "source": "WEBSITE"
        });

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/pipeline")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = test_router();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_then_fetch_round_trip() {
        let app = test_router();
        let created = create_lead(&app).await;

        let id = created["id"].as_str().unwrap();
        assert!(id.starts_with("PIPE-"));
        assert_eq!(created["stage"], "LEAD");

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/pipeline/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let fetched = body_json(response).await;
        assert_eq!(fetched["id"], created["id"]);
        assert_eq!(fetched["agentId"], 7);
    }

    #[tokio::test]
    async fn unknown_id_is_404_with_structured_body() {
        let app = test_router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/pipeline/PIPE-missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["errorKind"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn stage_patch_applies_table_probability() {
        let app = test_router();
        let created = create_lead(&app).await;
        let id = created["id"].as_str().unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!("/api/pipeline/{}/stage?stage=PROPOSAL&notes=Offer%20sent", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let moved = body_json(response).await;
        assert_eq!(moved["stage"], "PROPOSAL");
        assert_eq!(moved["probability"], 75);
        assert_eq!(moved["stageChangesCount"], 1);
    }

    #[tokio::test]
    async fn close_with_unparsable_amount_is_400() {
        let app = test_router();
        let created = create_lead(&app).await;
        let id = created["id"].as_str().unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!(
                        "/api/pipeline/{}/close?closeReason=Signed&actualValue=abc&commissionEarned=10",
                        id
                    ))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["errorKind"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn close_happy_path_forces_won() {
        let app = test_router();
        let created = create_lead(&app).await;
        let id = created["id"].as_str().unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!(
                        "/api/pipeline/{}/close?closeReason=Signed&actualValue=240000&commissionEarned=7200",
                        id
                    ))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let closed = body_json(response).await;
        assert_eq!(closed["stage"], "CLOSED_WON");
        assert_eq!(closed["probability"], 100);
        assert_eq!(closed["actualValue"], 240000.0);
    }

    #[tokio::test]
    async fn delete_then_delete_again_is_404() {
        let app = test_router();
        let created = create_lead(&app).await;
        let id = created["id"].as_str().unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/pipeline/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/pipeline/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_stage_filter_is_400() {
        let app = test_router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/pipeline/stage/NOT_A_STAGE")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn analytics_overview_reflects_entries() {
        let app = test_router();
        create_lead(&app).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/pipeline/analytics/overview")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let overview = body_json(response).await;
        assert_eq!(overview["totalCount"], 1);
        assert_eq!(overview["activeCount"], 1);
    }

    #[tokio::test]
    async fn generate_then_query_trends() {
        let app = test_router();
        create_lead(&app).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/pipeline/analytics/generate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let generated = body_json(response).await;
        assert_eq!(generated["generated"], 1);

        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!(
                        "/api/pipeline/analytics/trends?startDate={}&endDate={}",
                        today, today
                    ))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let trends = body_json(response).await;
        assert_eq!(trends.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn trends_with_inverted_range_is_400() {
        let app = test_router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/pipeline/analytics/trends?startDate=2026-02-01&endDate=2026-01-01")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
