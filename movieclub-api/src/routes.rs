use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use movieclub_app::application::{CurrentSession, Dispatch, InboundEvent};
use movieclub_app::domain::{
    ChatScope, ClubStats, LeaderboardPage, LeaderboardQuery, DEFAULT_PAGE_SIZE,
};
use movieclub_app::AppContext;
use movieclub_errors::ClubError;
use serde::Deserialize;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

#[derive(Deserialize)]
struct LeaderboardParams {
    chat_id: Option<i64>,
    topic_id: Option<i64>,
    #[serde(default)]
    page: usize,
    page_size: Option<usize>,
    title: Option<String>,
}

#[derive(Deserialize)]
struct TopicParams {
    topic_id: Option<i64>,
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(ingest_event))
        .route("/leaderboard", get(leaderboard))
        .route("/groups/{chat_id}/stats", get(group_stats))
        .route("/groups/{chat_id}/session", get(current_session))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(ctx)
}

async fn health() -> &'static str {
    "ok"
}

async fn ingest_event(
    State(ctx): State<AppContext>,
    Json(event): Json<InboundEvent>,
) -> Result<Json<Dispatch>, ClubError> {
    ctx.ingestor.handle(event).await.map(Json)
}

async fn leaderboard(
    State(ctx): State<AppContext>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<LeaderboardPage>, ClubError> {
    if params.topic_id.is_some() && params.chat_id.is_none() {
        return Err(ClubError::Validation("topic_id needs a chat_id".to_string()));
    }

    let query = LeaderboardQuery {
        scope: params.chat_id.map(|chat_id| ChatScope::new(chat_id, params.topic_id)),
        page: params.page,
        page_size: params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        title_filter: params.title.filter(|title| !title.trim().is_empty()),
    };
    ctx.queries.leaderboard(&query).await.map(Json)
}

async fn group_stats(
    State(ctx): State<AppContext>,
    Path(chat_id): Path<i64>,
    Query(params): Query<TopicParams>,
) -> Result<Json<ClubStats>, ClubError> {
    let scope = ChatScope::new(chat_id, params.topic_id);
    ctx.queries.stats(&scope).await.map(Json)
}

async fn current_session(
    State(ctx): State<AppContext>,
    Path(chat_id): Path<i64>,
    Query(params): Query<TopicParams>,
) -> Result<Json<CurrentSession>, ClubError> {
    let scope = ChatScope::new(chat_id, params.topic_id);
    ctx.queries.current_session(&scope).await.map(Json)
}
