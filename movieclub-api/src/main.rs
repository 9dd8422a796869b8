mod routes;

use chrono::Utc;
use movieclub_app::domain::AdvancePayload;
use movieclub_app::{AppContext, ClubConfig};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ClubConfig::from_env().expect("Invalid configuration");
    let addr = config.listen_addr;

    let app_context = AppContext::from_config(config)
        .await
        .expect("Failed to initialize application");

    spawn_outcome_log(&app_context);
    spawn_deadline_sweeper(&app_context);

    let app = routes::router(app_context.clone());

    tracing::info!("Listening on http://{}", addr);
    tracing::info!(
        "Clubs: {} configured chat(s), {} admin(s), rating window {}",
        app_context.config.groups.len(),
        app_context.config.admin_ids.len(),
        app_context
            .config
            .rating_window
            .map(|w| format!("{}h", w.num_hours()))
            .unwrap_or_else(|| "unbounded".to_string()),
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app.into_make_service())
        .await
        .expect("Server error");
}

/// Announcements a chat front-end would post; here they go to the log.
fn spawn_outcome_log(ctx: &AppContext) {
    let mut events = ctx.machine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(advanced) => {
                    let session = &advanced.session;
                    match &advanced.payload {
                        AdvancePayload::Winner(result) => tracing::info!(
                            session_id = %session.id,
                            winner = ?result.winner,
                            votes = result.total_votes,
                            tied = result.tied,
                            "Voting closed"
                        ),
                        AdvancePayload::Final { winner, aggregate } => tracing::info!(
                            session_id = %session.id,
                            winner = ?winner,
                            mean = ?aggregate.mean,
                            ratings = aggregate.count,
                            "Session completed"
                        ),
                        _ => tracing::info!(
                            session_id = %session.id,
                            from = ?advanced.from,
                            to = %advanced.to,
                            "Session advanced"
                        ),
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Outcome log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_deadline_sweeper(ctx: &AppContext) {
    let period = ctx.config.deadline_sweep;
    if period.is_zero() {
        tracing::info!("Deadline sweeper disabled");
        return;
    }

    let ingestor = ctx.ingestor.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match ingestor.sweep_deadlines(Utc::now()).await {
                Ok(0) => {}
                Ok(closed) => tracing::info!(closed, "Closed overdue rating phases"),
                Err(e) => tracing::warn!(error = %e, "Deadline sweep failed"),
            }
        }
    });
}
