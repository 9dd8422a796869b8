use crate::application::{ClubQueries, ClubStore, EventIngestor, SessionMachine};
use crate::config::ClubConfig;
use crate::infrastructure::flows::FlowRegistry;
use crate::infrastructure::memory::MemoryClubStore;
use crate::infrastructure::security::{AccessPolicy, EventThrottle};
use movieclub_errors::{ClubError, ClubResult};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppContext {
    pub machine: Arc<SessionMachine>,
    pub ingestor: Arc<EventIngestor>,
    pub queries: ClubQueries,
    pub config: Arc<ClubConfig>,
}

impl AppContext {
    pub fn new(store: Arc<dyn ClubStore>, config: ClubConfig) -> Self {
        let machine = Arc::new(SessionMachine::new(store.clone(), config.rating_window));
        let ingestor = EventIngestor::new(
            machine.clone(),
            AccessPolicy::new(config.groups.clone(), config.admin_ids.iter().copied()),
            EventThrottle::new(config.events_per_minute),
            FlowRegistry::new(config.flow_ttl),
        );
        Self {
            machine,
            ingestor: Arc::new(ingestor),
            queries: ClubQueries::new(store),
            config: Arc::new(config),
        }
    }

    pub fn in_memory(config: ClubConfig) -> Self {
        Self::new(Arc::new(MemoryClubStore::new()), config)
    }

    /// Postgres when `DATABASE_URL` is configured, the in-memory store otherwise.
    pub async fn from_config(config: ClubConfig) -> ClubResult<Self> {
        let Some(database_url) = config.database_url.clone() else {
            tracing::info!("DATABASE_URL not set, using the in-memory store");
            return Ok(Self::in_memory(config));
        };
        Self::connect(&database_url, config).await
    }

    #[cfg(feature = "postgres")]
    async fn connect(database_url: &str, config: ClubConfig) -> ClubResult<Self> {
        use crate::infrastructure::db;

        let conn = db::create_connection(database_url)
            .await
            .map_err(|e| ClubError::StoreUnavailable(e.to_string()))?;
        db::run_migrations(&conn)
            .await
            .map_err(|e| ClubError::Internal(format!("schema bootstrap failed: {e}")))?;
        tracing::info!("Connected to Postgres");
        Ok(Self::new(Arc::new(db::PgClubStore::new(conn)), config))
    }

    #[cfg(not(feature = "postgres"))]
    async fn connect(_database_url: &str, _config: ClubConfig) -> ClubResult<Self> {
        Err(ClubError::Validation(
            "DATABASE_URL is set but this build has no postgres support".to_string(),
        ))
    }
}
