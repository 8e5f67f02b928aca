use std::{sync::Arc, time::Duration};

use anyhow::{Context, bail};
use prospector_config::Config;
use prospector_core::{
    MIGRATOR, ResearchOrchestrator,
    orchestration::{
        Clock, EventPublisher, ResearchDispatcher, StaticRegime, SystemClock,
        runtime::{InProcEventBus, OrchestratorRuntime},
    },
    persistence::{
        OrchestratorStores,
        postgres::{PostgresCandidateSink, postgres_stores},
    },
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::executor::HttpResearchExecutor;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn connect_database(config: &Config) -> anyhow::Result<PgPool> {
    let Some(url) = config.database.url.as_deref() else {
        bail!("no database configured; set DATABASE_URL or [database].url");
    };
    PgPoolOptions::new()
        .max_connections(config.database.max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")
}

/// Everything one process needs to drive or inspect the orchestrator.
#[derive(Debug)]
pub struct AppContext {
    pub config: Config,
    pub pool: PgPool,
    pub stores: OrchestratorStores,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<InProcEventBus>,
    pub orchestrator: Arc<ResearchOrchestrator>,
}

impl AppContext {
    /// Connect, apply migrations and seed state and budgets.
    pub async fn initialize(config: Config) -> anyhow::Result<Self> {
        let pool = connect_database(&config).await?;
        MIGRATOR
            .run(&pool)
            .await
            .context("database migration failed")?;

        let stores = postgres_stores(pool.clone());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let events = Arc::new(InProcEventBus::new(
            config.orchestrator.runtime.event_channel_capacity,
        ));
        let publisher: Arc<dyn EventPublisher> = events.clone();
        let orchestrator = Arc::new(
            ResearchOrchestrator::new(
                config.orchestrator.clone(),
                stores.clone(),
                Arc::clone(&clock),
                publisher,
                Arc::new(PostgresCandidateSink::new(pool.clone())),
            )
            .context("invalid orchestrator configuration")?,
        );
        let state = orchestrator
            .bootstrap()
            .await
            .context("failed to bootstrap orchestrator state")?;
        debug!(
            full_spectrum = state.is_full_spectrum_enabled,
            "orchestrator state ready"
        );

        Ok(Self {
            config,
            pool,
            stores,
            clock,
            events,
            orchestrator,
        })
    }

    /// Build the supervisor around an HTTP executor. Requires an endpoint.
    pub fn runtime(&self) -> anyhow::Result<OrchestratorRuntime> {
        let Some(raw) = self.config.executor.url.as_deref() else {
            bail!(
                "no research executor configured; set RESEARCH_EXECUTOR_URL \
                 or [executor].url"
            );
        };
        let endpoint = Url::parse(raw)
            .with_context(|| format!("invalid executor url {raw}"))?;
        let executor =
            HttpResearchExecutor::new(endpoint, self.config.executor.token.clone())
                .context("failed to build the executor http client")?;
        info!(endpoint = %executor.endpoint(), "research executor configured");

        let orchestrator_config = &self.config.orchestrator;
        let dispatcher = ResearchDispatcher::new(
            Arc::new(executor),
            self.stores.fingerprints.clone(),
            Arc::new(StaticRegime(None)),
            Arc::clone(&self.clock),
            orchestrator_config.modes.clone(),
            &orchestrator_config.executor,
        );
        OrchestratorRuntime::builder(orchestrator_config.runtime.clone())
            .with_orchestrator(Arc::clone(&self.orchestrator))
            .with_dispatcher(Arc::new(dispatcher))
            .build()
            .context("failed to assemble orchestrator runtime")
    }

    /// Mirror orchestrator events into the log until the bus closes or the
    /// token fires.
    pub fn spawn_event_logger(
        &self,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> JoinHandle<()> {
        let mut receiver = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(event) => debug!(
                            target: "research::events",
                            instance = %event.meta.instance_id,
                            payload = ?event.payload,
                            "orchestrator event"
                        ),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(
                                target: "research::events",
                                skipped = n,
                                "event logger lagged"
                            );
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            break;
                        }
                    },
                }
            }
        })
    }
}
