//! Application startup and lifecycle management.

use crate::config::{ReconciliationConfig, StoreBackend};
use crate::engine::{DescriptionSimilarity, TokenOverlap};
use crate::handlers;
use crate::services::{
    init_metrics, ConfigService, Database, MatchService, MemoryStore, ReconStore, RunDefaults,
    TaskService,
};
use crate::workers::{recover_tasks, TaskRegistry, TaskRunner, WorkerOrchestrator};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::{make_request_span, request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ReconciliationConfig,
    pub store: Arc<dyn ReconStore>,
    pub tasks: TaskService,
    pub matches: MatchService,
    pub configs: ConfigService,
}

impl AppState {
    /// Wires the services around a store. The returned worker pool must be
    /// started before submitted tasks make progress.
    pub fn assemble(
        config: ReconciliationConfig,
        store: Arc<dyn ReconStore>,
    ) -> (Self, WorkerOrchestrator, TaskRegistry) {
        Self::assemble_with(config, store, Arc::new(TokenOverlap))
    }

    /// Same as `assemble` with a custom description similarity.
    pub fn assemble_with(
        config: ReconciliationConfig,
        store: Arc<dyn ReconStore>,
        similarity: Arc<dyn DescriptionSimilarity>,
    ) -> (Self, WorkerOrchestrator, TaskRegistry) {
        let registry = TaskRegistry::with_retention(config.worker.result_retention());
        let matches = MatchService::new(store.clone());

        let runner = TaskRunner::new(
            store.clone(),
            matches.clone(),
            registry.clone(),
            similarity,
            config.engine.limits(),
            config.worker.batch_size,
            config.engine.history_limit,
        );
        let (orchestrator, queue) = WorkerOrchestrator::new(config.worker.clone(), runner);

        let tasks = TaskService::new(
            store.clone(),
            queue,
            registry.clone(),
            RunDefaults {
                soft_time_limit_seconds: config.worker.default_soft_time_limit_seconds,
                auto_match_threshold: config.engine.auto_match_threshold,
            },
        );

        let state = Self {
            config,
            configs: ConfigService::new(store.clone()),
            store,
            tasks,
            matches,
        };

        (state, orchestrator, registry)
    }
}

pub fn build_router(state: AppState) -> Router {
    let reconciliation = Router::new()
        .route("/execute", post(handlers::execute_reconciliation))
        .route("/tasks", get(handlers::list_tasks))
        .route("/tasks/", get(handlers::list_tasks))
        .route("/jobs", get(handlers::list_tasks))
        .route("/jobs/", get(handlers::list_tasks))
        .route("/tasks/:task_id", get(handlers::get_task))
        .route(
            "/tasks/:task_id/suggestions",
            get(handlers::get_task_suggestions),
        )
        .route("/:task_id/cancel", post(handlers::cancel_task));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/reconciliation", reconciliation)
        .route(
            "/matches",
            post(handlers::create_matches).get(handlers::list_matches),
        )
        .route("/matches/:match_id", delete(handlers::unmatch))
        .route("/suggestions/commit", post(handlers::commit_suggestions))
        .route(
            "/recon-configs",
            post(handlers::create_config).get(handlers::list_configs),
        )
        .route(
            "/recon-configs/:config_id",
            get(handlers::get_config)
                .put(handlers::update_config)
                .delete(handlers::delete_config),
        )
        .route(
            "/bank-transactions",
            post(handlers::import_bank_transactions).get(handlers::list_bank_transactions),
        )
        .route(
            "/bank-transactions/:id/ignore",
            post(handlers::ignore_bank_transaction),
        )
        .route(
            "/bank-transactions/:id/restore",
            post(handlers::restore_bank_transaction),
        )
        .route(
            "/book-transactions",
            post(handlers::import_book_transactions).get(handlers::list_book_transactions),
        )
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: ReconciliationConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: ReconciliationConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: ReconciliationConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let store: Arc<dyn ReconStore> = match (config.store, &config.database) {
            (StoreBackend::Postgres, Some(db_config)) => {
                let db = Database::new(
                    &db_config.url,
                    db_config.max_connections,
                    db_config.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;

                if run_migrations {
                    db.run_migrations().await.map_err(|e| {
                        tracing::error!(error = %e, "Failed to run migrations");
                        e
                    })?;
                }
                Arc::new(db)
            }
            (StoreBackend::Postgres, None) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Postgres store selected without database settings"
                )));
            }
            (StoreBackend::Memory, _) => {
                tracing::warn!("Using in-memory store - data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let (state, orchestrator, registry) = AppState::assemble(config.clone(), store);
        let shutdown = orchestrator.shutdown_token();
        let queue = state.tasks.queue();
        orchestrator.start();

        recover_tasks(state.store.as_ref(), &queue, &registry)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Task recovery failed");
                AppError::from(e)
            })?;

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Reconciliation service listener bound");

        Ok(Self {
            port,
            listener,
            state,
            shutdown,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Token that stops the worker dispatcher.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);

        tracing::info!(
            service = "reconciliation-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.listener, router).await;
        self.shutdown.cancel();

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
