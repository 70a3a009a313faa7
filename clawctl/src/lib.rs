//! # clawctl: Fleet controller for sandboxed agent containers
//!
//! `clawctl` manages the runtime lifecycle of per-owner agent containers ("claws") once they have
//! been provisioned, and mediates every inference call those containers make.
//!
//! ## Overview
//!
//! Each claw is a deployment record in PostgreSQL plus a container managed through the Docker
//! Engine API. Next to the agent, every container runs a small bridge sidecar that accepts chat
//! turns over HTTP. The controller:
//!
//! - serves an owner API to create, configure, talk to and delete claws,
//! - hands new claws to an external provisioner and records the outcome it reports,
//! - wakes claws on their heartbeat schedule and stores anything they have to say,
//! - warns and then stops unpaid claws when their trial runs out,
//! - proxies inference calls from claws to the upstream API, enforcing per-tier quotas.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum). Handlers and background services
//! share an [`AppState`] holding the stores ([`db::handlers`]) and the two outbound clients, the
//! container runtime ([`runtime`]) and the bridge ([`bridge`]), all behind traits so tests can
//! swap in doubles.
//!
//! ### Request Flow
//!
//! #### Owner API (`/api/v1/*`)
//!
//! The controller sits behind a proxy that authenticates owners and forwards their identity in a
//! trusted header. Handlers extract it with [`auth::CurrentOwner`] and only ever load that
//! owner's claws; anyone else's claw is reported as not found.
//!
//! #### Provisioner API (`/internal/v1/*`)
//!
//! The provisioner polls `GET /claws/pending`, starts containers, and reports the result back with
//! the shared secret from `auth.provisioner_key`.
//!
//! #### Inference gateway (`/llm/v1/messages`)
//!
//! Claws authenticate with their proxy token. See [`gateway`].
//!
//! ### Background services
//!
//! Three loops run alongside the server, each on its own tick and each stoppable through a shared
//! cancellation token:
//!
//! - [`heartbeat::HeartbeatScheduler`]
//! - [`trial::TrialEnforcer`]
//! - [`gateway::retention::UsageRetention`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use clawctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = clawctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     clawctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod bridge;
pub mod config;
mod crypto;
pub mod db;
pub mod environment;
pub mod errors;
pub mod gateway;
pub mod heartbeat;
mod metrics;
mod openapi;
pub mod runtime;
pub mod telemetry;
pub mod trial;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::handlers::{claws, environment as env_handlers, messages, provisioning},
    bridge::{Bridge, HttpBridge},
    db::handlers::{DeploymentStore, MessageStore, PgDeployments, PgMessages, PgUsage, UsageStore},
    environment::EnvironmentManager,
    gateway::retention::UsageRetention,
    heartbeat::HeartbeatScheduler,
    openapi::ApiDoc,
    runtime::{ContainerRuntime, DockerRuntime},
    trial::TrialEnforcer,
};

pub use config::Config;

/// Shared state for handlers and background services.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .deployments(Arc::new(PgDeployments::new(pool.clone())))
///     .usage(Arc::new(PgUsage::new(pool.clone())))
///     .messages(Arc::new(PgMessages::new(pool)))
///     .runtime(Arc::new(DockerRuntime::new(&config.runtime)?))
///     .bridge(Arc::new(HttpBridge::new(&config.bridge)?))
///     .upstream(reqwest::Client::new())
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub deployments: Arc<dyn DeploymentStore>,
    pub usage: Arc<dyn UsageStore>,
    pub messages: Arc<dyn MessageStore>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub bridge: Arc<dyn Bridge>,
    /// Client for the upstream inference API
    pub upstream: reqwest::Client,
}

impl AppState {
    pub fn environment(&self) -> EnvironmentManager {
        EnvironmentManager::new(self.runtime.clone(), self.config.runtime.clone())
    }
}

/// Build the full router: owner API, provisioner API, gateway, docs and health.
pub fn build_router(state: &AppState) -> Router {
    let owner_routes = Router::new()
        .route("/claws", post(claws::create_claw).get(claws::list_claws))
        .route(
            "/claws/{id}",
            get(claws::get_claw).patch(claws::update_claw).delete(claws::delete_claw),
        )
        .route("/claws/{id}/env", get(env_handlers::get_env).put(env_handlers::put_env))
        .route("/claws/{id}/restart", post(env_handlers::restart_claw))
        .route("/claws/{id}/logs", get(env_handlers::get_logs))
        .route("/claws/{id}/messages", get(messages::list_messages).post(messages::send_message))
        .route("/claws/{id}/messages/stream", post(messages::stream_message));

    let provisioner_routes = Router::new()
        .route("/claws/pending", get(provisioning::list_pending))
        .route("/claws/{id}/provision-result", post(provisioning::report_result));

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/llm/v1/messages", post(gateway::proxy_messages))
        .route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api/v1", owner_routes)
        .nest("/internal/v1", provisioner_routes)
        .with_state(state.clone())
        .merge(Scalar::with_url("/api/docs", ApiDoc::openapi()));

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// Handles for the control loops running alongside the server.
///
/// Dropping this cancels the loops through `drop_guard`; [`shutdown`](Self::shutdown) also waits
/// for them to finish their current tick.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Number of loops started
    pub fn len(&self) -> usize {
        self.background_tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.background_tasks.is_empty()
    }

    /// Stop every loop and wait for it to exit
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Start the heartbeat, trial and usage retention loops that are enabled in config
pub fn setup_background_services(state: &AppState, shutdown_token: CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();
    let config = &state.config;

    if config.heartbeat.enabled {
        let scheduler = HeartbeatScheduler::new(
            state.deployments.clone(),
            state.messages.clone(),
            state.bridge.clone(),
            config.heartbeat.clone(),
        );
        background_tasks.push(tokio::spawn(scheduler.run(shutdown_token.clone())));
    } else {
        info!("Heartbeat scheduler disabled");
    }

    if config.trials.enabled {
        let enforcer = TrialEnforcer::new(
            state.deployments.clone(),
            state.messages.clone(),
            state.bridge.clone(),
            state.runtime.clone(),
            config.trials.clone(),
        );
        background_tasks.push(tokio::spawn(enforcer.run(shutdown_token.clone())));
    } else {
        info!("Trial enforcement disabled");
    }

    if config.usage_retention.enabled {
        let retention = UsageRetention::new(state.usage.clone(), config.usage_retention.clone());
        background_tasks.push(tokio::spawn(retention.run(shutdown_token.clone())));
    } else {
        info!("Usage retention disabled");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Owns the router, the database pool and the background loops.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] connects to the database, runs migrations, builds the
///    outbound clients and starts the background loops
/// 2. **Serve**: [`Application::serve`] binds the listener and handles requests
/// 3. **Shutdown**: once the shutdown future resolves, in-flight requests drain, the loops stop
///    and the pool closes
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting fleet controller with configuration: {:#?}", config);

        let pool = db::connect(&config.database).await?;

        let state = AppState::builder()
            .config(config.clone())
            .deployments(Arc::new(PgDeployments::new(pool.clone())))
            .usage(Arc::new(PgUsage::new(pool.clone())))
            .messages(Arc::new(PgMessages::new(pool.clone())))
            .runtime(Arc::new(DockerRuntime::new(&config.runtime)?))
            .bridge(Arc::new(HttpBridge::new(&config.bridge)?))
            .upstream(reqwest::Client::builder().build()?)
            .build();

        if config.gateway.upstream_url.is_none() {
            info!("No inference upstream configured; gateway calls will fail until one is set");
        }

        let bg_services = setup_background_services(&state, CancellationToken::new());
        let router = build_router(&state);

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Fleet controller listening on http://{}", bind_addr);

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Stopping background services...");
        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
