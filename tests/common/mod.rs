//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates an in-memory DB, default config,
//! provider router, rate limiters, and a running scheduler. The
//! [`with_server`] constructor starts Axum on a random port for HTTP-level
//! testing. [`StubProvider`] stands in for a real AI provider.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use altsmith::config::Config;
use altsmith::providers::{
    ImageMetadata, MediaContext, MetadataProvider, ProviderError, ProviderRouter,
};
use altsmith::ratelimit::RateLimiterSet;
use altsmith::scheduler::{self, SchedulerDeps};
use altsmith::server::create_router;
use altsmith::state::AppContext;
use altsmith_common::{ClientId, RunId};
use altsmith_db::models::Run;
use altsmith_db::pool::{get_conn, init_memory_pool, DbPool, PooledConnection};
use altsmith_db::queries::{clients, runs};

/// Test harness wrapping a fully-constructed [`AppContext`] backed by an
/// in-memory database, with the scheduler dispatcher running.
pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub cancel: CancellationToken,
}

impl TestHarness {
    /// Create a new harness with default configuration and in-memory DB.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a harness whose providers come from the configuration. With a
    /// default config no provider has credentials, so generation fails; use
    /// [`with_router`] and stubs for tests that need successful jobs.
    pub fn with_config(config: Config) -> Self {
        let router = altsmith::build_provider_router(&config);
        Self::with_router(config, router)
    }

    /// Create a harness with a custom provider router (usually stubs).
    pub fn with_router(config: Config, router: ProviderRouter) -> Self {
        let db = init_memory_pool().expect("failed to create in-memory pool");
        let config = Arc::new(config);
        let router = Arc::new(router);
        let wp_limits = Arc::new(RateLimiterSet::new(config.wordpress.requests_per_minute));
        let cancel = CancellationToken::new();

        let deps = SchedulerDeps {
            db: db.clone(),
            config: config.clone(),
            router: router.clone(),
            wp_limits: wp_limits.clone(),
        };
        let (scheduler, _dispatcher) = scheduler::spawn(deps, cancel.clone());

        let ctx = AppContext {
            db: db.clone(),
            config,
            router,
            wp_limits,
            scheduler,
        };

        Self { ctx, db, cancel }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::serve(Self::new()).await
    }

    /// Start an Axum server with custom config on a random port.
    pub async fn with_server_config(config: Config) -> (Self, SocketAddr) {
        Self::serve(Self::with_config(config)).await
    }

    /// Start an Axum server with custom config and router on a random port.
    pub async fn with_server_router(config: Config, router: ProviderRouter) -> (Self, SocketAddr) {
        Self::serve(Self::with_router(config, router)).await
    }

    async fn serve(harness: Self) -> (Self, SocketAddr) {
        let app = create_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Grab a pooled connection for direct database assertions.
    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.db).expect("failed to get connection")
    }

    /// Register a client pointing at the given (usually mocked) site.
    pub fn register_client(&self, id: &str, base_url: &str) -> ClientId {
        let client_id = ClientId::parse(id).expect("bad client id in test");
        let conn = self.conn();
        clients::upsert_client(
            &conn,
            &client_id,
            base_url,
            "svc-account",
            "abcd efgh ijkl mnop",
            "en",
            None,
        )
        .expect("failed to register client");
        client_id
    }

    /// Poll a run until it reaches a terminal status.
    pub async fn wait_for_run(&self, run_id: RunId, timeout: Duration) -> Run {
        let deadline = Instant::now() + timeout;
        loop {
            let run = {
                let conn = self.conn();
                runs::get_run(&conn, run_id).expect("run not found while polling")
            };
            if run.is_terminal() {
                return run;
            }
            assert!(
                Instant::now() < deadline,
                "run {run_id} did not finish in time (status: {})",
                run.status
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

/// What a [`StubProvider`] does when asked to generate.
#[derive(Clone, Copy)]
pub enum StubBehavior {
    Succeed,
    FailTransient,
    FailContent,
}

/// Scripted provider for exercising the pipeline without real AI backends.
pub struct StubProvider {
    name: &'static str,
    available: bool,
    behavior: StubBehavior,
    latency: Duration,
    pub calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    /// High-water mark of concurrent generate calls.
    pub max_in_flight: Arc<AtomicUsize>,
}

impl StubProvider {
    pub fn new(name: &'static str, behavior: StubBehavior) -> Self {
        Self {
            name,
            available: true,
            behavior,
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn offline(name: &'static str) -> Self {
        let mut stub = Self::new(name, StubBehavior::Succeed);
        stub.available = false;
        stub
    }

    /// Add a fixed delay per call so overlapping jobs are observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataProvider for StubProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn generate(
        &self,
        _context: &MediaContext,
        language: &str,
    ) -> Result<ImageMetadata, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let live = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(live, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.behavior {
            StubBehavior::Succeed => Ok(ImageMetadata {
                alt_text: format!("A sample photograph described in {language}"),
                title: "Sample photograph".to_string(),
                caption: "A sample caption".to_string(),
                description: "A longer sample description of the photograph.".to_string(),
            }),
            StubBehavior::FailTransient => Err(ProviderError::RateLimited),
            StubBehavior::FailContent => Err(ProviderError::Malformed),
        }
    }
}

/// Build a router whose default order covers the given stub providers.
pub fn stub_router(providers: Vec<StubProvider>) -> ProviderRouter {
    let order = providers.iter().map(|p| p.name().to_string()).collect();
    let mut router = ProviderRouter::new(order);
    for provider in providers {
        router.register(Arc::new(provider));
    }
    router
}
