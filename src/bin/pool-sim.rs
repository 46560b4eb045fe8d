//! Drives the affinity pool against a simulated host runtime.
//!
//! Connections move Idle → Connecting → Ready (or TransientFailure) after a
//! random delay. Sessions bind a key, issue bound calls and unbind, the way a
//! session-oriented RPC client would.

use affinity_pool::config::watcher::ConfigWatcher;
use affinity_pool::config::{
    load_config, AffinityCommand, AffinityConfig, MethodConfig, PoolConfig,
};
use affinity_pool::observability::{logging, metrics};
use affinity_pool::pool::{HostError, NewConnectionOptions};
use affinity_pool::routing::{Call, MethodAffinityMap, RouteError};
use affinity_pool::{
    Address, CallRouter, ConnectionHandle, ConnectionHost, ConnectionState, PoolManager,
    RoutingSnapshot,
};
use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

const CREATE_SESSION: &str = "/sim.Sessions/CreateSession";
const EXECUTE: &str = "/sim.Sessions/Execute";
const DELETE_SESSION: &str = "/sim.Sessions/DeleteSession";

#[derive(Parser)]
#[command(name = "pool-sim")]
#[command(about = "Run a session workload through the affinity pool against a simulated host", long_about = None)]
struct Cli {
    /// Pool configuration file (TOML, or JSON API config).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the configuration file when it changes.
    #[arg(long, requires = "config")]
    watch: bool,

    /// Number of resolved backend addresses.
    #[arg(long, default_value_t = 3)]
    addresses: usize,

    /// Concurrent sessions.
    #[arg(long, default_value_t = 20)]
    sessions: usize,

    /// Bound calls issued per session.
    #[arg(long, default_value_t = 10)]
    calls_per_session: usize,

    /// Probability that a connection attempt ends in transient failure.
    #[arg(long, default_value_t = 0.1)]
    failure_rate: f64,

    /// Attempts per call before giving up on retryable errors.
    #[arg(long, default_value_t = 50)]
    max_attempts: u32,
}

type StateEvent = (ConnectionHandle, ConnectionState);

/// In-process stand-in for the RPC runtime.
struct SimHost {
    runtime: Handle,
    next_id: AtomicU64,
    publications: AtomicU64,
    failure_rate: f64,
    events: mpsc::UnboundedSender<StateEvent>,
}

impl SimHost {
    fn emit_later(&self, events: Vec<(u64, StateEvent)>) {
        let tx = self.events.clone();
        self.runtime.spawn(async move {
            for (delay_ms, event) in events {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                if tx.send(event).is_err() {
                    return;
                }
            }
        });
    }
}

impl ConnectionHost for SimHost {
    fn create_connection(
        &self,
        addresses: &[Address],
        options: NewConnectionOptions,
    ) -> Result<ConnectionHandle, HostError> {
        if self.events.is_closed() {
            return Err(HostError::Closed);
        }
        if addresses.is_empty() {
            return Err(HostError::Rejected("no addresses".into()));
        }
        let handle = ConnectionHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::debug!(
            handle = %handle,
            addresses = addresses.len(),
            health_check = options.health_check_enabled,
            "Sim: connection created"
        );
        Ok(handle)
    }

    fn connect(&self, handle: ConnectionHandle) {
        let outcome = if fastrand::f64() < self.failure_rate {
            ConnectionState::TransientFailure
        } else {
            ConnectionState::Ready
        };
        let mut events = vec![
            (fastrand::u64(1..10), (handle, ConnectionState::Connecting)),
            (fastrand::u64(5..40), (handle, outcome)),
        ];
        if outcome == ConnectionState::TransientFailure {
            events.push((fastrand::u64(20..60), (handle, ConnectionState::Idle)));
        }
        self.emit_later(events);
    }

    fn update_addresses(&self, handle: ConnectionHandle, addresses: &[Address]) {
        tracing::debug!(handle = %handle, addresses = addresses.len(), "Sim: addresses updated");
    }

    fn remove_connection(&self, handle: ConnectionHandle) {
        self.emit_later(vec![(1, (handle, ConnectionState::Shutdown))]);
    }

    fn publish(&self, snapshot: Arc<RoutingSnapshot>) {
        self.publications.fetch_add(1, Ordering::Relaxed);
        tracing::info!(state = %snapshot.state, "Sim: routing snapshot published");
    }
}

fn default_config() -> PoolConfig {
    let rule = |name: &str, command, key: &str| MethodConfig {
        name: vec![name.to_string()],
        affinity: Some(AffinityConfig {
            command,
            affinity_key: key.to_string(),
        }),
    };
    PoolConfig {
        methods: vec![
            rule(CREATE_SESSION, AffinityCommand::Bind, "name"),
            rule(EXECUTE, AffinityCommand::Bound, "session"),
            rule(DELETE_SESSION, AffinityCommand::Unbind, "name"),
        ],
        ..PoolConfig::default()
    }
}

/// Begin a call, retrying retryable failures with a short pause.
async fn begin_with_retry(
    router: &CallRouter<Arc<SimHost>>,
    method: &str,
    request: &Value,
    max_attempts: u32,
) -> Result<Call, RouteError> {
    let mut attempt = 1;
    loop {
        match router.begin(method, request) {
            Ok(call) => return Ok(call),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::debug!(method, attempt, error = %e, "Retrying call");
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn run_session(
    router: Arc<CallRouter<Arc<SimHost>>>,
    id: usize,
    calls: usize,
    max_attempts: u32,
) -> Result<usize, RouteError> {
    let name = format!("sessions/{id}");

    let create = begin_with_retry(&router, CREATE_SESSION, &json!({}), max_attempts).await?;
    tokio::time::sleep(Duration::from_millis(fastrand::u64(1..5))).await;
    create.finish(Some(&json!({ "name": name })))?;

    let mut done = 0;
    for _ in 0..calls {
        let request = json!({ "session": name, "sql": "SELECT 1" });
        let call = begin_with_retry(&router, EXECUTE, &request, max_attempts).await?;
        tokio::time::sleep(Duration::from_millis(fastrand::u64(1..5))).await;
        call.finish(Some(&json!({ "rows": 1 })))?;
        done += 1;
    }

    let delete = begin_with_retry(&router, DELETE_SESSION, &json!({ "name": name }), max_attempts).await?;
    delete.finish(Some(&json!({})))?;
    Ok(done)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => default_config(),
    };
    logging::init(&config.observability.log_level);
    tracing::info!(
        policy = affinity_pool::POLICY_NAME,
        max_size = config.channel_pool.max_size,
        max_streams = config.channel_pool.max_concurrent_streams_low_watermark,
        methods = config.methods.len(),
        "pool-sim starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let host = Arc::new(SimHost {
        runtime: Handle::current(),
        next_id: AtomicU64::new(0),
        publications: AtomicU64::new(0),
        failure_rate: cli.failure_rate.clamp(0.0, 1.0),
        events: events_tx,
    });
    let pool = PoolManager::new(host.clone(), &config.channel_pool);
    let methods = Arc::new(MethodAffinityMap::from_config(&config.methods));
    let router = Arc::new(CallRouter::new(pool.clone(), methods.clone()));

    let driver = {
        let pool = pool.clone();
        tokio::spawn(async move {
            while let Some((handle, state)) = events_rx.recv().await {
                pool.on_connection_state_change(handle, state);
            }
        })
    };

    let _watcher = if cli.watch {
        let path = cli.config.clone().unwrap_or_default();
        let (watcher, mut updates) = ConfigWatcher::new(&path);
        let watcher = watcher.run()?;
        let pool = pool.clone();
        let methods = methods.clone();
        tokio::spawn(async move {
            while let Some(new_config) = updates.recv().await {
                pool.update_pool_config(&new_config.channel_pool);
                methods.reload(&new_config.methods);
            }
        });
        Some(watcher)
    } else {
        None
    };

    let addresses = (0..cli.addresses.max(1))
        .map(|i| Address::new(format!("10.0.0.{}:443", i + 1)))
        .collect();
    pool.on_addresses_resolved(Ok(addresses));

    let sessions: Vec<_> = (0..cli.sessions)
        .map(|id| {
            tokio::spawn(run_session(
                router.clone(),
                id,
                cli.calls_per_session,
                cli.max_attempts,
            ))
        })
        .collect();

    let (mut completed, mut failed) = (0usize, 0usize);
    for session in sessions {
        match session.await {
            Ok(Ok(calls)) => completed += calls,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Session failed");
                failed += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "Session task panicked");
                failed += 1;
            }
        }
    }

    let report = json!({
        "aggregate_state": pool.aggregate_state(),
        "pool_size": pool.pool_size(),
        "affinity_keys": pool.affinity_len(),
        "publications": host.publications.load(Ordering::Relaxed),
        "bound_calls_completed": completed,
        "sessions_failed": failed,
        "connections": pool.connection_stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    pool.close();
    tokio::time::sleep(Duration::from_millis(20)).await;
    driver.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}
