use clap::Parser;
use spacevec_core::config;
use spacevec_core::rbac::Authority;
use spacevec_core::snapshot::SnapshotManager;
use spacevec_core::storage::SyncWriteAheadLog;
use spacevec_core::{Command, Engine};
use spacevec_server::api::create_router;
use spacevec_server::api::handlers::AppState;
use spacevec_server::api::metrics;
use spacevec_server::cluster;
use spacevec_server::cluster::ClusterNode;
use spacevec_server::coordinator::Coordinator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spacevec", about = "Multi-space vector store")]
struct Args {
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value = config::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    #[arg(long, default_value = config::DEFAULT_SNAPSHOT_DIR)]
    snapshot_dir: PathBuf,

    /// Run as a Raft member with this id. Without it the node is standalone.
    #[arg(long)]
    node_id: Option<u64>,

    /// Address clients use to reach this node; followers redirect writes here.
    #[arg(long)]
    api_addr: Option<String>,

    /// Address peers use for Raft RPCs. Defaults to `api_addr`.
    #[arg(long)]
    rpc_addr: Option<String>,

    /// Admin token that bypasses the token table.
    #[arg(long, env = "SPACEVEC_ROOT_TOKEN", hide_env_values = true)]
    root_token: Option<String>,

    /// Enforce token authorization. Implied by `--root-token`.
    #[arg(long, default_value_t = false)]
    rbac: bool,

    /// Seconds between checkpoints; 0 disables them.
    #[arg(long, default_value_t = config::DEFAULT_CHECKPOINT_INTERVAL_SECS)]
    checkpoint_interval: u64,

    #[arg(long)]
    tls_cert: Option<String>,

    #[arg(long)]
    tls_key: Option<String>,

    #[arg(long, default_value_t = config::DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    shutdown_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("spacevec_server=info".parse()?)
                .add_directive("spacevec_core=info".parse()?),
        )
        .init();

    let args = Args::parse();

    if args.port == 0 {
        eprintln!("Error: port must be > 0");
        std::process::exit(1);
    }
    for dir in [&args.data_dir, &args.snapshot_dir] {
        if dir.exists() && !dir.is_dir() {
            eprintln!("Error: '{}' exists but is not a directory", dir.display());
            std::process::exit(1);
        }
    }
    std::fs::create_dir_all(&args.data_dir)?;

    let root_token = args.root_token.clone().filter(|t| !t.is_empty());
    let rbac_enabled = args.rbac || root_token.is_some();
    if rbac_enabled {
        tracing::info!(root_token = root_token.is_some(), "Token authorization enabled");
    } else {
        tracing::info!("No root token and --rbac off: running in dev mode (no auth)");
    }
    let engine = Arc::new(Engine::new(Authority::new(rbac_enabled, root_token)));
    let snapshots = Arc::new(SnapshotManager::new(&args.snapshot_dir)?);
    let checkpoint_path = args.data_dir.join(config::CHECKPOINT_FILE);
    let wal_path = args.data_dir.join(config::WAL_FILE);

    let coordinator = if let Some(node_id) = args.node_id {
        let api_addr = args
            .api_addr
            .clone()
            .unwrap_or_else(|| format!("127.0.0.1:{}", args.port));
        let rpc_addr = args.rpc_addr.clone().unwrap_or_else(|| api_addr.clone());
        tracing::info!(node_id, %api_addr, %rpc_addr, "Cluster mode");

        let sm = Arc::new(cluster::store::StateMachineStore::new(Arc::clone(&engine)));
        let log_store = cluster::store::LogStore::default();
        let network = cluster::network::NetworkFactory::new();
        let raft_config = Arc::new(
            openraft::Config {
                heartbeat_interval: 500,
                election_timeout_min: 1500,
                election_timeout_max: 3000,
                ..Default::default()
            }
            .validate()?,
        );
        let raft = cluster::Raft::new(node_id, raft_config, network, log_store, sm).await?;
        tracing::info!(node_id, "Raft node initialized");
        Coordinator::cluster(node_id, ClusterNode::new(api_addr, rpc_addr), Arc::new(raft))
    } else {
        recover(&engine, &checkpoint_path, &args.data_dir)?;
        let wal = Arc::new(SyncWriteAheadLog::open(&args.data_dir)?);
        Coordinator::standalone(Arc::clone(&engine), wal, checkpoint_path.clone())
    };
    let coordinator = Arc::new(coordinator);

    let prometheus_handle =
        metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        engine: Arc::clone(&engine),
        coordinator: Arc::clone(&coordinator),
        snapshots,
        data_dir: args.data_dir.clone(),
        prometheus_handle,
        start_time: Instant::now(),
    };

    let mut app = create_router(state);
    if let Some(raft) = coordinator.raft() {
        let raft_state = cluster::api::RaftState {
            raft: Arc::clone(raft),
        };
        app = app.merge(cluster::api::raft_router(raft_state));
    }

    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        data_dir = %args.data_dir.display(),
        snapshot_dir = %args.snapshot_dir.display(),
        checkpoint_interval_secs = args.checkpoint_interval,
        tls = args.tls_cert.is_some(),
        cluster_mode = args.node_id.is_some(),
        spaces = engine.list_spaces().len(),
        "spacevec ready"
    );

    let metrics_engine = Arc::clone(&engine);
    let metrics_wal_path = wal_path.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            interval.tick().await;
            metrics::update_space_metrics(&metrics_engine);
            metrics::update_wal_metrics(&metrics_wal_path);
        }
    });

    if args.checkpoint_interval > 0 && args.node_id.is_none() {
        let checkpoint_coordinator = Arc::clone(&coordinator);
        let every = args.checkpoint_interval;
        tracing::info!("Checkpoints enabled every {}s", every);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(every));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = checkpoint_coordinator.checkpoint().await {
                    tracing::error!(error = %e, "Periodic checkpoint failed; WAL preserved");
                }
            }
        });
    }

    let shutdown_timeout = args.shutdown_timeout;
    match (args.tls_cert, args.tls_key) {
        (Some(cert), Some(key)) => {
            tracing::info!("TLS enabled");
            let tls_config =
                axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key).await?;
            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                wait_for_signal().await;
                shutdown_handle.graceful_shutdown(Some(Duration::from_secs(shutdown_timeout)));
            });
            axum_server::bind_rustls(addr.parse()?, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        (None, None) => {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(wait_for_signal())
                .await?;
        }
        _ => {
            eprintln!("Error: Both --tls-cert and --tls-key must be provided together");
            std::process::exit(1);
        }
    }

    final_checkpoint(&coordinator, shutdown_timeout).await;
    if let Some(raft) = coordinator.raft() {
        if let Err(e) = raft.shutdown().await {
            tracing::error!(error = %e, "Raft shutdown failed");
        }
    }
    Ok(())
}

/// Load the last checkpoint, then replay the WAL on top of it.
fn recover(
    engine: &Engine,
    checkpoint_path: &std::path::Path,
    data_dir: &std::path::Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if !engine.load_checkpoint(checkpoint_path)? {
        tracing::info!("No checkpoint found, starting empty");
    }

    let wal = SyncWriteAheadLog::open(data_dir)?;
    let (entries, stats) = wal.replay::<Command>()?;
    if stats.crc_errors > 0 || stats.truncated {
        tracing::warn!(
            ok = stats.success,
            crc_errors = stats.crc_errors,
            truncated = stats.truncated,
            "WAL replay stopped early"
        );
    }
    if !entries.is_empty() {
        let total = entries.len();
        // Rejected commands were rejected the first time too.
        let applied = entries
            .into_iter()
            .map(|cmd| engine.apply(cmd))
            .filter(Result::is_ok)
            .count();
        tracing::info!(applied, total, "WAL replay complete");
    }
    Ok(())
}

async fn final_checkpoint(coordinator: &Coordinator, timeout_secs: u64) {
    tracing::info!("All requests drained, writing final checkpoint...");
    let deadline = Duration::from_secs(timeout_secs);
    match tokio::time::timeout(deadline, coordinator.checkpoint()).await {
        Ok(Ok(true)) => tracing::info!("Final checkpoint written"),
        Ok(Ok(false)) => tracing::info!("Cluster mode: state lives in the Raft log"),
        Ok(Err(e)) => tracing::error!(error = %e, "Final checkpoint failed; WAL preserved"),
        Err(_) => tracing::error!(
            "Shutdown checkpoint timeout ({}s) exceeded; WAL preserved",
            timeout_secs
        ),
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    tracing::info!("Shutting down gracefully, draining in-flight requests...");
}
