// ABOUTME: Main entry point for Agentboard - binds the HTTP/WebSocket server and starts periodic tasks

use std::collections::HashMap;
use std::sync::Arc;

use agentboard::config::AppConfig;
use agentboard::http;
use agentboard::logs::LogScanner;
use agentboard::matcher::MatcherHandle;
use agentboard::registry::SessionRegistry;
use agentboard::resume::ResumeManager;
use agentboard::state::AppState;
use agentboard::store::Store;
use agentboard::tmux::{LocalTmuxAdapter, RemoteTmuxAdapter, TmuxAdapter};

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    setup_panic_handler();

    let config = AppConfig::from_env();
    let local_adapter: Arc<dyn TmuxAdapter> = Arc::new(LocalTmuxAdapter::new());

    prune_stale_ws_sessions(&config, &local_adapter).await;
    ensure_base_session(&config, &local_adapter).await?;

    let store = open_store()?;

    let (remote_trait_adapters, remote_map, remote_concrete) = build_remote_adapters(&config);
    for adapter in remote_concrete {
        let poll_interval = config.remote_poll_interval;
        tokio::spawn(async move {
            loop {
                adapter.probe().await;
                tokio::time::sleep(poll_interval).await;
            }
        });
    }

    let matcher = MatcherHandle::spawn(local_adapter.clone(), config.scrollback_lines);

    let (log_tx, log_rx) = tokio::sync::mpsc::channel(8);
    let scanner = LogScanner::new(
        config.claude_projects_dir(),
        config.codex_sessions_dir(),
        config.log_poll_max,
    );
    let poll_interval = config.log_poll_interval;
    tokio::spawn(async move { scanner.run(log_tx, poll_interval).await });

    let registry = SessionRegistry::spawn(
        config.clone(),
        store.clone(),
        local_adapter.clone(),
        remote_trait_adapters,
        matcher,
        log_rx,
    )
    .await;

    let resume = Arc::new(ResumeManager::new(
        store.clone(),
        local_adapter.clone(),
        registry.clone(),
        &config,
    ));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        store,
        registry,
        resume,
        local_adapter,
        remote_adapters: Arc::new(remote_map),
        shutdown: shutdown_tx.clone(),
    });

    let app = http::router(state);
    let addr = format!("{}:{}", config.hostname, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "agentboard listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    Ok(())
}

async fn prune_stale_ws_sessions(config: &AppConfig, adapter: &Arc<dyn TmuxAdapter>) {
    if !config.prune_ws_sessions {
        return;
    }
    let Ok(sessions) = adapter.list_sessions().await else {
        return;
    };
    for session in sessions.into_iter().filter(|s| s.starts_with("agentboard-ws-")) {
        if let Err(e) = adapter.kill_session(&session).await {
            warn!(session, error = %e, "failed to prune stale helper session");
        }
    }
}

async fn ensure_base_session(config: &AppConfig, adapter: &Arc<dyn TmuxAdapter>) -> Result<()> {
    if !adapter.has_session(&config.tmux_session).await.unwrap_or(false) {
        adapter.new_session(&config.tmux_session).await?;
    }
    Ok(())
}

fn open_store() -> Result<Store> {
    let dir = dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".agentboard");
    std::fs::create_dir_all(&dir)?;
    Ok(Store::open(dir.join("agentboard.db"))?)
}

#[allow(clippy::type_complexity)]
fn build_remote_adapters(
    config: &AppConfig,
) -> (
    Vec<Arc<dyn TmuxAdapter>>,
    HashMap<String, Arc<dyn TmuxAdapter>>,
    Vec<Arc<RemoteTmuxAdapter>>,
) {
    let mut map = HashMap::new();
    let mut concrete = Vec::new();
    for host in &config.remote_hosts {
        let adapter = Arc::new(RemoteTmuxAdapter::new(
            host.clone(),
            config.remote_ssh_opts.clone(),
            config.remote_timeout,
            config.remote_stale,
        ));
        map.insert(host.clone(), adapter.clone() as Arc<dyn TmuxAdapter>);
        concrete.push(adapter);
    }
    let trait_vec = map.values().cloned().collect();
    (trait_vec, map, concrete)
}

/// Resolves once SIGINT/SIGTERM fires, and cascades that shutdown to every
/// open connection first, so each disposes its terminal proxy (killing the
/// helper tmux session) before the process exits.
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, disposing live terminal proxies");
    let _ = shutdown_tx.send(());
}

fn setup_logging() {
    use tracing_subscriber::prelude::*;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentboard=info".into()),
        )
        .init();
}

fn setup_panic_handler() {
    use tracing::error;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("agentboard panicked: {panic_info}");
    }));
}
