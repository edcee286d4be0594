//! `jinad` is the remote control daemon: it owns the stores, the Docker
//! gateway, and the workspace worker pool, and serves the REST/WebSocket API.
//!
//! ## Usage
//!
//! ```bash
//! jinad --port 8000 --workspace-root ~/.jinad --workers 4
//! ```
//!
//! The process exits non-zero when the Docker socket is unreachable at
//! startup or when the HTTP port cannot be bound.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use clap::Parser;
use jinad::{
    api::{app, AppState},
    cli::JinadArgs,
    config::DEFAULT_WORKSPACE_ROOT,
    docker::Dockerizer,
    stores::DaemonStores,
    tasks,
};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = JinadArgs::parse();

    let workspace_root = args
        .workspace_root
        .unwrap_or_else(|| DEFAULT_WORKSPACE_ROOT.clone());
    if let Err(e) = std::fs::create_dir_all(&workspace_root) {
        tracing::error!(
            "cannot create workspace root {}: {}",
            workspace_root.display(),
            e
        );
        std::process::exit(1);
    }

    let stores = Arc::new(DaemonStores::load(
        &workspace_root,
        args.ip_range_start,
        args.subnet_size,
        Duration::from_secs(args.timeout),
    ));

    // No Docker, no daemon.
    let gateway = match Dockerizer::connect(
        &workspace_root,
        &args.rootdir,
        stores.workspaces.allocator(),
    )
    .await
    {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            tracing::error!(
                "docker client cannot connect to dockerd: {}. \
                 please start jinad with access to /var/run/docker.sock",
                e
            );
            std::process::exit(1);
        }
    };

    // Reloaded entries whose containers are gone are stale; drop them before
    // serving.
    stores.prune_stale(&gateway).await;

    let queue = tasks::start_workers(args.workers, Arc::clone(&stores), Arc::clone(&gateway));

    let state = Arc::new(AppState {
        stores,
        gateway,
        queue,
    });

    let addr = SocketAddr::new(args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("cannot bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("jinad listening on {}", addr);

    if let Err(e) = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("server error: {}", e);
        std::process::exit(1);
    }
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("signal handler installation cannot fail");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT signal");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM signal");
        }
    }
}
