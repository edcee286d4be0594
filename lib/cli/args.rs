use std::{net::IpAddr, net::Ipv4Addr, path::PathBuf};

use clap::Parser;

use crate::{
    config::{
        DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_IP_RANGE_START, DEFAULT_NUM_WORKERS,
        DEFAULT_SERVER_PORT, DEFAULT_SUBNET_SIZE,
    },
    models::ContainerKind,
};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// `jinad` manages search-engine components as Docker containers on one host
#[derive(Debug, Parser)]
#[command(name = "jinad", author, version)]
pub struct JinadArgs {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind the HTTP server to
    #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
    pub port: u16,

    /// Directory that holds workspaces and store snapshots
    #[arg(long)]
    pub workspace_root: Option<PathBuf>,

    /// Number of workspace build workers
    #[arg(long, default_value_t = DEFAULT_NUM_WORKERS)]
    pub workers: usize,

    /// Outer timeout for HTTP calls to Docker and partial daemons, in seconds
    #[arg(long, default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    pub timeout: u64,

    /// First address of the workspace subnet pool
    #[arg(long, default_value_t = DEFAULT_IP_RANGE_START)]
    pub ip_range_start: Ipv4Addr,

    /// Prefix length of each workspace subnet
    #[arg(long, default_value_t = DEFAULT_SUBNET_SIZE)]
    pub subnet_size: u8,

    /// Daemon root directory used as the `devel` build context
    #[arg(long, default_value = ".")]
    pub rootdir: PathBuf,
}

/// `partial-daemon` runs inside a component container and owns one worker
#[derive(Debug, Parser)]
#[command(name = "partial-daemon", author, version)]
pub struct PartialDaemonArgs {
    /// Port the partial daemon's HTTP server listens on
    #[arg(long)]
    pub port_expose: u16,

    /// Which component kind this daemon hosts
    #[arg(long)]
    pub mode: ContainerKind,

    /// The owning workspace, for log context
    #[arg(long)]
    pub workspace_id: Option<String>,
}
