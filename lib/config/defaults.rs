use std::{net::Ipv4Addr, path::PathBuf, sync::LazyLock};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The sub directory where jinad workspaces, store snapshots, etc are kept.
pub const JINAD_HOME_DIR: &str = ".jinad";

/// Default port for the daemon's HTTP server.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// First address of the pool that workspace subnets are carved from.
pub const DEFAULT_IP_RANGE_START: Ipv4Addr = Ipv4Addr::new(172, 28, 0, 0);

/// Prefix length of each workspace subnet.
pub const DEFAULT_SUBNET_SIZE: u8 = 24;

/// Default number of workspace worker tasks draining the build queue.
pub const DEFAULT_NUM_WORKERS: usize = 4;

/// Outer timeout for HTTP calls to Docker and partial daemons, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 600;

/// How many times a freshly launched partial daemon is health-polled.
pub const HEALTH_CHECK_RETRIES: u32 = 20;

/// Pause between health polls, in milliseconds.
pub const HEALTH_CHECK_INTERVAL_MS: u64 = 200;

/// Lowest port number the managed worker may pick for itself.
pub const RANDOM_PORT_MIN: u16 = 49153;

/// Where the workspace directory is mounted inside containers.
pub const CONTAINER_WORKSPACE_DIR: &str = "/workspace";

/// The Docker socket, mounted into every container.
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Sub directory of a workspace that holds log files.
pub const LOG_SUBDIR: &str = "logs";

/// Name of the log file tailed by the log streaming service.
pub const LOG_FILENAME: &str = "logging.log";

/// Name of the per-workspace config file.
pub const DAEMONFILE: &str = ".daemonfile";

/// Dockerfile template for the `devel` build mode. Expects a daemon image to
/// be available locally; only pip requirements are installed on top.
pub const DEVEL_DOCKERFILE: &str = include_str!("../../dockerfiles/devel.Dockerfile");

/// Dockerfile template for the `default` (cpu) build mode.
pub const DEFAULT_DOCKERFILE: &str = include_str!("../../dockerfiles/default.Dockerfile");

/// Dockerfile template for the `gpu` build mode.
pub const GPU_DOCKERFILE: &str = include_str!("../../dockerfiles/gpu.Dockerfile");

/// The path where all jinad state lives unless overridden on the command line.
pub static DEFAULT_WORKSPACE_ROOT: LazyLock<PathBuf> =
    LazyLock::new(|| dirs::home_dir().unwrap().join(JINAD_HOME_DIR));
