use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a jinad-related operation.
pub type JinadResult<T> = Result<T, JinadError>;

/// An error that occurred inside the daemon or one of its partial daemons.
#[derive(Debug, Error)]
pub enum JinadError {
    /// A malformed request body or identifier.
    #[error("validation error: {0}")]
    Validation(String),

    /// An identifier that is not present in the relevant store.
    #[error("`{0}` not found in store")]
    UnknownObject(String),

    /// A component was posted against a workspace that is not ACTIVE.
    #[error("workspace `{0}` is not ready")]
    WorkspaceNotReady(String),

    /// The Docker build returned an error, or the resulting image is missing.
    #[error("image build failed: {0}")]
    ImageBuildFailed(String),

    /// Docker refused to run the container.
    #[error("container launch failed: {kind}: {detail}")]
    ContainerLaunchFailed {
        /// What class of launch failure occurred.
        kind: LaunchFailure,
        /// Human-readable detail, e.g. the conflicting `ip:port`.
        detail: String,
    },

    /// The container started but its health endpoint never answered.
    #[error("partial daemon at `{0}` did not become reachable")]
    PartialDaemonUnreachable(String),

    /// The partial daemon returned a non-2xx response; the body is carried
    /// verbatim so clients see the worker's actual trace.
    #[error("partial daemon error: {body}")]
    PartialDaemonError {
        /// The response body, unchanged.
        body: String,
    },

    /// The Docker socket disappeared mid-operation.
    #[error("docker daemon unavailable: {0}")]
    DockerUnavailable(String),

    /// A daemonfile pointed at a Dockerfile that does not exist.
    #[error("dockerfile not found: {}", .0.display())]
    InvalidDockerfile(PathBuf),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Docker API client.
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// A serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// Classes of container launch failure the gateway distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchFailure {
    /// A requested host port is already bound.
    PortConflict,

    /// The device driver (typically GPU) could not be selected.
    DeviceUnavailable,

    /// The workspace image or network is missing.
    NotFound,
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl JinadError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> JinadError {
        JinadError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// The taxonomy name surfaced to clients as `detail`.
    pub fn name(&self) -> &'static str {
        match self {
            JinadError::Validation(_) => "ValidationError",
            JinadError::UnknownObject(_) => "UnknownObject",
            JinadError::WorkspaceNotReady(_) => "WorkspaceNotReady",
            JinadError::ImageBuildFailed(_) => "ImageBuildFailed",
            JinadError::ContainerLaunchFailed { .. } => "ContainerLaunchFailed",
            JinadError::PartialDaemonUnreachable(_) => "PartialDaemonUnreachable",
            JinadError::PartialDaemonError { .. } => "PartialDaemonError",
            JinadError::DockerUnavailable(_) => "DockerUnavailable",
            JinadError::InvalidDockerfile(_) => "InvalidDockerfile",
            JinadError::Io(_) => "IoError",
            JinadError::Docker(_) => "DockerError",
            JinadError::HttpRequest(_) => "HttpRequestError",
            JinadError::Serde(_) => "SerializationError",
            JinadError::JoinError(_) => "JoinError",
            JinadError::Custom(_) => "InternalError",
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `JinadResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> JinadResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for LaunchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LaunchFailure::PortConflict => "port conflict",
            LaunchFailure::DeviceUnavailable => "device unavailable",
            LaunchFailure::NotFound => "not found",
        };
        f.write_str(s)
    }
}

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
