//! Gateway to the local Docker daemon.
//!
//! All image, container, and network operations go through the [`Dockerizer`];
//! nothing else in the daemon touches the Docker socket. The gateway also owns
//! the subnet allocator that hands each workspace its own bridge network
//! range.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use bollard::{
    body_full,
    errors::Error as DockerError,
    models::{
        ContainerCreateBody, DeviceRequest, HostConfig, Ipam, IpamConfig, NetworkCreateRequest,
        PortBinding,
    },
    query_parameters::{
        BuildImageOptions, CreateContainerOptions, InspectContainerOptions, InspectNetworkOptions,
        ListNetworksOptions, LogsOptions, RemoveContainerOptions, RemoveImageOptions,
        StartContainerOptions, StopContainerOptions,
    },
    Docker,
};
use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use futures::StreamExt;
use regex::Regex;

use crate::{
    config::{
        DaemonFile, CONTAINER_WORKSPACE_DIR, DOCKER_SOCKET, LOG_SUBDIR, RANDOM_PORT_MIN,
    },
    models::{DaemonID, IdKind},
    JinadError, JinadResult, LaunchFailure,
};

use super::{Subnet, SubnetAllocator};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Name the composed Dockerfile is injected into the build context under.
const CONTEXT_DOCKERFILE: &str = "Dockerfile.jinad";

/// Grace period before a container is hard-killed on stop, in seconds.
const STOP_TIMEOUT_SECS: i32 = 5;

static ERROR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(error|exception|failed|failure|critical)\b").unwrap());

static WARNING_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)warning").unwrap());

static BOUND_ADDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d{1,3}){3}:\d+)").unwrap());

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What a container run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Docker id of the started container.
    pub container_id: String,

    /// Id of the network the container joined.
    pub network: String,

    /// Ports that were published, keyed by their `<port>/tcp` form.
    pub ports: BTreeMap<String, u16>,
}

/// Outcome of a removal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// The object is gone.
    Removed,

    /// Network removal was skipped because containers are still attached.
    SkippedNetworkInUse {
        /// Names of the containers still on the network.
        containers: Vec<String>,
    },
}

/// Wraps the local Docker daemon and the workspace subnet allocator.
pub struct Dockerizer {
    client: Docker,
    workspace_root: PathBuf,
    rootdir: PathBuf,
    allocator: Arc<SubnetAllocator>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Dockerizer {
    /// Connects to the local Docker daemon and verifies it answers.
    ///
    /// `workspace_root` is where workspace directories live on the host;
    /// `rootdir` is the daemon's own root, used as the build context for
    /// `devel` builds.
    pub async fn connect(
        workspace_root: impl Into<PathBuf>,
        rootdir: impl Into<PathBuf>,
        allocator: Arc<SubnetAllocator>,
    ) -> JinadResult<Self> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| JinadError::DockerUnavailable(e.to_string()))?;
        client
            .ping()
            .await
            .map_err(|e| JinadError::DockerUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            workspace_root: workspace_root.into(),
            rootdir: rootdir.into(),
            allocator,
        })
    }

    /// Builds the workspace image and returns its id.
    ///
    /// The build context is assembled from the daemonfile's context directory
    /// with the resolved Dockerfile injected into it; output lines are
    /// classified and re-logged as they stream in.
    pub async fn build(
        &self,
        workspace_id: &DaemonID,
        daemon_file: &DaemonFile,
        requirements: &str,
    ) -> JinadResult<String> {
        let tag = workspace_id.tag();
        tracing::info!("about to build image {} using {:?}", tag, daemon_file.mode());

        let context_dir = daemon_file.build_context(&self.rootdir);
        let dockerfile = daemon_file.dockerfile_contents()?;
        let context = build_context_tar(context_dir, &dockerfile)?;

        let buildargs: HashMap<String, String> =
            daemon_file.build_args(requirements).into_iter().collect();

        let options = BuildImageOptions {
            dockerfile: CONTEXT_DOCKERFILE.to_string(),
            t: Some(tag.clone()),
            rm: true,
            buildargs: Some(buildargs),
            ..Default::default()
        };

        let mut stream = self
            .client
            .build_image(options, None, Some(body_full(Bytes::from(context))));

        while let Some(chunk) = stream.next().await {
            let info = chunk?;
            if let Some(error) = info.error {
                let detail = info
                    .error_detail
                    .and_then(|d| d.message)
                    .unwrap_or_else(|| error.clone());
                tracing::error!("{}", detail);
                return Err(JinadError::ImageBuildFailed(detail));
            }
            if let Some(line) = info.stream {
                log_build_line(&line);
            }
        }

        // A clean stream with no image behind the tag is still a failure.
        let image = self.client.inspect_image(&tag).await.map_err(|e| {
            tracing::error!("couldn't find image with name: {} {}", tag, e);
            JinadError::ImageBuildFailed(format!("image `{}` missing after build", tag))
        })?;

        image
            .id
            .map(|id| id_cleaner(&id))
            .ok_or_else(|| JinadError::ImageBuildFailed(format!("image `{}` has no id", tag)))
    }

    /// Runs a container on the workspace's image and network.
    ///
    /// The workspace directory is mounted at the container's working
    /// directory alongside the Docker socket; `host.docker.internal` resolves
    /// to the host gateway. A "port is already allocated" response surfaces as
    /// a port conflict; a "could not select device driver" response is
    /// retried once without device requests.
    pub async fn run(
        &self,
        workspace_id: &DaemonID,
        container_id: &DaemonID,
        entrypoint: &str,
        ports: &BTreeMap<String, u16>,
        envs: &BTreeMap<String, String>,
        device_requests: Option<Vec<DeviceRequest>>,
    ) -> JinadResult<RunOutcome> {
        let image = workspace_id.tag();
        let network = workspace_id.to_string();

        tracing::info!(
            "creating container {} using image {} in network {} with ports {:?}",
            container_id,
            image,
            network,
            ports
        );

        let body = self.container_body(workspace_id, entrypoint, ports, envs, device_requests.clone());

        let result = self.try_run(container_id, body).await;
        let docker_id = match result {
            Err(JinadError::ContainerLaunchFailed {
                kind: LaunchFailure::DeviceUnavailable,
                ..
            }) if device_requests.is_some() => {
                tracing::warn!(
                    "device driver unavailable for {}, retrying once without device requests",
                    container_id
                );
                let body =
                    self.container_body(workspace_id, entrypoint, ports, envs, None);
                self.try_run(container_id, body).await?
            }
            other => other?,
        };

        let network_id = self.network_id(&network).await?;

        Ok(RunOutcome {
            container_id: docker_id,
            network: network_id,
            ports: ports.clone(),
        })
    }

    /// Returns the id of the workspace's bridge network, creating it with a
    /// freshly allocated subnet when it does not exist yet.
    pub async fn network(&self, workspace_id: &DaemonID) -> JinadResult<String> {
        let name = workspace_id.to_string();

        if let Some(id) = self.find_network(&name).await? {
            return Ok(id);
        }

        let Subnet { network, gateway } = self.allocator.allocate()?;
        tracing::info!("creating network {} with subnet {}", name, network);

        let config = NetworkCreateRequest {
            name: name.clone(),
            driver: Some("bridge".to_string()),
            ipam: Some(Ipam {
                config: Some(vec![IpamConfig {
                    subnet: Some(network.to_string()),
                    gateway: Some(gateway.to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self.client.create_network(config).await?;
        Ok(response.id)
    }

    /// Removes the Docker object behind an id, dispatching on its kind:
    /// networks are removed as networks, workspaces as images, everything
    /// else as containers.
    pub async fn remove(&self, id: &DaemonID) -> JinadResult<Removal> {
        match id.kind() {
            IdKind::Network => self.rm_network(&id.to_string()).await,
            IdKind::Workspace => {
                self.rm_image(&id.tag()).await?;
                Ok(Removal::Removed)
            }
            _ => {
                self.rm_container(&id.to_string()).await?;
                Ok(Removal::Removed)
            }
        }
    }

    /// Removes a workspace's network by its workspace id. Residual containers
    /// make this a logged no-op rather than an error.
    pub async fn rm_network(&self, name: &str) -> JinadResult<Removal> {
        let network = match self
            .client
            .inspect_network(name, None::<InspectNetworkOptions>)
            .await
        {
            Ok(network) => network,
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                tracing::error!("couldn't fetch network with id: `{}`", name);
                return Err(JinadError::UnknownObject(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let attached: Vec<String> = network
            .containers
            .unwrap_or_default()
            .into_values()
            .filter_map(|c| c.name)
            .collect();

        if !attached.is_empty() {
            tracing::warn!(
                "skipping removal of network `{}`, containers still attached: {:?}",
                name,
                attached
            );
            return Ok(Removal::SkippedNetworkInUse {
                containers: attached,
            });
        }

        self.client.remove_network(name).await?;
        Ok(Removal::Removed)
    }

    /// Force-removes the image behind a tag.
    pub async fn rm_image(&self, tag: &str) -> JinadResult<()> {
        match self
            .client
            .remove_image(
                tag,
                Some(RemoveImageOptions {
                    force: true,
                    ..Default::default()
                }),
                None,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                tracing::error!("couldn't fetch image with name: `{}`", tag);
                Err(JinadError::UnknownObject(tag.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stops a container (SIGTERM, then a hard timeout) and removes it.
    pub async fn rm_container(&self, name: &str) -> JinadResult<()> {
        match self
            .client
            .stop_container(
                name,
                Some(StopContainerOptions {
                    t: Some(STOP_TIMEOUT_SECS),
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(_) => {}
            // 304: already stopped.
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => {}
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                tracing::error!("couldn't fetch container with name: `{}`", name);
                return Err(JinadError::UnknownObject(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        self.client
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    /// Captures a container's stdout and stderr as one string.
    pub async fn logs(&self, container_id: &DaemonID) -> JinadResult<String> {
        let mut stream = self.client.logs(
            &container_id.to_string(),
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            output.push_str(&String::from_utf8_lossy(&chunk?.into_bytes()));
        }
        Ok(output)
    }

    /// Whether a container with the given name is currently running.
    pub async fn container_running(&self, name: &str) -> bool {
        self.client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .ok()
            .and_then(|c| c.state)
            .and_then(|s| s.running)
            .unwrap_or(false)
    }

    /// The environment injected into every container, before user envs.
    pub fn environment(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "JINA_LOG_WORKSPACE".to_string(),
                format!("{}/{}", CONTAINER_WORKSPACE_DIR, LOG_SUBDIR),
            ),
            (
                "JINA_RANDOM_PORT_MIN".to_string(),
                RANDOM_PORT_MIN.to_string(),
            ),
            (
                "JINA_HUB_ROOT".to_string(),
                format!("{}/.jina/hub-root", CONTAINER_WORKSPACE_DIR),
            ),
            (
                "JINA_HUB_CACHE_DIR".to_string(),
                format!("{}/.cache/jina", CONTAINER_WORKSPACE_DIR),
            ),
            ("HOME".to_string(), CONTAINER_WORKSPACE_DIR.to_string()),
        ])
    }

    //----------------------------------------------------------------------------------------------
    // Methods: Helpers
    //----------------------------------------------------------------------------------------------

    fn container_body(
        &self,
        workspace_id: &DaemonID,
        entrypoint: &str,
        ports: &BTreeMap<String, u16>,
        envs: &BTreeMap<String, String>,
        device_requests: Option<Vec<DeviceRequest>>,
    ) -> ContainerCreateBody {
        let workdir = self.workspace_root.join(workspace_id.to_string());

        let mut environment = self.environment();
        environment.extend(envs.clone());
        let env: Vec<String> = environment
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = ports
            .keys()
            .map(|key| (key.clone(), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = ports
            .iter()
            .map(|(key, host_port)| {
                (
                    key.clone(),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host_port.to_string()),
                    }]),
                )
            })
            .collect();

        ContainerCreateBody {
            image: Some(workspace_id.tag()),
            entrypoint: Some(
                entrypoint
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
            ),
            env: Some(env),
            working_dir: Some(CONTAINER_WORKSPACE_DIR.to_string()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                binds: Some(vec![
                    format!("{}:{}:rw", workdir.display(), CONTAINER_WORKSPACE_DIR),
                    format!("{}:{}", DOCKER_SOCKET, DOCKER_SOCKET),
                ]),
                port_bindings: Some(port_bindings),
                network_mode: Some(workspace_id.to_string()),
                extra_hosts: Some(vec!["host.docker.internal:host-gateway".to_string()]),
                device_requests,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Creates and starts the container, mapping Docker API refusals onto the
    /// launch-failure taxonomy.
    async fn try_run(
        &self,
        container_id: &DaemonID,
        body: ContainerCreateBody,
    ) -> JinadResult<String> {
        let name = container_id.to_string();

        let created = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(name.clone()),
                    ..Default::default()
                }),
                body,
            )
            .await
            .map_err(map_launch_error)?;

        if let Err(e) = self
            .client
            .start_container(&name, None::<StartContainerOptions>)
            .await
        {
            // The conflicting port only surfaces at start; drop the unstarted
            // container so a retry does not hit a name conflict.
            let launch_error = map_launch_error(e);
            if let Err(rm_err) = self
                .client
                .remove_container(
                    &name,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                tracing::warn!("failed to clean up unstarted container {}: {}", name, rm_err);
            }
            return Err(launch_error);
        }

        Ok(created.id)
    }

    async fn find_network(&self, name: &str) -> JinadResult<Option<String>> {
        let networks = self
            .client
            .list_networks(None::<ListNetworksOptions>)
            .await?;
        Ok(networks
            .into_iter()
            .find(|n| n.name.as_deref() == Some(name))
            .and_then(|n| n.id))
    }

    async fn network_id(&self, name: &str) -> JinadResult<String> {
        self.find_network(name)
            .await?
            .ok_or_else(|| JinadError::UnknownObject(name.to_string()))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Short form of a Docker object id: the hash without its algorithm prefix,
/// truncated the way `docker ps` displays it.
pub fn id_cleaner(id: &str) -> String {
    let hash = id.strip_prefix("sha256:").unwrap_or(id);
    hash.chars().take(10).collect()
}

/// Assembles a gzipped tar of the build context with the composed Dockerfile
/// injected into it.
fn build_context_tar(context_dir: &Path, dockerfile: &str) -> JinadResult<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    if context_dir.is_dir() {
        builder.append_dir_all(".", context_dir)?;
    }

    let mut header = tar::Header::new_gnu();
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, CONTEXT_DOCKERFILE, dockerfile.as_bytes())?;

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Re-emits one line of Docker build output at the level its content implies.
fn log_build_line(line: &str) {
    let Some(line) = line.split('\n').next().filter(|l| !l.trim().is_empty()) else {
        return;
    };
    if ERROR_LINE.is_match(line) {
        tracing::error!("{}", line);
    } else if WARNING_LINE.is_match(line) {
        tracing::warn!("{}", line);
    } else {
        tracing::info!("{}", line);
    }
}

/// Maps a Docker create/start refusal onto the launch-failure taxonomy.
fn map_launch_error(e: DockerError) -> JinadError {
    if let DockerError::DockerResponseServerError {
        status_code,
        ref message,
    } = e
    {
        if message.contains("port is already allocated") {
            let detail = BOUND_ADDR
                .find(message)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| message.clone());
            return JinadError::ContainerLaunchFailed {
                kind: LaunchFailure::PortConflict,
                detail,
            };
        }
        if message.contains("could not select device driver") {
            return JinadError::ContainerLaunchFailed {
                kind: LaunchFailure::DeviceUnavailable,
                detail: message.clone(),
            };
        }
        if status_code == 404 {
            return JinadError::ContainerLaunchFailed {
                kind: LaunchFailure::NotFound,
                detail: message.clone(),
            };
        }
    }
    e.into()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_cleaner() {
        assert_eq!(
            id_cleaner("sha256:94e5f06ff8e3d4441dc3cd8b090ff38dc911bfa8adbd0e53439d1ec3d87dbd80"),
            "94e5f06ff8"
        );
        assert_eq!(id_cleaner("94e5f06ff8e3"), "94e5f06ff8");
    }

    #[test]
    fn test_port_conflict_mapping() {
        let err = map_launch_error(DockerError::DockerResponseServerError {
            status_code: 500,
            message: "driver failed programming external connectivity: Bind for 0.0.0.0:45678 \
                      failed: port is already allocated"
                .to_string(),
        });
        match err {
            JinadError::ContainerLaunchFailed { kind, ref detail } => {
                assert_eq!(kind, LaunchFailure::PortConflict);
                assert_eq!(detail, "0.0.0.0:45678");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("port conflict: 0.0.0.0:45678"));
    }

    #[test]
    fn test_device_unavailable_mapping() {
        let err = map_launch_error(DockerError::DockerResponseServerError {
            status_code: 500,
            message: "could not select device driver \"nvidia\" with capabilities: [[gpu]]"
                .to_string(),
        });
        assert!(matches!(
            err,
            JinadError::ContainerLaunchFailed {
                kind: LaunchFailure::DeviceUnavailable,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_image_mapping() {
        let err = map_launch_error(DockerError::DockerResponseServerError {
            status_code: 404,
            message: "No such image: workspace:deadbeef".to_string(),
        });
        assert!(matches!(
            err,
            JinadError::ContainerLaunchFailed {
                kind: LaunchFailure::NotFound,
                ..
            }
        ));
    }

    #[test]
    fn test_context_tar_contains_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "print('hi')\n").unwrap();

        let tarball = build_context_tar(dir.path(), "FROM scratch\n").unwrap();

        let decoder = flate2::read::GzDecoder::new(&tarball[..]);
        let mut archive = tar::Archive::new(decoder);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();

        assert!(names.iter().any(|n| n.ends_with("app.py")));
        assert!(names.iter().any(|n| n.ends_with(CONTEXT_DOCKERFILE)));
    }
}
