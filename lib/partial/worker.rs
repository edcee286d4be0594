//! The worker seam of the partial daemon.
//!
//! The managed search component is a black box: a process exposing a health
//! endpoint and per-kind control endpoints. The partial daemon talks to it
//! only through the [`Worker`] trait, so the store and API layers never care
//! what actually runs underneath; [`ProcessWorker`] is the real
//! implementation, spawning the component runtime and driving its control
//! endpoints.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use nix::{sys::signal::{kill, Signal}, unistd::Pid};
use serde_json::Value;
use tokio::process::{Child, Command};

use crate::{
    config::RANDOM_PORT_MIN,
    models::ContainerKind,
    JinadError, JinadResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Executable of the managed component runtime.
const WORKER_BIN: &str = "jina";

/// Grace period before a closing worker is hard-killed.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Port fields a spec may declare; unset ones are resolved to free ports.
const PORT_FIELDS: [&str; 4] = ["port_in", "port_out", "port_ctrl", "port_expose"];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The one object a partial daemon owns.
#[async_trait]
pub trait Worker: Send + Sync {
    /// The kind of component this worker runs.
    fn kind(&self) -> ContainerKind;

    /// The worker's declared arguments, including resolved ports.
    fn arguments(&self) -> Value;

    /// Changes the replica count.
    async fn scale(&mut self, replicas: u32) -> JinadResult<()>;

    /// Replaces the executor configuration while serving.
    async fn rolling_update(
        &mut self,
        uses_with: Value,
        pod_name: Option<String>,
    ) -> JinadResult<()>;

    /// Gracefully shuts the worker down.
    async fn close(&mut self) -> JinadResult<()>;
}

/// Creates workers from specs; injected so tests can substitute fakes.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    /// Instantiates and starts a worker from a component spec.
    async fn create(&self, kind: ContainerKind, params: Value) -> JinadResult<Box<dyn Worker>>;
}

/// Runs the component as a child process of the partial daemon.
pub struct ProcessWorker {
    kind: ContainerKind,
    arguments: Value,
    child: Child,
    http: reqwest::Client,
    control_port: Option<u16>,
}

/// Factory for [`ProcessWorker`]s.
#[derive(Debug, Default)]
pub struct ProcessWorkerFactory;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProcessWorker {
    /// Resolves unset port fields in the spec to free ports, spawns the
    /// runtime, and records the resolved arguments.
    async fn start(kind: ContainerKind, params: Value) -> JinadResult<Self> {
        let mut arguments = match params {
            Value::Object(map) => Value::Object(map),
            Value::Null => Value::Object(Default::default()),
            other => {
                return Err(JinadError::Validation(format!(
                    "component spec must be an object, got {}",
                    other
                )))
            }
        };

        resolve_ports(&mut arguments)?;

        let control_port = arguments
            .get("port_ctrl")
            .and_then(|p| p.as_u64())
            .map(|p| p as u16);

        let mut command = Command::new(WORKER_BIN);
        command.arg(kind.as_str());
        for (key, value) in spec_to_args(&arguments) {
            command.arg(format!("--{}", key.replace('_', "-"))).arg(value);
        }
        command.kill_on_drop(true);

        tracing::info!("starting worker: {:?}", command);
        let child = command.spawn()?;

        Ok(Self {
            kind,
            arguments,
            child,
            http: reqwest::Client::new(),
            control_port,
        })
    }

    fn control_uri(&self, suffix: &str) -> JinadResult<String> {
        let port = self.control_port.ok_or_else(|| {
            JinadError::Validation("worker has no control port".to_string())
        })?;
        Ok(format!("http://localhost:{}/{}", port, suffix))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Fills every unset port field with a free port at or above the random-port
/// floor the container environment advertises.
fn resolve_ports(arguments: &mut Value) -> JinadResult<()> {
    let object = arguments
        .as_object_mut()
        .expect("arguments checked to be an object");

    for field in PORT_FIELDS {
        if matches!(object.get(field), Some(Value::Number(_))) {
            continue;
        }
        // Declared-but-null fields are resolved; port_ctrl always exists
        // since the control endpoints hang off it.
        if !object.contains_key(field) && field != "port_ctrl" {
            continue;
        }
        let listener = std::net::TcpListener::bind(("0.0.0.0", 0))?;
        let mut port = listener.local_addr()?.port();
        if port < RANDOM_PORT_MIN {
            port = RANDOM_PORT_MIN + (port % 1000);
        }
        object.insert(field.to_string(), Value::from(port));
    }
    Ok(())
}

/// Flattens a spec object into CLI argument pairs, skipping nulls and nested
/// structures the runtime reads from its own config files.
fn spec_to_args(arguments: &Value) -> Vec<(String, String)> {
    let mut args = Vec::new();
    if let Some(object) = arguments.as_object() {
        for (key, value) in object {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            args.push((key.clone(), rendered));
        }
    }
    args
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Worker for ProcessWorker {
    fn kind(&self) -> ContainerKind {
        self.kind
    }

    fn arguments(&self) -> Value {
        self.arguments.clone()
    }

    async fn scale(&mut self, replicas: u32) -> JinadResult<()> {
        let uri = self.control_uri("scale")?;
        let response = self
            .http
            .put(uri)
            .query(&[("replicas", replicas)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(JinadError::custom(anyhow::anyhow!(
                "worker refused scale: {}",
                response.status()
            )));
        }
        self.arguments["replicas"] = Value::from(replicas);
        Ok(())
    }

    async fn rolling_update(
        &mut self,
        uses_with: Value,
        pod_name: Option<String>,
    ) -> JinadResult<()> {
        let uri = self.control_uri("rolling_update")?;
        let mut body: BTreeMap<&str, Value> = BTreeMap::from([("uses_with", uses_with.clone())]);
        if let Some(pod_name) = &pod_name {
            body.insert("pod_name", Value::from(pod_name.clone()));
        }
        let response = self.http.put(uri).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(JinadError::custom(anyhow::anyhow!(
                "worker refused rolling_update: {}",
                response.status()
            )));
        }
        self.arguments["uses_with"] = uses_with;
        Ok(())
    }

    async fn close(&mut self) -> JinadResult<()> {
        if let Some(pid) = self.child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        match tokio::time::timeout(CLOSE_TIMEOUT, self.child.wait()).await {
            Ok(status) => {
                tracing::info!("worker exited with {:?}", status?);
            }
            Err(_) => {
                tracing::warn!("worker did not exit in time, killing");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerFactory for ProcessWorkerFactory {
    async fn create(&self, kind: ContainerKind, params: Value) -> JinadResult<Box<dyn Worker>> {
        Ok(Box::new(ProcessWorker::start(kind, params).await?))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_to_args_skips_nested_values() {
        let spec = serde_json::json!({
            "name": "indexer",
            "replicas": 2,
            "quiet": true,
            "uses_with": {"foo": "bar"},
            "upload": null,
        });
        let args = spec_to_args(&spec);
        assert!(args.contains(&("name".to_string(), "indexer".to_string())));
        assert!(args.contains(&("replicas".to_string(), "2".to_string())));
        assert!(args.contains(&("quiet".to_string(), "true".to_string())));
        assert!(!args.iter().any(|(k, _)| k == "uses_with" || k == "upload"));
    }

    #[test]
    fn test_resolve_ports_fills_declared_nulls() {
        let mut spec = serde_json::json!({
            "port_in": 45001,
            "port_out": null,
        });
        resolve_ports(&mut spec).unwrap();
        assert_eq!(spec["port_in"], 45001);
        assert!(spec["port_out"].is_number());
        assert!(spec["port_ctrl"].is_number());
    }
}
