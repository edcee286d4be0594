//! The partial daemon's store: exactly one worker, owned for the lifetime of
//! the container.

use serde_json::Value;
use tokio::sync::Mutex;

use crate::{models::ContainerKind, JinadError, JinadResult};

use super::{Worker, WorkerFactory};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Holds the single worker a partial daemon is responsible for.
pub struct PartialStore {
    kind: ContainerKind,
    worker: Mutex<Option<Box<dyn Worker>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PartialStore {
    /// Creates an empty store for one component kind.
    pub fn new(kind: ContainerKind) -> Self {
        Self {
            kind,
            worker: Mutex::new(None),
        }
    }

    /// The kind this partial daemon hosts.
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Instantiates the worker from a spec and returns its declared
    /// arguments. A second create is refused; the store owns exactly one.
    pub async fn add(
        &self,
        factory: &dyn WorkerFactory,
        params: Value,
    ) -> JinadResult<Value> {
        let mut slot = self.worker.lock().await;
        if slot.is_some() {
            return Err(JinadError::Validation(format!(
                "this partial daemon already owns a {}",
                self.kind
            )));
        }

        let worker = factory.create(self.kind, params).await?;
        let arguments = worker.arguments();
        *slot = Some(worker);
        tracing::info!("{} object is now ready to use!", self.kind);
        Ok(arguments)
    }

    /// The worker's current arguments.
    pub async fn get(&self) -> JinadResult<Value> {
        let slot = self.worker.lock().await;
        slot.as_ref()
            .map(|worker| worker.arguments())
            .ok_or_else(|| JinadError::UnknownObject(self.kind.to_string()))
    }

    /// Delegates a scale to the worker and returns its updated arguments.
    pub async fn scale(&self, replicas: u32) -> JinadResult<Value> {
        let mut slot = self.worker.lock().await;
        let worker = slot
            .as_mut()
            .ok_or_else(|| JinadError::UnknownObject(self.kind.to_string()))?;
        worker.scale(replicas).await?;
        Ok(worker.arguments())
    }

    /// Delegates a rolling update and returns the updated arguments.
    pub async fn rolling_update(
        &self,
        uses_with: Value,
        pod_name: Option<String>,
    ) -> JinadResult<Value> {
        let mut slot = self.worker.lock().await;
        let worker = slot
            .as_mut()
            .ok_or_else(|| JinadError::UnknownObject(self.kind.to_string()))?;
        worker.rolling_update(uses_with, pod_name).await?;
        Ok(worker.arguments())
    }

    /// Closes the worker and empties the store.
    pub async fn delete(&self) -> JinadResult<()> {
        let mut slot = self.worker.lock().await;
        match slot.take() {
            Some(mut worker) => {
                worker.close().await?;
                tracing::info!("{} object is closed", self.kind);
                Ok(())
            }
            None => Err(JinadError::UnknownObject(self.kind.to_string())),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;

    /// In-memory worker that records operations on its arguments.
    pub(crate) struct MockWorker {
        kind: ContainerKind,
        arguments: Value,
        pub(crate) fail_ops: bool,
    }

    pub(crate) struct MockFactory {
        pub(crate) fail_create: bool,
        pub(crate) fail_ops: bool,
    }

    #[async_trait]
    impl Worker for MockWorker {
        fn kind(&self) -> ContainerKind {
            self.kind
        }

        fn arguments(&self) -> Value {
            self.arguments.clone()
        }

        async fn scale(&mut self, replicas: u32) -> JinadResult<()> {
            if self.fail_ops {
                return Err(JinadError::custom(anyhow::anyhow!("scale exploded")));
            }
            self.arguments["replicas"] = Value::from(replicas);
            Ok(())
        }

        async fn rolling_update(
            &mut self,
            uses_with: Value,
            _pod_name: Option<String>,
        ) -> JinadResult<()> {
            if self.fail_ops {
                return Err(JinadError::custom(anyhow::anyhow!("rolling exploded")));
            }
            self.arguments["uses_with"] = uses_with;
            Ok(())
        }

        async fn close(&mut self) -> JinadResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl WorkerFactory for MockFactory {
        async fn create(
            &self,
            kind: ContainerKind,
            params: Value,
        ) -> JinadResult<Box<dyn Worker>> {
            if self.fail_create {
                return Err(JinadError::custom(anyhow::anyhow!("boot exploded")));
            }
            let mut arguments = params;
            arguments["port_expose"] = Value::from(12345);
            Ok(Box::new(MockWorker {
                kind,
                arguments,
                fail_ops: self.fail_ops,
            }))
        }
    }

    fn factory() -> MockFactory {
        MockFactory {
            fail_create: false,
            fail_ops: false,
        }
    }

    #[tokio::test]
    async fn test_single_worker_lifecycle() {
        let store = PartialStore::new(ContainerKind::Pod);
        assert!(store.get().await.is_err());

        let args = store
            .add(&factory(), serde_json::json!({"name": "indexer"}))
            .await
            .unwrap();
        assert_eq!(args["port_expose"], 12345);

        // Only one worker per partial daemon.
        assert!(matches!(
            store.add(&factory(), Value::Null).await,
            Err(JinadError::Validation(_))
        ));

        store.delete().await.unwrap();
        assert!(store.get().await.is_err());
        assert!(store.delete().await.is_err());
    }

    #[tokio::test]
    async fn test_scale_and_rolling_update_record_arguments() {
        let store = PartialStore::new(ContainerKind::Pod);
        store
            .add(&factory(), serde_json::json!({"replicas": 1}))
            .await
            .unwrap();

        let args = store.scale(3).await.unwrap();
        assert_eq!(args["replicas"], 3);

        let args = store
            .rolling_update(serde_json::json!({"foo": "bar-new"}), None)
            .await
            .unwrap();
        assert_eq!(args["uses_with"]["foo"], "bar-new");
        assert_eq!(args["replicas"], 3);
    }

    #[tokio::test]
    async fn test_failed_operation_keeps_worker() {
        let store = PartialStore::new(ContainerKind::Pod);
        store
            .add(
                &MockFactory {
                    fail_create: false,
                    fail_ops: true,
                },
                serde_json::json!({"replicas": 1}),
            )
            .await
            .unwrap();

        assert!(store.scale(3).await.is_err());
        // The worker survives a failed operation; nothing is retried.
        let args = store.get().await.unwrap();
        assert_eq!(args["replicas"], 1);
    }
}
