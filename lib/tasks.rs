//! The workspace worker pool.
//!
//! Request handlers never build anything themselves: they enqueue a
//! `(workspace id, files)` job and answer immediately with PENDING. A fixed
//! set of workers drains the queue, and each job drives the file manager and
//! the Docker gateway to produce an image, a network, and, when the
//! daemonfile declares a `run` command, a custom container.

use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::{mpsc, Mutex};

use crate::{
    config::DaemonFile,
    docker::Dockerizer,
    files::{self, UploadedFile},
    logs::WorkspaceLog,
    models::{DaemonID, WorkspaceArguments, WorkspaceItem, WorkspaceMetadata, WorkspaceState},
    stores::DaemonStores,
    JinadError, JinadResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One unit of work for the pool.
#[derive(Debug)]
pub struct WorkspaceJob {
    /// The workspace to build or rebuild.
    pub id: DaemonID,

    /// Files uploaded with the request, possibly none on a rebuild.
    pub files: Vec<UploadedFile>,
}

/// Producer half of the build queue, held by the request handlers.
pub type JobSender = mpsc::UnboundedSender<WorkspaceJob>;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Starts `count` workers draining one shared queue and returns its producer.
pub fn start_workers(
    count: usize,
    stores: Arc<DaemonStores>,
    gateway: Arc<Dockerizer>,
) -> JobSender {
    let (tx, rx) = mpsc::unbounded_channel::<WorkspaceJob>();
    let rx = Arc::new(Mutex::new(rx));

    for worker in 0..count {
        let rx = Arc::clone(&rx);
        let stores = Arc::clone(&stores);
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            loop {
                // Hold the receiver lock only while dequeueing, so workers
                // process jobs concurrently.
                let job = rx.lock().await.recv().await;
                let Some(job) = job else {
                    tracing::debug!("worker {} shutting down, queue closed", worker);
                    break;
                };
                tracing::info!("worker {} picked up workspace {}", worker, job.id);
                process_job(worker, &stores, &gateway, job).await;
            }
        });
    }

    tx
}

/// Runs one build job, downgrading any failure to FAILED on the workspace.
async fn process_job(
    worker: usize,
    stores: &DaemonStores,
    gateway: &Arc<Dockerizer>,
    job: WorkspaceJob,
) {
    let id = job.id;
    if let Err(e) = build_workspace(worker, stores, gateway, job).await {
        tracing::error!("error while building workspace {}: {}", id, e);
        if let Err(update_err) = stores
            .workspaces
            .update_state(&id, WorkspaceState::Failed)
            .await
        {
            tracing::error!("could not mark {} FAILED: {}", id, update_err);
        }
        let workdir = stores.workspaces.workdir(&id);
        if let Ok(mut log) = WorkspaceLog::open(&workdir, format!("worker{}", worker)) {
            log.error(&format!("build failed: {}", e));
        }
    }
}

/// The actual build: store files, parse the daemonfile, ensure the network,
/// build the image, replace the custom container if one is declared, then
/// flip the workspace ACTIVE. No partial result is ever exposed as ACTIVE.
async fn build_workspace(
    worker: usize,
    stores: &DaemonStores,
    gateway: &Arc<Dockerizer>,
    job: WorkspaceJob,
) -> JinadResult<()> {
    let id = job.id;
    let workspaces = &stores.workspaces;

    let existing = workspaces
        .get(&id)
        .await
        .ok_or_else(|| JinadError::UnknownObject(id.to_string()))?;

    let state = if existing.arguments.is_some() {
        WorkspaceState::Updating
    } else {
        WorkspaceState::Creating
    };
    workspaces.update_state(&id, state).await?;

    let workdir = workspaces.workdir(&id);
    files::store_files(&workdir, &job.files)?;

    let mut log = WorkspaceLog::open(&workdir, format!("worker{}", worker))?;
    log.info(&format!("workspace {} is now {}", id, state));

    let daemon_file = DaemonFile::parse(&workdir)?;
    let requirements = files::requirements(&workdir);

    let network = gateway.network(&id).await?;
    log.info(&format!("network {} is ready", network));

    let image_id = gateway.build(&id, &daemon_file, &requirements).await?;
    log.info(&format!("image {} is built", image_id));

    // A rebuilt workspace replaces its custom container; the old one goes
    // before the new one starts.
    if let Some(previous) = existing
        .metadata
        .as_ref()
        .and_then(|m| m.container_id.clone())
    {
        log.info(&format!("deleting previous container {}", previous));
        match gateway.rm_container(&previous).await {
            Ok(()) | Err(JinadError::UnknownObject(_)) => {}
            Err(e) => return Err(e),
        }
    }

    let (container_id, ports) = match daemon_file.run() {
        Some(run) => {
            let ports: BTreeMap<String, u16> = daemon_file
                .ports()
                .iter()
                .map(|p| (format!("{}/tcp", p), *p))
                .collect();
            let outcome = gateway
                .run(&id, &id, run, &ports, &BTreeMap::new(), None)
                .await?;
            log.info(&format!("custom container {} started", outcome.container_id));
            (Some(outcome.container_id), daemon_file.ports().to_vec())
        }
        None => (None, Vec::new()),
    };

    let mut file_names: Vec<String> = existing
        .arguments
        .map(|args| args.files)
        .unwrap_or_default();
    file_names.extend(job.files.iter().map(|f| f.filename.clone()));

    let managed_objects = existing
        .metadata
        .map(|m| m.managed_objects)
        .unwrap_or_default();

    let item = WorkspaceItem {
        state: WorkspaceState::Active,
        metadata: Some(
            WorkspaceMetadata::builder()
                .image_id(image_id)
                .image_name(id.tag())
                .network(network)
                .workdir(workdir.clone())
                .container_id(container_id)
                .ports(ports)
                .managed_objects(managed_objects)
                .build(),
        ),
        arguments: Some(WorkspaceArguments {
            files: file_names,
            dockerfile: daemon_file.dockerfile_name(),
            requirements,
        }),
    };
    workspaces.update_item(&id, item).await?;

    log.info(&format!("workspace {} is updated", id));
    Ok(())
}
