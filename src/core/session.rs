use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::events::{ModelCenterState, ModelRowState};
use crate::models::{Catalog, ModelDownloader, ModelManager, ModelSpec};

type StateSender = Arc<watch::Sender<ModelCenterState>>;

enum Operation {
    Install(Vec<ModelSpec>),
    Delete(ModelSpec),
}

impl Operation {
    fn describe(&self) -> String {
        match self {
            Operation::Install(specs) => {
                let ids: Vec<&str> = specs.iter().map(|spec| spec.id.as_str()).collect();
                format!("install [{}]", ids.join(", "))
            }
            Operation::Delete(spec) => format!("delete {}", spec.id),
        }
    }
}

/// Single-slot orchestrator for downloads and deletes.
///
/// At most one operation runs at a time; a request made while one is active
/// is dropped, not queued. Rows are published through a watch channel so a
/// UI thread can read the latest snapshot at any time.
pub struct DownloadSession {
    catalog: Arc<Catalog>,
    downloader: Arc<ModelDownloader>,
    runtime: Handle,
    state: StateSender,
    job: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadSession {
    pub fn new(catalog: Arc<Catalog>, downloader: ModelDownloader, runtime: Handle) -> Self {
        let rows = catalog
            .specs()
            .iter()
            .map(|spec| ModelRowState::from_disk(spec, downloader.manager()))
            .collect();
        let (sender, _) = watch::channel(ModelCenterState {
            rows,
            overall_busy: false,
        });
        Self {
            catalog,
            downloader: Arc::new(downloader),
            runtime,
            state: Arc::new(sender),
            job: Mutex::new(None),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn manager(&self) -> &ModelManager {
        self.downloader.manager()
    }

    pub fn state(&self) -> ModelCenterState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ModelCenterState> {
        self.state.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.state.borrow().overall_busy
    }

    /// Recomputes idle rows from disk. Rows with a transfer in flight and
    /// the expanded flag of every row are left alone.
    pub fn refresh(&self) {
        let manager = self.downloader.manager();
        self.state.send_modify(|state| {
            let busy = state.overall_busy;
            for spec in self.catalog.specs() {
                match state.row_mut(&spec.id) {
                    Some(row) if busy && row.is_downloading => {}
                    Some(row) => {
                        let expanded = row.expanded;
                        *row = ModelRowState::from_disk(spec, manager);
                        row.expanded = expanded;
                    }
                    None => state.rows.push(ModelRowState::from_disk(spec, manager)),
                }
            }
        });
    }

    pub fn toggle_expanded(&self, spec_id: &str) {
        self.state.send_modify(|state| {
            if let Some(row) = state.row_mut(spec_id) {
                row.expanded = !row.expanded;
            }
        });
    }

    /// Installs the required specs one after another, stopping at the
    /// first failure. Returns false when another operation is active.
    pub fn install_required(&self) -> bool {
        let specs = self.catalog.required().into_iter().cloned().collect();
        self.start(Operation::Install(specs))
    }

    /// Unknown ids are ignored: the UI may hold a stale identifier.
    pub fn download(&self, spec_id: &str) -> bool {
        let Some(spec) = self.catalog.find(spec_id) else {
            tracing::debug!("ignoring download of unknown model {spec_id}");
            return false;
        };
        self.start(Operation::Install(vec![spec.clone()]))
    }

    pub fn delete(&self, spec_id: &str) -> bool {
        let Some(spec) = self.catalog.find(spec_id) else {
            tracing::debug!("ignoring delete of unknown model {spec_id}");
            return false;
        };
        self.start(Operation::Delete(spec.clone()))
    }

    /// Stops the active transfer at the next chunk boundary. Partial
    /// markers stay on disk so the next download resumes.
    pub fn cancel(&self) {
        self.downloader.cancel_flag().cancel();
    }

    pub async fn wait_idle(&self) {
        let mut receiver = self.state.subscribe();
        let _ = receiver.wait_for(|state| !state.overall_busy).await;
    }

    pub fn shutdown(&self) {
        self.cancel();
        if let Some(job) = self.job.lock().take() {
            job.abort();
        }
    }

    fn start(&self, operation: Operation) -> bool {
        let mut job = self.job.lock();
        let busy = self.state.borrow().overall_busy;
        if busy {
            tracing::debug!("session busy, dropping {}", operation.describe());
            return false;
        }

        tracing::info!("session starting {}", operation.describe());
        self.downloader.cancel_flag().reset();
        self.state.send_modify(|state| state.overall_busy = true);

        let busy = BusyGuard {
            state: self.state.clone(),
            catalog: self.catalog.clone(),
            downloader: self.downloader.clone(),
        };
        let worker = Worker {
            downloader: self.downloader.clone(),
            state: self.state.clone(),
        };
        *job = Some(self.runtime.spawn(async move {
            let _busy = busy;
            worker.run(operation).await;
        }));
        true
    }
}

impl Drop for DownloadSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Releases the slot however the job ends, including an abort before its
/// first poll. Rows left mid-transfer by an abort are re-read from disk.
struct BusyGuard {
    state: StateSender,
    catalog: Arc<Catalog>,
    downloader: Arc<ModelDownloader>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let manager = self.downloader.manager();
        self.state.send_modify(|state| {
            for row in state.rows.iter_mut().filter(|row| row.is_downloading) {
                if let Some(spec) = self.catalog.find(&row.spec_id) {
                    tracing::warn!("{}: transfer interrupted", spec.id);
                    row.interrupt(spec, manager);
                }
            }
            state.overall_busy = false;
        });
    }
}

struct Worker {
    downloader: Arc<ModelDownloader>,
    state: StateSender,
}

impl Worker {
    async fn run(self, operation: Operation) {
        match operation {
            Operation::Install(specs) => self.install(&specs).await,
            Operation::Delete(spec) => self.delete(&spec).await,
        }
        tracing::info!("session idle");
    }

    async fn install(&self, specs: &[ModelSpec]) {
        let manager = self.downloader.manager();

        for spec in specs {
            self.update_row(&spec.id, |row| row.begin("Starting…"));

            let state = self.state.clone();
            let spec_id = spec.id.clone();
            let result = self
                .downloader
                .download(spec, move |event| {
                    state.send_modify(|state| {
                        if let Some(row) = state.row_mut(&spec_id) {
                            row.apply(&event);
                        }
                    });
                })
                .await;

            match result {
                Ok(()) => {
                    let mut installed = false;
                    self.update_row(&spec.id, |row| {
                        row.finish_download(spec, manager);
                        installed = row.error_text.is_none();
                    });
                    if !installed {
                        tracing::error!("{}: download reported success but disk disagrees", spec.id);
                        return;
                    }
                }
                Err(error) => {
                    tracing::error!("{}: download failed: {error}", spec.id);
                    self.update_row(&spec.id, |row| row.fail(spec, manager, &error));
                    return;
                }
            }
        }
    }

    async fn delete(&self, spec: &ModelSpec) {
        let manager = self.downloader.manager();
        self.update_row(&spec.id, |row| row.begin("Deleting…"));
        match self.downloader.delete(spec).await {
            Ok(()) => self.update_row(&spec.id, |row| row.finish_delete(spec, manager)),
            Err(error) => {
                tracing::error!("{}: delete failed: {error}", spec.id);
                self.update_row(&spec.id, |row| row.fail(spec, manager, &error));
            }
        }
    }

    fn update_row<F>(&self, spec_id: &str, apply: F)
    where
        F: FnOnce(&mut ModelRowState),
    {
        self.state.send_modify(|state| {
            if let Some(row) = state.row_mut(spec_id) {
                apply(row);
            }
        });
    }
}
