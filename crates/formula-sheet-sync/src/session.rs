use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::coalescer::{CoalescerState, GridView, WriteCoalescer};
use crate::config::SessionConfig;
use crate::error::{Result, SyncError};
use crate::service::{BatchRequest, BatchResponse, SheetBackend};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub edits: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub refreshes: u64,
    pub failed_refreshes: u64,
}

struct Shared {
    tab: String,
    /// Bumped on every tab switch; work started under an older generation
    /// must not touch the grid.
    generation: u64,
    coalescer: WriteCoalescer,
    last_error: Option<String>,
    stats: SessionStats,
}

enum Command {
    Edited { generation: u64 },
    Flush(oneshot::Sender<Result<Option<BatchResponse>>>),
    Refresh(oneshot::Sender<Result<()>>),
    SwitchTab(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<Result<()>>),
}

/// Interactive edit session for one active tab.
///
/// Edits are applied to the local grid immediately; a background task owns
/// the single debounce deadline and, once edits have been quiet for
/// `config.debounce`, submits them as one batch. A failed batch reverts its
/// cells and records the error in [`EditSession::last_error`]; it is not
/// retried. A successful batch is followed by a re-read of `config.window` so
/// values computed by the server show up.
///
/// Must be spawned from within a tokio runtime.
pub struct EditSession {
    shared: Arc<Mutex<Shared>>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl EditSession {
    pub fn spawn<B: SheetBackend>(backend: Arc<B>, tab: impl Into<String>, config: SessionConfig) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            tab: tab.into(),
            generation: 0,
            coalescer: WriteCoalescer::default(),
            last_error: None,
            stats: SessionStats::default(),
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            backend,
            shared: Arc::clone(&shared),
            config,
        };
        let task = tokio::spawn(worker.run(rx));
        Self {
            shared,
            commands: tx,
            task,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().expect("edit session mutex poisoned")
    }

    pub fn active_tab(&self) -> String {
        self.lock().tab.clone()
    }

    /// Apply an edit to the cell at absolute 0-indexed sheet position
    /// `(row_index, col_index)` and (re)arm the debounce deadline.
    pub fn apply_edit(&self, row_index: u32, col_index: u32, value: impl Into<String>) -> Result<()> {
        if self.commands.is_closed() {
            return Err(SyncError::SessionClosed);
        }
        let generation = {
            let mut shared = self.lock();
            shared.coalescer.apply_edit(row_index, col_index, value)?;
            shared.stats.edits += 1;
            shared.generation
        };
        self.commands
            .send(Command::Edited { generation })
            .map_err(|_| SyncError::SessionClosed)
    }

    /// Commit pending edits now instead of waiting for the debounce.
    ///
    /// Returns `Ok(None)` if there was nothing to commit.
    pub async fn flush(&self) -> Result<Option<BatchResponse>> {
        self.request(Command::Flush).await
    }

    /// Re-read the configured window of the active tab.
    pub async fn refresh(&self) -> Result<()> {
        self.request(Command::Refresh).await
    }

    /// Make `tab` the active tab and load its window.
    ///
    /// Pending edits of the previous tab that have not been submitted are
    /// dropped along with the armed deadline. A batch already in flight
    /// completes against its own tab, but its outcome no longer touches the
    /// grid.
    pub async fn switch_tab(&self, tab: impl Into<String>) -> Result<()> {
        {
            let mut shared = self.lock();
            shared.generation = shared.generation.wrapping_add(1);
            shared.tab = tab.into();
            shared.coalescer.reset(GridView::default());
            shared.last_error = None;
        }
        self.request(Command::SwitchTab).await
    }

    pub fn state(&self) -> CoalescerState {
        self.lock().coalescer.state()
    }

    pub fn cell(&self, row_index: u32, col_index: u32) -> Option<String> {
        self.lock()
            .coalescer
            .grid()
            .get(row_index, col_index)
            .map(str::to_string)
    }

    pub fn grid(&self) -> GridView {
        self.lock().coalescer.grid().clone()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().coalescer.pending_len()
    }

    /// User-facing description of the last failed commit or refresh.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.lock().stats
    }

    /// Commit outstanding edits and stop the background task.
    pub async fn shutdown(self) -> Result<()> {
        let result = self.request(Command::Shutdown).await;
        if let Err(err) = self.task.await {
            log::warn!("edit session task ended abnormally: {err}");
        }
        result
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| SyncError::SessionClosed)?;
        rx.await.map_err(|_| SyncError::SessionClosed)?
    }
}

struct Worker<B> {
    backend: Arc<B>,
    shared: Arc<Mutex<Shared>>,
    config: SessionConfig,
}

impl<B: SheetBackend> Worker<B> {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().expect("edit session mutex poisoned")
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        // Handle dropped without `shutdown`.
                        if let Err(err) = self.commit().await {
                            log::warn!("final commit failed: {err}");
                        }
                        break;
                    };
                    match command {
                        Command::Edited { generation } => {
                            if generation == self.lock().generation {
                                deadline = Some(Instant::now() + self.config.debounce);
                            }
                        }
                        Command::Flush(reply) => {
                            deadline = None;
                            let _ = reply.send(self.commit().await);
                        }
                        Command::Refresh(reply) => {
                            let _ = reply.send(self.refresh().await);
                        }
                        Command::SwitchTab(reply) => {
                            deadline = None;
                            let _ = reply.send(self.refresh().await);
                        }
                        Command::Shutdown(reply) => {
                            let _ = reply.send(self.commit().await.map(|_| ()));
                            break;
                        }
                    }
                }
                () = wait_until(deadline) => {
                    deadline = None;
                    if let Err(err) = self.commit().await {
                        log::warn!("debounced commit failed: {err}");
                    }
                }
            }

            if deadline.is_none() && self.lock().coalescer.has_pending() {
                deadline = Some(Instant::now() + self.config.debounce);
            }
        }
    }

    async fn commit(&self) -> Result<Option<BatchResponse>> {
        let (tab, generation, batch) = {
            let mut shared = self.lock();
            let Some(batch) = shared.coalescer.begin_commit() else {
                return Ok(None);
            };
            (shared.tab.clone(), shared.generation, batch)
        };

        let request = BatchRequest::from(batch.writes());
        let outcome = self.backend.submit_batch(&tab, request).await;
        match outcome {
            Ok(response) => {
                {
                    let mut shared = self.lock();
                    if shared.generation == generation {
                        shared.coalescer.commit_succeeded(&batch);
                        shared.last_error = None;
                    }
                    shared.stats.commits += 1;
                }
                log::info!("committed {} edit(s) to tab {tab:?}", batch.len());
                // A failed re-read is recorded in `last_error`; the commit itself stands.
                let _ = self.refresh_tab(tab, generation).await;
                Ok(Some(response))
            }
            Err(err) => {
                let mut shared = self.lock();
                if shared.generation == generation {
                    let reverted = shared.coalescer.commit_failed(&batch);
                    log::warn!(
                        "batch for tab {tab:?} failed, reverted {} cell(s): {err}",
                        reverted.len()
                    );
                    shared.coalescer.settle();
                    shared.last_error = Some(format!("Update failed: {err}"));
                }
                shared.stats.rollbacks += 1;
                Err(err)
            }
        }
    }

    async fn refresh(&self) -> Result<()> {
        let (tab, generation) = {
            let shared = self.lock();
            (shared.tab.clone(), shared.generation)
        };
        self.refresh_tab(tab, generation).await
    }

    async fn refresh_tab(&self, tab: String, generation: u64) -> Result<()> {
        let outcome = self
            .backend
            .fetch_window(&tab, &self.config.window)
            .await
            .and_then(|window| Ok((window.origin()?, window.values)));
        match outcome {
            Ok((origin, values)) => {
                let mut shared = self.lock();
                if shared.generation == generation {
                    shared.coalescer.reconcile(origin, values);
                    shared.stats.refreshes += 1;
                }
                Ok(())
            }
            Err(err) => {
                log::warn!("failed to refresh tab {tab:?}: {err}");
                let mut shared = self.lock();
                if shared.generation == generation {
                    shared.last_error = Some(format!("Data unavailable: {err}"));
                }
                shared.stats.failed_refreshes += 1;
                Err(err)
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
