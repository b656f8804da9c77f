use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::UpdateContext;
use crate::download::{DownloadError, DownloadProgress, DownloadedArtifact, Downloader};
use crate::install::{InstallError, Installer};
use crate::update::{DistributionClient, UpdateDescriptor};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);

const PROGRESS_BUFFER: usize = 16;

/// Answers whether an update is available. Failures are reported as `None`.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn poll(&self, context: &UpdateContext) -> Option<UpdateDescriptor>;
}

#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(
        &self,
        descriptor: &UpdateDescriptor,
        progress: &mpsc::Sender<DownloadProgress>,
    ) -> Result<DownloadedArtifact, DownloadError>;
}

#[async_trait]
pub trait ArtifactInstaller: Send + Sync {
    async fn install(&self, artifact: DownloadedArtifact) -> Result<(), InstallError>;
}

#[async_trait]
impl UpdateSource for DistributionClient {
    async fn poll(&self, context: &UpdateContext) -> Option<UpdateDescriptor> {
        self.check(context).await
    }
}

#[async_trait]
impl ArtifactFetcher for Downloader {
    async fn fetch(
        &self,
        descriptor: &UpdateDescriptor,
        progress: &mpsc::Sender<DownloadProgress>,
    ) -> Result<DownloadedArtifact, DownloadError> {
        self.download(descriptor, progress).await
    }
}

#[async_trait]
impl ArtifactInstaller for Installer {
    async fn install(&self, artifact: DownloadedArtifact) -> Result<(), InstallError> {
        let installer = self.clone();
        tokio::task::spawn_blocking(move || installer.install(artifact))
            .await
            .map_err(InstallError::Aborted)?
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Download,
    Install,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => f.write_str("download"),
            Self::Install => f.write_str("install"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFailure {
    pub stage: FailureStage,
    pub release: String,
    pub message: String,
    /// The executable may be missing; the process should stop.
    pub fatal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    Available(UpdateDescriptor),
    Downloading(DownloadProgress),
    Installing { release: String },
    Installed { release: String },
    Failed(UpdateFailure),
}

/// What a call to [`UpdateTrigger::confirm`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Nothing was armed, or another attempt was already running.
    Ignored,
    Installed,
    Failed,
    /// Shutdown was requested while downloading.
    Cancelled,
}

#[derive(Debug)]
enum TriggerState {
    Disarmed,
    Armed(UpdateDescriptor),
    InFlight,
    /// An install committed or failed fatally; nothing re-arms.
    Finished,
}

struct Shared {
    context: UpdateContext,
    source: Arc<dyn UpdateSource>,
    fetcher: Arc<dyn ArtifactFetcher>,
    installer: Arc<dyn ArtifactInstaller>,
    events: mpsc::Sender<UpdateEvent>,
    shutdown: CancellationToken,
    state: Mutex<TriggerState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn emit(&self, event: UpdateEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Update event dropped, no listener");
        }
    }

    /// Returns true when the descriptor was not already armed.
    fn arm(&self, descriptor: &UpdateDescriptor) -> bool {
        let mut state = self.state();
        match &*state {
            TriggerState::Disarmed => {}
            TriggerState::Armed(current) if current != descriptor => {}
            TriggerState::Armed(_) | TriggerState::InFlight | TriggerState::Finished => {
                return false;
            }
        }
        *state = TriggerState::Armed(descriptor.clone());
        true
    }

    fn take_armed(&self) -> Option<UpdateDescriptor> {
        let mut state = self.state();
        if !matches!(&*state, TriggerState::Armed(_)) {
            return None;
        }
        match std::mem::replace(&mut *state, TriggerState::InFlight) {
            TriggerState::Armed(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    fn settle(&self, next: TriggerState) {
        *self.state() = next;
    }

    async fn download(
        &self,
        descriptor: &UpdateDescriptor,
    ) -> Result<DownloadedArtifact, DownloadError> {
        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_BUFFER);
        let fetch = async move { self.fetcher.fetch(descriptor, &progress_tx).await };
        let forward = async {
            while let Some(progress) = progress_rx.recv().await {
                self.emit(UpdateEvent::Downloading(progress)).await;
            }
        };
        let (result, ()) = tokio::join!(fetch, forward);
        result
    }

    async fn fail(&self, stage: FailureStage, release: &str, message: String, fatal: bool) {
        if fatal {
            error!("Update {release} failed during {stage}: {message}");
        } else {
            warn!("Update {release} failed during {stage}: {message}");
        }
        self.emit(UpdateEvent::Failed(UpdateFailure {
            stage,
            release: release.to_string(),
            message,
            fatal,
        }))
        .await;
    }

    async fn attempt(&self, descriptor: UpdateDescriptor) -> AttemptOutcome {
        let release = descriptor.name.clone();
        info!("Downloading update {release} from {}", descriptor.url);

        let downloaded = tokio::select! {
            () = self.shutdown.cancelled() => {
                info!("Update {release} cancelled during download");
                self.settle(TriggerState::Disarmed);
                return AttemptOutcome::Cancelled;
            }
            result = self.download(&descriptor) => result,
        };
        let artifact = match downloaded {
            Ok(artifact) => artifact,
            Err(error) => {
                self.settle(TriggerState::Disarmed);
                self.fail(FailureStage::Download, &release, error.to_string(), false)
                    .await;
                return AttemptOutcome::Failed;
            }
        };

        self.emit(UpdateEvent::Installing {
            release: release.clone(),
        })
        .await;

        match self.installer.install(artifact).await {
            Ok(()) => {
                self.settle(TriggerState::Finished);
                info!("Update {release} installed, shutting down");
                self.emit(UpdateEvent::Installed { release }).await;
                self.shutdown.cancel();
                AttemptOutcome::Installed
            }
            Err(error) => {
                let fatal = error.is_fatal();
                self.settle(if fatal {
                    TriggerState::Finished
                } else {
                    TriggerState::Disarmed
                });
                self.fail(FailureStage::Install, &release, error.to_string(), fatal)
                    .await;
                if fatal {
                    self.shutdown.cancel();
                }
                AttemptOutcome::Failed
            }
        }
    }
}

/// Polls for updates and runs confirmed attempts.
///
/// Only one attempt is ever in flight. A committed install cancels the
/// shutdown token exactly once; so does a failed install whose rollback also
/// failed.
pub struct UpdateOrchestrator {
    shared: Arc<Shared>,
    check_interval: Duration,
}

impl UpdateOrchestrator {
    #[must_use]
    pub fn new(
        context: UpdateContext,
        source: Arc<dyn UpdateSource>,
        fetcher: Arc<dyn ArtifactFetcher>,
        installer: Arc<dyn ArtifactInstaller>,
        events: mpsc::Sender<UpdateEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                context,
                source,
                fetcher,
                installer,
                events,
                shutdown,
                state: Mutex::new(TriggerState::Disarmed),
            }),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    #[must_use]
    pub fn trigger(&self) -> UpdateTrigger {
        UpdateTrigger {
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Check now, then every interval, until the shutdown token is cancelled.
    pub async fn run(&self) {
        let shared = &self.shared;
        info!(
            "Checking for updates to {} every {}s",
            shared.context.version,
            self.check_interval.as_secs()
        );

        loop {
            let update = tokio::select! {
                () = shared.shutdown.cancelled() => break,
                update = shared.source.poll(&shared.context) => update,
            };

            if let Some(descriptor) = update
                && shared.arm(&descriptor)
            {
                info!("Update {} is available", descriptor.name);
                shared.emit(UpdateEvent::Available(descriptor)).await;
            }

            tokio::select! {
                () = shared.shutdown.cancelled() => break,
                () = tokio::time::sleep(self.check_interval) => {}
            }
        }

        debug!("Update polling stopped");
    }
}

/// Handle used to confirm an armed update from another task.
#[derive(Clone)]
pub struct UpdateTrigger {
    shared: Arc<Shared>,
}

impl UpdateTrigger {
    /// Whether an update is waiting for confirmation.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        matches!(&*self.shared.state(), TriggerState::Armed(_))
    }

    /// Download and install the armed update on the calling task.
    pub async fn confirm(&self) -> AttemptOutcome {
        let Some(descriptor) = self.shared.take_armed() else {
            debug!("Update confirmation ignored, nothing armed");
            return AttemptOutcome::Ignored;
        };
        self.shared.attempt(descriptor).await
    }
}
