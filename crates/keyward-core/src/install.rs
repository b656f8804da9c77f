use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::download::DownloadedArtifact;

/// Where an install attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    /// The running executable has not been touched.
    Original,
    /// The running executable was renamed to its aside path.
    Renamed,
    /// The new executable is at the canonical path with permissions applied.
    Replaced,
    /// The archive and aside copy are gone.
    Committed,
    /// The aside copy was moved back to the canonical path.
    RolledBack,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Zip {
        context: &'static str,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{0}")]
    Layout(String),
}

impl ExtractError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    fn zip(context: &'static str, source: zip::result::ZipError) -> Self {
        Self::Zip { context, source }
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to resolve current executable: {0}")]
    ResolveExecutable(#[source] std::io::Error),
    #[error("failed to move {} aside: {source}", path.display())]
    MoveAside {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to extract update: {0}")]
    Extract(#[source] ExtractError),
    #[error("failed to copy permissions to the new executable: {0}")]
    Permissions(#[source] std::io::Error),
    #[error(
        "{cause}; restoring the previous executable also failed, it was left at {}: {source}",
        aside.display()
    )]
    RollbackFailed {
        cause: String,
        aside: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("install task stopped before finishing: {0}")]
    Aborted(#[source] tokio::task::JoinError),
}

impl InstallError {
    /// Whether the canonical path may no longer hold a runnable executable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. } | Self::Aborted(_))
    }
}

/// Replaces an executable on disk with the one inside an update archive.
#[derive(Debug, Clone)]
pub struct Installer {
    executable: PathBuf,
}

impl Installer {
    /// Target the executable of the running process.
    ///
    /// # Errors
    /// Returns an error if the executable path cannot be determined or
    /// canonicalized.
    pub fn for_current_exe() -> Result<Self, InstallError> {
        let executable = std::env::current_exe()
            .and_then(std::fs::canonicalize)
            .map_err(InstallError::ResolveExecutable)?;
        Ok(Self::new(executable))
    }

    #[must_use]
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }

    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Swap the executable for the single file inside `artifact`.
    ///
    /// The current executable is renamed aside before anything is written, so
    /// every failure up to the commit can move it back. The archive is deleted
    /// whatever the outcome.
    ///
    /// Interrupting the process between the rename and the commit is not
    /// guarded against and can leave the executable at its aside path.
    ///
    /// # Errors
    /// Returns an error if the executable cannot be moved aside, the archive
    /// cannot be extracted, or permissions cannot be copied. In the last two
    /// cases the original executable has been restored unless the error is
    /// [`InstallError::RollbackFailed`].
    pub fn install(&self, artifact: DownloadedArtifact) -> Result<(), InstallError> {
        self.swap_in(artifact, copy_permissions)
    }

    fn swap_in(
        &self,
        artifact: DownloadedArtifact,
        permissions: CopyPermissions,
    ) -> Result<(), InstallError> {
        info!(
            "Installing {} over {}",
            artifact.file_name(),
            self.executable.display()
        );

        let mut swap = Swap::begin(&self.executable)?;

        if let Err(error) = swap.replace(artifact.path()) {
            swap.roll_back(&error.to_string())?;
            return Err(InstallError::Extract(error));
        }

        if let Err(error) = swap.apply_permissions(permissions) {
            swap.roll_back(&error.to_string())?;
            return Err(InstallError::Permissions(error));
        }

        swap.commit(artifact);
        info!("Installed update at {}", self.executable.display());
        Ok(())
    }

    /// Remove aside copies left behind by earlier attempts. Nothing is removed
    /// unless the canonical executable exists.
    pub fn cleanup_stale_backups(&self) -> usize {
        if !self.executable.is_file() {
            return 0;
        }
        let (Some(dir), Some(name)) = (
            self.executable.parent(),
            self.executable.file_name().and_then(|n| n.to_str()),
        ) else {
            return 0;
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };

        let prefix = format!("{name}-");
        let mut removed = 0;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(suffix) = file_name.to_str().and_then(|n| n.strip_prefix(&prefix)) else {
                continue;
            };
            if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed stale executable backup {}", path.display());
                    removed += 1;
                }
                Err(error) => warn!("Failed to remove {}: {error}", path.display()),
            }
        }
        removed
    }
}

type CopyPermissions = fn(from: &Path, to: &Path) -> std::io::Result<()>;

fn copy_permissions(from: &Path, to: &Path) -> std::io::Result<()> {
    let permissions = std::fs::metadata(from)?.permissions();
    std::fs::set_permissions(to, permissions)
}

struct Swap<'a> {
    executable: &'a Path,
    aside: PathBuf,
    state: SwapState,
}

impl<'a> Swap<'a> {
    fn begin(executable: &'a Path) -> Result<Self, InstallError> {
        let mut swap = Self {
            executable,
            aside: aside_path(executable),
            state: SwapState::Original,
        };
        std::fs::rename(executable, &swap.aside).map_err(|source| InstallError::MoveAside {
            path: executable.to_path_buf(),
            source,
        })?;
        debug!(
            "Moved {} aside to {}",
            executable.display(),
            swap.aside.display()
        );
        swap.transition(SwapState::Renamed);
        Ok(swap)
    }

    fn transition(&mut self, next: SwapState) {
        debug!("Install state {:?} -> {next:?}", self.state);
        self.state = next;
    }

    fn replace(&self, archive: &Path) -> Result<(), ExtractError> {
        extract_single_file(archive, self.executable)
    }

    fn apply_permissions(&mut self, copy: CopyPermissions) -> std::io::Result<()> {
        copy(&self.aside, self.executable)?;
        self.transition(SwapState::Replaced);
        Ok(())
    }

    fn roll_back(&mut self, cause: &str) -> Result<(), InstallError> {
        warn!("Install failed ({cause}), restoring {}", self.executable.display());

        if let Err(error) = std::fs::remove_file(self.executable)
            && error.kind() != std::io::ErrorKind::NotFound
        {
            debug!("Could not remove partial executable: {error}");
        }

        match std::fs::rename(&self.aside, self.executable) {
            Ok(()) => {
                self.transition(SwapState::RolledBack);
                info!("Restored previous executable");
                Ok(())
            }
            Err(source) => {
                error!(
                    "Failed to restore previous executable from {}: {source}",
                    self.aside.display()
                );
                Err(InstallError::RollbackFailed {
                    cause: cause.to_string(),
                    aside: self.aside.clone(),
                    source,
                })
            }
        }
    }

    fn commit(&mut self, artifact: DownloadedArtifact) {
        let archive = artifact.path().to_path_buf();
        if let Err(error) = artifact.delete() {
            warn!("Failed to remove update archive {}: {error}", archive.display());
        }
        if let Err(error) = std::fs::remove_file(&self.aside) {
            warn!(
                "Failed to remove previous executable {}: {error}",
                self.aside.display()
            );
        }
        self.transition(SwapState::Committed);
    }
}

fn aside_path(executable: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut name = executable.as_os_str().to_os_string();
    name.push(format!("-{stamp}"));
    PathBuf::from(name)
}

/// Write the archive's only file to `dest`, which must not exist yet.
fn extract_single_file(archive_path: &Path, dest: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive_path)
        .map_err(|error| ExtractError::io("failed to open update archive", error))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|error| ExtractError::zip("failed to read zip archive", error))?;

    let expected_name = dest.file_name();
    let mut found = None;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|error| ExtractError::zip("failed to read zip entry", error))?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name() else {
            return Err(ExtractError::Layout(format!(
                "archive entry {} has an unsafe path",
                entry.name()
            )));
        };
        if name.file_name() != expected_name {
            return Err(ExtractError::Layout(format!(
                "archive contains {} instead of the expected executable",
                name.display()
            )));
        }
        if found.replace(i).is_some() {
            return Err(ExtractError::Layout(
                "archive contains more than one file".to_string(),
            ));
        }
    }
    let index =
        found.ok_or_else(|| ExtractError::Layout("archive contains no files".to_string()))?;

    let mut entry = archive
        .by_index(index)
        .map_err(|error| ExtractError::zip("failed to read zip entry", error))?;
    let mut out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|error| ExtractError::io("failed to create new executable", error))?;
    std::io::copy(&mut entry, &mut out)
        .map_err(|error| ExtractError::io("failed to write new executable", error))?;
    out.sync_all()
        .map_err(|error| ExtractError::io("failed to flush new executable", error))?;

    debug!("Extracted new executable to {}", dest.display());
    Ok(())
}
