//! License-gated self-update for a running executable.
//!
//! - Update checks against the distribution service.
//! - Streaming, digest-verified artifact downloads.
//! - Rename-aside executable replacement with rollback.
//! - An orchestrator that polls, waits for confirmation and signals shutdown.
//! - License key validation.

mod checksum;
mod context;
mod download;
mod install;
mod license;
mod orchestrator;
mod update;

pub use checksum::{ChecksumError, DigestAccumulator, ExpectedDigest, encode_header, md5_hex};
pub use context::{
    DEFAULT_API_BASE_URL, DEFAULT_DIST_BASE_URL, DistributionEndpoint, License, UpdateContext,
    Version,
};
pub use download::{
    DEFAULT_PROGRESS_INTERVAL, DownloadError, DownloadProgress, DownloadedArtifact, Downloader,
};
pub use install::{ExtractError, InstallError, Installer, SwapState};
pub use license::{LicenseClient, LicenseError, LicenseValidation, validate_url};
pub use orchestrator::{
    ArtifactFetcher, ArtifactInstaller, AttemptOutcome, DEFAULT_CHECK_INTERVAL, FailureStage,
    UpdateEvent, UpdateFailure, UpdateOrchestrator, UpdateSource, UpdateTrigger,
};
pub use update::{DistributionClient, UpdateDescriptor, UpdateError, check_url};
