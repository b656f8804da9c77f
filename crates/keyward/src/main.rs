mod console;
mod error;
mod logging;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;

use keyward_core::{
    AttemptOutcome, DistributionClient, DistributionEndpoint, Downloader, Installer, License,
    LicenseClient, LicenseValidation, UpdateContext, UpdateOrchestrator, Version,
};
use keyward_platform::{AppPaths, TargetPlatform};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::console::{Command, EventRenderer, SessionEnd};
use crate::error::AppError;
use crate::settings::{AppSettings, LICENSE_ENV};

const EVENT_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            error!("{error}");
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode, AppError> {
    let paths = AppPaths::new().map_err(AppError::paths_unavailable)?;
    paths.ensure_dirs().map_err(AppError::paths_unavailable)?;
    let settings = AppSettings::load();
    logging::init_logging(&paths, settings.debug_logging, settings.max_log_size_bytes);

    if !settings.is_configured() {
        if !paths.settings_file().exists()
            && let Err(error) = settings.save()
        {
            warn!("Could not write default settings: {error}");
        }
        return Err(AppError::not_configured(&paths.settings_file()));
    }

    let version = Version::default();
    let platform = TargetPlatform::current();
    println!("keyward {version} ({platform})");
    info!("Starting keyward {version} on {platform}");

    let installer = Installer::for_current_exe()
        .map_err(|error| AppError::client_setup_failed("installer", error))?;
    let removed = installer.cleanup_stale_backups();
    if removed > 0 {
        debug!("Removed {removed} leftover executable backups");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, shutting down");
                shutdown.cancel();
            }
        }
    });

    let mut lines = console::spawn_line_reader();
    let endpoint = settings.endpoint();
    let license_client = LicenseClient::new(settings.http_timeout())
        .map_err(|error| AppError::client_setup_failed("license client", error))?;

    let Some(license) = unlock(&license_client, &endpoint, &mut lines, &shutdown).await? else {
        return Ok(ExitCode::SUCCESS);
    };
    println!("License accepted.");
    console::print_controls();

    let context = UpdateContext::new(endpoint, license)
        .with_version(version)
        .with_platform(platform);
    let source = DistributionClient::new(settings.http_timeout())
        .map_err(|error| AppError::client_setup_failed("update checker", error))?;
    let downloader = Downloader::new(settings.download_dir(&paths), settings.http_timeout())
        .map_err(|error| AppError::client_setup_failed("downloader", error))?
        .with_progress_interval(settings.progress_interval());

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let orchestrator = Arc::new(
        UpdateOrchestrator::new(
            context,
            Arc::new(source),
            Arc::new(downloader),
            Arc::new(installer),
            events_tx,
            shutdown.clone(),
        )
        .with_check_interval(settings.check_interval()),
    );
    let trigger = orchestrator.trigger();
    let renderer = tokio::spawn(EventRenderer::new().run(events_rx));
    let poller = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run().await }
    });
    drop(orchestrator);

    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            debug!("Input closed");
            shutdown.cancel();
            break;
        };

        match console::parse_command(&line) {
            Some(Command::Update) => {
                if trigger.confirm().await == AttemptOutcome::Ignored {
                    println!("No update is waiting to be installed.");
                }
            }
            Some(Command::Quit) => shutdown.cancel(),
            Some(Command::Help) => console::print_controls(),
            Some(Command::Unknown) => println!("Unknown command: {}", line.trim()),
            None => {}
        }
    }

    drop(trigger);
    if let Err(error) = poller.await {
        warn!("Update polling task ended abnormally: {error}");
    }
    let end = renderer.await.unwrap_or_default();

    match end {
        SessionEnd::Fatal(failure) => Err(AppError::update_failed(
            failure.release,
            failure.message,
        )),
        SessionEnd::Installed { .. } | SessionEnd::Stopped => Ok(ExitCode::SUCCESS),
    }
}

/// Obtain a validated license from the environment or the terminal. `None`
/// means shutdown was requested first.
async fn unlock(
    client: &LicenseClient,
    endpoint: &DistributionEndpoint,
    lines: &mut mpsc::UnboundedReceiver<String>,
    shutdown: &CancellationToken,
) -> Result<Option<License>, AppError> {
    if let Ok(key) = std::env::var(LICENSE_ENV)
        && !key.trim().is_empty()
    {
        let license = License::new(key.trim());
        return match client
            .validate(endpoint, &license)
            .await
            .map_err(AppError::license_check_failed)?
        {
            LicenseValidation::Valid => Ok(Some(license)),
            LicenseValidation::Invalid { detail } => Err(AppError::license_check_failed(
                detail.unwrap_or_else(|| format!("key from {LICENSE_ENV} was rejected")),
            )),
        };
    }

    loop {
        println!("Enter your license key:");
        let line = tokio::select! {
            () = shutdown.cancelled() => return Ok(None),
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            return Err(AppError::LicenseMissing);
        };
        let key = line.trim();
        if key.is_empty() {
            continue;
        }

        let license = License::new(key);
        let validation = tokio::select! {
            () = shutdown.cancelled() => return Ok(None),
            validation = client.validate(endpoint, &license) => validation,
        };
        match validation {
            Ok(LicenseValidation::Valid) => return Ok(Some(license)),
            Ok(LicenseValidation::Invalid { detail }) => {
                println!(
                    "License key rejected{}",
                    detail.map(|d| format!(": {d}")).unwrap_or_default()
                );
            }
            Err(error) => {
                warn!("License validation failed: {error}");
                println!("Could not validate license key: {error}");
            }
        }
    }
}
