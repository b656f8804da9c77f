use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use keyward_core::{
    AttemptOutcome, DistributionClient, DistributionEndpoint, Downloader, FailureStage, Installer,
    License, UpdateContext, UpdateEvent, UpdateOrchestrator, Version, encode_header, md5_hex,
};
use keyward_platform::TargetPlatform;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ORIGINAL: &[u8] = b"original build";
const REPLACEMENT: &[u8] = b"replacement build";

fn zip_with(name: &str, content: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file(name, zip::write::SimpleFileOptions::default())
        .expect("zip entry should start");
    writer.write_all(content).expect("zip entry should be written");
    writer
        .finish()
        .expect("zip archive should be finalized")
        .into_inner()
}

struct Setup {
    _root: tempfile::TempDir,
    executable: PathBuf,
    downloads: PathBuf,
    orchestrator: Arc<UpdateOrchestrator>,
    events: mpsc::Receiver<UpdateEvent>,
    shutdown: CancellationToken,
}

async fn setup(server: &MockServer) -> Setup {
    let root = tempfile::tempdir().expect("tempdir should be created");
    let bin_dir = root.path().join("bin");
    let downloads = root.path().join("downloads");
    std::fs::create_dir_all(&bin_dir).expect("bin dir should be created");
    std::fs::create_dir_all(&downloads).expect("download dir should be created");
    let executable = bin_dir.join("app");
    std::fs::write(&executable, ORIGINAL).expect("executable should be written");

    let context = UpdateContext::new(
        DistributionEndpoint::new("acct", "prod").with_dist_base_url(server.uri()),
        License::new("LICENSE-KEY"),
    )
    .with_version(Version::new("1.0.0"))
    .with_platform(TargetPlatform::from_rust("linux", "x86_64"));

    let (events_tx, events) = mpsc::channel(64);
    let shutdown = CancellationToken::new();
    let orchestrator = UpdateOrchestrator::new(
        context,
        Arc::new(
            DistributionClient::new(Duration::from_secs(5)).expect("check client should build"),
        ),
        Arc::new(
            Downloader::new(downloads.clone(), Duration::from_secs(5))
                .expect("downloader should build"),
        ),
        Arc::new(Installer::new(executable.clone())),
        events_tx,
        shutdown.clone(),
    )
    .with_check_interval(Duration::from_millis(50));

    Setup {
        _root: root,
        executable,
        downloads,
        orchestrator: Arc::new(orchestrator),
        events,
        shutdown,
    }
}

async fn mount_release(server: &MockServer, archive: Vec<u8>, digest_of: &[u8]) {
    Mock::given(method("GET"))
        .and(path("/v1/acct/prod/update/linux-amd64/zip/1.0.0"))
        .and(query_param("key", "LICENSE-KEY"))
        .respond_with(ResponseTemplate::new(307).set_body_json(json!({
            "name": "v1.1.0",
            "url": format!("{}/artifacts/app-1.1.0.zip", server.uri()),
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/artifacts/app-1.1.0.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-MD5", encode_header(&md5_hex(digest_of)).as_str())
                .insert_header(
                    "Content-Disposition",
                    "attachment; filename=\"app-1.1.0.zip\"",
                )
                .set_body_bytes(archive),
        )
        .mount(server)
        .await;
}

async fn wait_for_available(events: &mut mpsc::Receiver<UpdateEvent>) {
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("an update should be announced")
        .expect("event channel should be open");
    assert!(
        matches!(&event, UpdateEvent::Available(descriptor) if descriptor.name == "v1.1.0"),
        "unexpected first event: {event:?}"
    );
}

fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map_or(0, Iterator::count)
}

#[tokio::test]
async fn confirmed_update_replaces_executable_and_stops() {
    let server = MockServer::start().await;
    let archive = zip_with("app", REPLACEMENT);
    mount_release(&server, archive.clone(), &archive).await;
    let mut setup = setup(&server).await;

    let runner = {
        let orchestrator = Arc::clone(&setup.orchestrator);
        tokio::spawn(async move { orchestrator.run().await })
    };
    wait_for_available(&mut setup.events).await;

    let trigger = setup.orchestrator.trigger();
    assert_eq!(trigger.confirm().await, AttemptOutcome::Installed);
    assert!(setup.shutdown.is_cancelled());
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("polling should stop")
        .expect("polling task should not panic");

    assert_eq!(
        std::fs::read(&setup.executable).expect("executable should be readable"),
        REPLACEMENT
    );
    let bin_dir = setup.executable.parent().expect("executable has a parent");
    assert_eq!(entries(bin_dir), 1, "no aside copy should remain");
    assert_eq!(entries(&setup.downloads), 0, "no archive should remain");
    assert_eq!(trigger.confirm().await, AttemptOutcome::Ignored);
}

#[tokio::test]
async fn digest_mismatch_leaves_executable_untouched() {
    let server = MockServer::start().await;
    let archive = zip_with("app", REPLACEMENT);
    mount_release(&server, archive, b"").await;
    let mut setup = setup(&server).await;

    let runner = {
        let orchestrator = Arc::clone(&setup.orchestrator);
        tokio::spawn(async move { orchestrator.run().await })
    };
    wait_for_available(&mut setup.events).await;

    assert_eq!(
        setup.orchestrator.trigger().confirm().await,
        AttemptOutcome::Failed
    );
    assert!(!setup.shutdown.is_cancelled());

    let mut failure = None;
    while let Ok(event) = setup.events.try_recv() {
        if let UpdateEvent::Failed(f) = event {
            failure = Some(f);
        }
    }
    let failure = failure.expect("a failure should be reported");
    assert_eq!(failure.stage, FailureStage::Download);
    assert!(!failure.fatal);

    assert_eq!(
        std::fs::read(&setup.executable).expect("executable should be readable"),
        ORIGINAL
    );
    assert_eq!(entries(&setup.downloads), 0);

    setup.shutdown.cancel();
    runner.await.expect("polling task should not panic");
}
