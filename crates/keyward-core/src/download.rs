use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::checksum::{ChecksumError, DigestAccumulator, ExpectedDigest};
use crate::update::UpdateDescriptor;

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

const CONTENT_MD5: &str = "content-md5";
const FALLBACK_FILE_NAME: &str = "update.zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    /// Declared size, or `0` when the server did not send a usable length.
    pub total: u64,
}

impl DownloadProgress {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        (self.total > 0).then(|| (self.downloaded as f64 / self.total as f64).min(1.0))
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("download failed with status {0}")]
    Status(reqwest::StatusCode),
    #[error("response is missing the {0} header")]
    MissingHeader(&'static str),
    #[error("invalid content digest: {0}")]
    Digest(#[from] ChecksumError),
    #[error("downloaded {actual} bytes but the server declared {declared}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

impl DownloadError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    fn http(context: &'static str, source: reqwest::Error) -> Self {
        Self::Http { context, source }
    }
}

/// A downloaded archive whose digest has been verified.
///
/// The file is removed when this value is dropped, so an artifact that is
/// never installed cannot linger on disk.
#[derive(Debug)]
pub struct DownloadedArtifact {
    path: TempPath,
    file_name: String,
    declared_size: Option<u64>,
    digest: ExpectedDigest,
}

impl DownloadedArtifact {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[must_use]
    pub fn declared_size(&self) -> Option<u64> {
        self.declared_size
    }

    #[must_use]
    pub fn digest(&self) -> &ExpectedDigest {
        &self.digest
    }

    /// Delete the archive now, reporting any failure.
    ///
    /// # Errors
    /// Returns an error if the file cannot be removed.
    pub fn delete(self) -> std::io::Result<()> {
        self.path.close()
    }

    /// Wrap an archive that is already on disk. The file is deleted when the
    /// artifact is dropped.
    #[must_use]
    pub fn from_verified_file(
        path: PathBuf,
        file_name: impl Into<String>,
        digest: ExpectedDigest,
    ) -> Self {
        Self {
            path: TempPath::from_path(path),
            file_name: file_name.into(),
            declared_size: None,
            digest,
        }
    }
}

struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn ready(&mut self, now: Instant) -> bool {
        if self.until_ready(now).is_zero() {
            self.last = Some(now);
            true
        } else {
            false
        }
    }

    fn until_ready(&self, now: Instant) -> Duration {
        self.last.map_or(Duration::ZERO, |last| {
            self.interval.saturating_sub(now.duration_since(last))
        })
    }
}

/// Streams update archives to disk and verifies them.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    download_dir: PathBuf,
    progress_interval: Duration,
}

impl Downloader {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(download_dir: PathBuf, timeout: Duration) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .user_agent(format!("keyward/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| DownloadError::http("failed to build download client", error))?;
        Ok(Self::with_client(client, download_dir))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, download_dir: PathBuf) -> Self {
        Self {
            client,
            download_dir,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Download the archive a descriptor points at.
    ///
    /// Progress is published on `progress` at most once per progress interval.
    /// The final byte count is always published, waiting out the rest of the
    /// interval if needed. The partial file is removed on every failure.
    ///
    /// # Errors
    /// Returns an error when the request fails or returns a non-success
    /// status, the digest header is missing or malformed, the body cannot be
    /// written, or the content does not match the declared size or digest.
    pub async fn download(
        &self,
        descriptor: &UpdateDescriptor,
        progress: &mpsc::Sender<DownloadProgress>,
    ) -> Result<DownloadedArtifact, DownloadError> {
        use futures_util::StreamExt;

        info!("Downloading {} from {}", descriptor.name, descriptor.url);
        let response = self
            .client
            .get(&descriptor.url)
            .send()
            .await
            .map_err(|error| DownloadError::http("download request failed", error))?;

        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status()));
        }

        let headers = response.headers();
        let digest = headers
            .get(CONTENT_MD5)
            .ok_or(DownloadError::MissingHeader("Content-MD5"))?
            .to_str()
            .map_err(|_| ChecksumError::Empty)
            .and_then(ExpectedDigest::from_header)?;
        let file_name = headers
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(content_disposition_filename)
            .or_else(|| url_file_name(&descriptor.url))
            .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
        let declared_size = response.content_length();
        let total = declared_size.unwrap_or(0);

        std::fs::create_dir_all(&self.download_dir)
            .map_err(|error| DownloadError::io("failed to create download directory", error))?;
        let temp = tempfile::Builder::new()
            .prefix(&format!("{file_name}."))
            .tempfile_in(&self.download_dir)
            .map_err(|error| DownloadError::io("failed to create download file", error))?;
        let (std_file, path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(std_file);

        let mut accumulator = DigestAccumulator::new();
        let mut throttle = ProgressThrottle::new(self.progress_interval);
        let mut reported = None;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| DownloadError::http("download stream error", error))?;
            file.write_all(&chunk)
                .await
                .map_err(|error| DownloadError::io("failed to write download data", error))?;
            accumulator.update(&chunk);

            if throttle.ready(Instant::now()) {
                reported = Some(accumulator.bytes());
                let _ = progress
                    .send(DownloadProgress {
                        downloaded: accumulator.bytes(),
                        total,
                    })
                    .await;
            }
        }

        file.flush()
            .await
            .map_err(|error| DownloadError::io("failed to flush download file", error))?;
        drop(file);

        let downloaded = accumulator.bytes();
        if reported != Some(downloaded) {
            tokio::time::sleep(throttle.until_ready(Instant::now())).await;
            throttle.ready(Instant::now());
            let _ = progress.send(DownloadProgress { downloaded, total }).await;
        }

        if let Some(declared) = declared_size
            && declared != downloaded
        {
            discard(path);
            return Err(DownloadError::SizeMismatch {
                declared,
                actual: downloaded,
            });
        }

        let actual = accumulator.finalize_hex();
        if !digest.matches(&actual) {
            discard(path);
            return Err(DownloadError::ChecksumMismatch {
                expected: digest.to_string(),
                actual,
            });
        }

        info!("Download of {} verified ({downloaded} bytes)", descriptor.name);
        Ok(DownloadedArtifact {
            path,
            file_name,
            declared_size,
            digest,
        })
    }
}

fn discard(path: TempPath) {
    let display = path.display().to_string();
    if let Err(error) = path.close() {
        warn!("Failed to remove rejected download {display}: {error}");
    } else {
        debug!("Removed rejected download {display}");
    }
}

/// Pull the `filename` parameter out of a `Content-Disposition` value.
fn content_disposition_filename(value: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|param| {
        let (key, raw) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let raw = raw.trim();
        let name = raw
            .strip_prefix('"')
            .and_then(|quoted| quoted.strip_suffix('"'))
            .unwrap_or(raw);
        sanitize_file_name(name)
    })
}

fn url_file_name(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    sanitize_file_name(last)
}

fn sanitize_file_name(name: &str) -> Option<String> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && !n.contains(".."))
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{
        DownloadError, DownloadProgress, Downloader, ProgressThrottle,
        content_disposition_filename, url_file_name,
    };
    use crate::checksum::{encode_header, md5_hex};
    use crate::update::UpdateDescriptor;

    const PAYLOAD: &[u8] = b"zip archive bytes for the next release";

    fn descriptor(server: &MockServer, file: &str) -> UpdateDescriptor {
        UpdateDescriptor {
            name: "v1.1.0".to_string(),
            url: format!("{}/artifacts/{file}", server.uri()),
        }
    }

    fn downloader(dir: &std::path::Path) -> Downloader {
        Downloader::new(dir.to_path_buf(), Duration::from_secs(5))
            .expect("downloader should build")
    }

    fn staged_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).map_or(0, Iterator::count)
    }

    #[tokio::test]
    async fn verified_download_keeps_file_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/artifacts/x.zip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-MD5", encode_header(&md5_hex(PAYLOAD)).as_str())
                    .insert_header("Content-Disposition", "attachment; filename=\"app-1.1.0.zip\"")
                    .set_body_bytes(PAYLOAD),
            )
            .mount(&server)
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let (tx, mut rx) = mpsc::channel(64);
        let artifact = downloader(temp.path())
            .download(&descriptor(&server, "x.zip"), &tx)
            .await
            .expect("download should succeed");

        assert_eq!(artifact.file_name(), "app-1.1.0.zip");
        assert_eq!(artifact.declared_size(), Some(PAYLOAD.len() as u64));
        assert_eq!(
            std::fs::read(artifact.path()).expect("artifact should be readable"),
            PAYLOAD
        );

        drop(tx);
        let mut last = None;
        while let Some(progress) = rx.recv().await {
            last = Some(progress);
        }
        assert_eq!(
            last,
            Some(DownloadProgress {
                downloaded: PAYLOAD.len() as u64,
                total: PAYLOAD.len() as u64,
            })
        );

        let path = artifact.path().to_path_buf();
        drop(artifact);
        assert!(!path.exists(), "dropping the artifact should delete it");
    }

    #[tokio::test]
    async fn digest_mismatch_fails_and_removes_partial_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/artifacts/x.zip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-MD5", "ZDQxZDhjZDk4ZjAwYjIwNGU5ODAwOTk4ZWNmODQyN2U=")
                    .set_body_bytes(PAYLOAD),
            )
            .mount(&server)
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let (tx, _rx) = mpsc::channel(64);
        let result = downloader(temp.path())
            .download(&descriptor(&server, "x.zip"), &tx)
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::ChecksumMismatch { ref expected, .. })
                if expected == "d41d8cd98f00b204e9800998ecf8427e"
        ));
        assert_eq!(staged_files(temp.path()), 0);
    }

    #[tokio::test]
    async fn missing_digest_header_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/artifacts/x.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PAYLOAD))
            .mount(&server)
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let (tx, _rx) = mpsc::channel(64);
        let result = downloader(temp.path())
            .download(&descriptor(&server, "x.zip"), &tx)
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::MissingHeader("Content-MD5"))
        ));
        assert_eq!(staged_files(temp.path()), 0);
    }

    #[tokio::test]
    async fn error_status_fails_without_touching_disk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/artifacts/x.zip"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let (tx, _rx) = mpsc::channel(64);
        let result = downloader(temp.path())
            .download(&descriptor(&server, "x.zip"), &tx)
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::Status(status)) if status == reqwest::StatusCode::NOT_FOUND
        ));
        assert_eq!(staged_files(temp.path()), 0);
    }

    #[tokio::test]
    async fn file_name_falls_back_to_url_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/artifacts/release.zip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-MD5", encode_header(&md5_hex(PAYLOAD)).as_str())
                    .set_body_bytes(PAYLOAD),
            )
            .mount(&server)
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let (tx, _rx) = mpsc::channel(64);
        let artifact = downloader(temp.path())
            .download(&descriptor(&server, "release.zip"), &tx)
            .await
            .expect("download should succeed");
        assert_eq!(artifact.file_name(), "release.zip");
    }

    #[test]
    fn content_disposition_parsing_handles_quoting() {
        assert_eq!(
            content_disposition_filename("attachment; filename=\"app.zip\"").as_deref(),
            Some("app.zip")
        );
        assert_eq!(
            content_disposition_filename("attachment;FILENAME=app.zip").as_deref(),
            Some("app.zip")
        );
        assert_eq!(
            content_disposition_filename("attachment; filename=\"../../etc/passwd\"").as_deref(),
            Some("passwd")
        );
        assert_eq!(content_disposition_filename("attachment"), None);
        assert_eq!(content_disposition_filename("inline; name=x"), None);
    }

    #[test]
    fn url_file_name_uses_last_segment() {
        assert_eq!(
            url_file_name("https://dist.example.com/a/b/app.zip?sig=1").as_deref(),
            Some("app.zip")
        );
        assert_eq!(url_file_name("https://dist.example.com/"), None);
        assert_eq!(url_file_name("not a url"), None);
    }

    #[test]
    fn throttle_limits_event_rate() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(50));
        let start = Instant::now();
        assert!(throttle.ready(start));
        assert!(!throttle.ready(start + Duration::from_millis(10)));
        assert!(!throttle.ready(start + Duration::from_millis(49)));
        assert!(throttle.ready(start + Duration::from_millis(50)));
        assert!(!throttle.ready(start + Duration::from_millis(60)));
    }

    #[test]
    fn throttle_reports_remaining_wait() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(50));
        let start = Instant::now();
        assert_eq!(throttle.until_ready(start), Duration::ZERO);
        assert!(throttle.ready(start));
        assert_eq!(
            throttle.until_ready(start + Duration::from_millis(20)),
            Duration::from_millis(30)
        );
        assert_eq!(
            throttle.until_ready(start + Duration::from_millis(80)),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn completion_is_reported_once_without_bursting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/artifacts/x.zip"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-MD5", encode_header(&md5_hex(PAYLOAD)).as_str())
                    .set_body_bytes(PAYLOAD),
            )
            .mount(&server)
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let (tx, mut rx) = mpsc::channel(64);
        let started = Instant::now();
        downloader(temp.path())
            .with_progress_interval(Duration::from_millis(200))
            .download(&descriptor(&server, "x.zip"), &tx)
            .await
            .expect("download should succeed");
        let elapsed = started.elapsed();
        drop(tx);

        let mut events = Vec::new();
        while let Some(progress) = rx.recv().await {
            events.push(progress.downloaded);
        }
        assert_eq!(events.last(), Some(&(PAYLOAD.len() as u64)));
        assert!(
            events.windows(2).all(|pair| pair[0] < pair[1]),
            "no byte count should be reported twice: {events:?}"
        );
        if events.len() > 1 {
            assert!(elapsed >= Duration::from_millis(200));
        }
    }

    #[test]
    fn progress_fraction_requires_total() {
        let unknown = DownloadProgress {
            downloaded: 10,
            total: 0,
        };
        assert_eq!(unknown.fraction(), None);

        let half = DownloadProgress {
            downloaded: 50,
            total: 100,
        };
        assert_eq!(half.fraction(), Some(0.5));
    }
}
