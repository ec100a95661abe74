//! Bounded-parallel image fetching with retry and byte-level validation.
//!
//! Every filtered candidate becomes its own task, but at most
//! `concurrency` of them hold a permit and talk to the network at once.
//! Results are collected in candidate order regardless of which fetch
//! finishes first, so file numbering follows the filter's ranking.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use image::{DynamicImage, GenericImageView, ImageFormat};
use reqwest::{Client, StatusCode};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::constants::BROWSER_USER_AGENT;
use crate::context::RunContext;
use crate::dedup::{Fingerprint, SimilarityIndex};
use crate::error::{ErrorKind, HarvestError};
use crate::fs_utils::{remove_files_best_effort, write_atomic};
use crate::models::{DownloadResult, DownloadStatus, ImageCandidate};
use crate::retry::RetryPolicy;

/// Responses larger than this are rejected without decoding.
pub const MAX_IMAGE_BYTES: u64 = 32 * 1024 * 1024;

/// How downloads are performed for one run.
#[derive(Debug, Clone, Copy)]
pub struct DownloadPolicy {
    /// Maximum fetches in flight at once.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    /// Decoded images smaller than this are rejected.
    pub min_width: u32,
    pub min_height: u32,
    /// Hamming distance for visual duplicates; `None` disables the check.
    pub dedup_threshold: Option<u32>,
    /// Bodies larger than this are abandoned mid-stream.
    pub max_bytes: u64,
}

/// A fetched body that decoded as an acceptable image.
struct ValidImage {
    bytes: Bytes,
    format: ImageFormat,
    fingerprint: Option<Fingerprint>,
}

/// File extension written for each accepted format.
fn extension(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        _ => "jpg",
    }
}

/// Name of the file for the candidate at 1-based `rank`.
#[must_use]
pub fn file_name(rank: usize, ext: &str) -> String {
    format!("{rank:02}.{ext}")
}

fn transient(url: &str, message: impl Into<String>) -> HarvestError {
    HarvestError::DownloadTransient {
        url: url.to_string(),
        message: message.into(),
    }
}

fn permanent(url: &str, message: impl Into<String>) -> HarvestError {
    HarvestError::DownloadPermanent {
        url: url.to_string(),
        message: message.into(),
    }
}

/// Timeouts, throttling and server errors may clear up on retry.
fn status_is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn classify_reqwest(url: &str, e: &reqwest::Error) -> HarvestError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
        transient(url, e.to_string())
    } else {
        permanent(url, e.to_string())
    }
}

/// Missing and generic binary content types are accepted; the decoder has
/// the final word.
fn content_type_acceptable(content_type: Option<&str>) -> bool {
    let Some(value) = content_type else {
        return true;
    };
    let essence = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    essence.is_empty()
        || essence.starts_with("image/")
        || essence == "application/octet-stream"
        || essence == "binary/octet-stream"
}

/// Sniff, decode and size-check a response body.
fn validate_image(
    url: &str,
    bytes: Bytes,
    min_width: u32,
    min_height: u32,
    fingerprint: bool,
) -> Result<ValidImage, HarvestError> {
    let format = image::guess_format(&bytes)
        .map_err(|_| permanent(url, "body is not a recognized image"))?;
    if !matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP
    ) {
        return Err(permanent(url, format!("unsupported image format {format:?}")));
    }

    let decoded: DynamicImage = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| permanent(url, format!("failed to decode image: {e}")))?;
    let (width, height) = decoded.dimensions();
    if width < min_width || height < min_height {
        return Err(permanent(
            url,
            format!("decoded image {width}x{height} is below the {min_width}x{min_height} minimum"),
        ));
    }

    Ok(ValidImage {
        fingerprint: fingerprint.then(|| Fingerprint::of(&decoded)),
        bytes,
        format,
    })
}

/// Fetches and stores the filtered candidates for one entity.
pub struct DownloadManager {
    client: Client,
    policy: DownloadPolicy,
    ctx: RunContext,
}

impl DownloadManager {
    /// Build a manager with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(policy: DownloadPolicy, ctx: RunContext) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(policy.request_timeout)
            .user_agent(BROWSER_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            policy,
            ctx,
        })
    }

    #[must_use]
    pub fn policy(&self) -> &DownloadPolicy {
        &self.policy
    }

    /// Download every candidate into `staging_dir`, which must exist.
    ///
    /// The returned results line up one-to-one with `candidates`. When
    /// visual deduplication is enabled, a success that looks like an
    /// earlier-ranked success is deleted and reported as skipped.
    pub async fn download_all(
        &self,
        candidates: Vec<ImageCandidate>,
        staging_dir: &Path,
    ) -> Vec<DownloadResult> {
        let semaphore = Arc::new(Semaphore::new(self.policy.concurrency.max(1)));
        let mut handles = Vec::with_capacity(candidates.len());

        for (index, candidate) in candidates.into_iter().enumerate() {
            let job = FetchJob {
                client: self.client.clone(),
                policy: self.policy,
                ctx: self.ctx.clone(),
                staging_dir: staging_dir.to_path_buf(),
                rank: index + 1,
            };
            let semaphore = Arc::clone(&semaphore);
            let fallback = candidate.clone();
            let handle = tokio::spawn(async move { job.run(candidate, &semaphore).await });
            handles.push((handle, fallback));
        }

        let mut fetched = Vec::with_capacity(handles.len());
        for (handle, candidate) in handles {
            match handle.await {
                Ok(pair) => fetched.push(pair),
                Err(e) => {
                    warn!(url = %candidate.url, "Download task failed: {e}");
                    fetched.push((
                        DownloadResult {
                            candidate,
                            local_path: None,
                            byte_size: 0,
                            status: DownloadStatus::Failed,
                            error: Some(ErrorKind::DownloadPermanentFailure),
                            attempts: 0,
                        },
                        None,
                    ));
                }
            }
        }

        let results = match self.policy.dedup_threshold {
            Some(threshold) => drop_visual_duplicates(fetched, threshold).await,
            None => fetched.into_iter().map(|(result, _)| result).collect(),
        };

        for _ in results.iter().filter(|r| r.is_success()) {
            self.ctx.stats().download_succeeded();
        }
        results
    }
}

/// Everything a spawned download task needs, owned.
struct FetchJob {
    client: Client,
    policy: DownloadPolicy,
    ctx: RunContext,
    staging_dir: PathBuf,
    rank: usize,
}

impl FetchJob {
    async fn run(
        self,
        candidate: ImageCandidate,
        semaphore: &Semaphore,
    ) -> (DownloadResult, Option<Fingerprint>) {
        let cancel = self.ctx.cancel_token();
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            permit = semaphore.acquire() => permit.ok(),
        };
        let Some(_permit) = permit else {
            return (skipped_cancelled(candidate), None);
        };

        self.ctx.stats().download_attempted();
        let url = candidate.url.clone();

        let outcome = self
            .policy
            .retry
            .run(
                cancel,
                |attempt| self.fetch_once(&url, attempt),
                HarvestError::is_transient,
            )
            .await;

        let stored = match outcome.result {
            Ok(image) => self.store(&url, image).await,
            Err(e) => Err(e),
        };

        match stored {
            Ok((path, byte_size, fingerprint)) => {
                info!(url = %url, path = %path.display(), byte_size, "Downloaded image");
                (
                    DownloadResult {
                        candidate,
                        local_path: Some(path),
                        byte_size,
                        status: DownloadStatus::Success,
                        error: None,
                        attempts: outcome.attempts,
                    },
                    fingerprint,
                )
            }
            Err(HarvestError::Cancelled) => {
                let mut result = skipped_cancelled(candidate);
                result.attempts = outcome.attempts;
                (result, None)
            }
            Err(e) => {
                warn!(attempts = outcome.attempts, "{e}");
                (
                    DownloadResult {
                        candidate,
                        local_path: None,
                        byte_size: 0,
                        status: DownloadStatus::Failed,
                        error: Some(e.kind()),
                        attempts: outcome.attempts,
                    },
                    None,
                )
            }
        }
    }

    async fn fetch_once(&self, url: &str, attempt: u32) -> Result<ValidImage, HarvestError> {
        let _in_flight = self.ctx.stats().fetch_started();
        debug!(url = %url, attempt, "Fetching image");

        let fetch = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| classify_reqwest(url, &e))?;

            let status = response.status();
            if !status.is_success() {
                let message = format!("HTTP {status}");
                return Err(if status_is_transient(status) {
                    transient(url, message)
                } else {
                    permanent(url, message)
                });
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            if !content_type_acceptable(content_type) {
                return Err(permanent(
                    url,
                    format!("unexpected content type {}", content_type.unwrap_or_default()),
                ));
            }

            read_capped(url, response, self.policy.max_bytes).await
        };

        let bytes = tokio::select! {
            biased;
            () = self.ctx.cancel_token().cancelled() => return Err(HarvestError::Cancelled),
            result = fetch => result?,
        };

        let owned_url = url.to_string();
        let (min_width, min_height) = (self.policy.min_width, self.policy.min_height);
        let fingerprint = self.policy.dedup_threshold.is_some();
        tokio::task::spawn_blocking(move || {
            validate_image(&owned_url, bytes, min_width, min_height, fingerprint)
        })
        .await
        .map_err(|e| permanent(url, format!("validation task failed: {e}")))?
    }

    async fn store(
        &self,
        url: &str,
        image: ValidImage,
    ) -> Result<(PathBuf, u64, Option<Fingerprint>), HarvestError> {
        let path = self
            .staging_dir
            .join(file_name(self.rank, extension(image.format)));
        write_atomic(&path, &image.bytes).await?;
        debug!(url = %url, path = %path.display(), "Stored image");
        Ok((path, image.bytes.len() as u64, image.fingerprint))
    }
}

/// Read the body chunk by chunk, giving up as soon as it passes `max_bytes`.
/// Chunked responses carry no length up front, so the declared length is
/// only a shortcut.
async fn read_capped(
    url: &str,
    mut response: reqwest::Response,
    max_bytes: u64,
) -> Result<Bytes, HarvestError> {
    if response.content_length().is_some_and(|len| len > max_bytes) {
        return Err(permanent(url, "response exceeds size limit"));
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| classify_reqwest(url, &e))? {
        if (body.len() + chunk.len()) as u64 > max_bytes {
            return Err(permanent(url, "response exceeds size limit"));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

fn skipped_cancelled(candidate: ImageCandidate) -> DownloadResult {
    DownloadResult {
        candidate,
        local_path: None,
        byte_size: 0,
        status: DownloadStatus::Skipped,
        error: Some(ErrorKind::Cancelled),
        attempts: 0,
    }
}

/// Demote successes that look like an earlier-ranked success to `Skipped`
/// and delete their files.
async fn drop_visual_duplicates(
    fetched: Vec<(DownloadResult, Option<Fingerprint>)>,
    threshold: u32,
) -> Vec<DownloadResult> {
    let mut index = SimilarityIndex::new(threshold);
    let mut duplicates = Vec::new();
    let mut results = Vec::with_capacity(fetched.len());

    for (mut result, fingerprint) in fetched {
        if let (true, Some(fingerprint)) = (result.is_success(), fingerprint) {
            if !index.insert(fingerprint) {
                info!(url = %result.candidate.url, "Skipping visual duplicate");
                if let Some(path) = result.local_path.take() {
                    duplicates.push(path);
                }
                result.status = DownloadStatus::Skipped;
                result.byte_size = 0;
            }
        }
        results.push(result);
    }

    remove_files_best_effort(&duplicates).await;
    results
}
