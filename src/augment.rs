use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::browser::{BrowserDriver, PageSession};
use crate::formats::{CanvasCapture, DataUrl};
use crate::image_store::sanitize_segment;
use crate::retry::{RetryError, RetryPolicy, retry_with_backoff};

/// Augmentation page shipped with the binary; see [`install_bundled_page`].
pub const BUNDLED_PAGE: &str = include_str!("../assets/augment.html");

pub const UPLOAD_SELECTOR: &str = "#uploadImage";
pub const CANVAS_SELECTOR: &str = "#output canvas";
pub const POLL_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_ATTEMPTS: u32 = 3;

const CAPTURE_SCRIPT: &str = r##"(() => {
  const labels = Array.from(document.querySelectorAll("#output p"));
  return Array.from(document.querySelectorAll("#output canvas")).map((canvas, index) => ({
    index,
    label: labels[index] ? labels[index].textContent.trim() : String(index),
    dataUrl: canvas.toDataURL("image/png"),
  }));
})()"##;

#[derive(Debug, thiserror::Error)]
pub enum AugmentError {
    #[error("open browser session")]
    Session(#[source] anyhow::Error),

    #[error("load augmentation page {url}")]
    Load {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("upload {}", .path.display())]
    Upload {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("augmented canvases never rendered for {} after {attempts} attempts", .path.display())]
    Extraction { path: PathBuf, attempts: u32 },

    #[error("capture canvases for {}", .path.display())]
    Capture {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("write augmented images")]
    Io(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct AugmentRequest<'a> {
    pub source: &'a Path,
    /// Output folder name under the augmented-images root (the product id).
    pub label: &'a str,
    pub image_index: usize,
}

#[derive(Debug, thiserror::Error)]
enum PollError {
    #[error("canvases not rendered yet")]
    NotRendered,
    #[error(transparent)]
    Session(anyhow::Error),
}

pub struct ImageAugmenter {
    driver: Arc<dyn BrowserDriver>,
    page_url: String,
    output_root: PathBuf,
    navigation_timeout: Duration,
    poll: RetryPolicy,
    poll_timeout: Duration,
}

impl ImageAugmenter {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        page_url: impl Into<String>,
        output_root: impl Into<PathBuf>,
        navigation_timeout: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            driver,
            page_url: page_url.into(),
            output_root: output_root.into(),
            navigation_timeout,
            poll: RetryPolicy::new(DEFAULT_POLL_ATTEMPTS, POLL_BACKOFF),
            poll_timeout,
        }
    }

    pub fn with_poll_policy(mut self, poll: RetryPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn output_dir(&self, label: &str) -> PathBuf {
        self.output_root.join(sanitize_segment(label))
    }

    /// Runs one image through the augmentation page and writes every rendered
    /// variant. Nothing is written unless all variants were captured.
    pub async fn augment(&self, request: AugmentRequest<'_>) -> Result<Vec<PathBuf>, AugmentError> {
        let session = self
            .driver
            .open_session()
            .await
            .map_err(AugmentError::Session)?;
        let result = self.augment_in(session.as_ref(), &request).await;
        if let Err(err) = session.close().await {
            tracing::debug!(?err, "close augmentation session");
        }
        result
    }

    async fn augment_in(
        &self,
        session: &dyn PageSession,
        request: &AugmentRequest<'_>,
    ) -> Result<Vec<PathBuf>, AugmentError> {
        let path = request.source.to_path_buf();

        session
            .navigate(&self.page_url, self.navigation_timeout)
            .await
            .map_err(|source| AugmentError::Load {
                url: self.page_url.clone(),
                source,
            })?;
        session
            .upload_file(UPLOAD_SELECTOR, request.source)
            .await
            .map_err(|source| AugmentError::Upload {
                path: path.clone(),
                source,
            })?;

        retry_with_backoff(
            self.poll,
            |attempt| async move {
                tracing::debug!(attempt, source = %request.source.display(), "poll canvases");
                match session
                    .wait_for_selector(CANVAS_SELECTOR, self.poll_timeout)
                    .await
                {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(PollError::NotRendered),
                    Err(err) => Err(PollError::Session(err)),
                }
            },
            |_| true,
        )
        .await
        .map_err(|err| match err {
            RetryError::Exhausted { attempts, last } => {
                tracing::warn!(error = %last, source = %path.display(), "canvas poll exhausted");
                AugmentError::Extraction {
                    path: path.clone(),
                    attempts,
                }
            }
            RetryError::Fatal(_) => AugmentError::Extraction {
                path: path.clone(),
                attempts: 1,
            },
        })?;

        let captures = capture_canvases(session)
            .await
            .map_err(|source| AugmentError::Capture {
                path: path.clone(),
                source,
            })?;
        if captures.is_empty() {
            return Err(AugmentError::Extraction {
                path,
                attempts: self.poll.max_attempts,
            });
        }

        let out_dir = self.output_dir(request.label);
        let written = write_variants(&out_dir, request.image_index, &captures)
            .await
            .map_err(AugmentError::Io)?;
        tracing::info!(
            source = %request.source.display(),
            out = %out_dir.display(),
            variants = written.len(),
            "augmented image"
        );
        Ok(written)
    }
}

/// Decoded canvas captures, in page order.
async fn capture_canvases(session: &dyn PageSession) -> anyhow::Result<Vec<(CanvasCapture, DataUrl)>> {
    let value = session
        .evaluate(CAPTURE_SCRIPT)
        .await
        .context("evaluate canvas capture script")?;
    let captures: Vec<CanvasCapture> =
        serde_json::from_value(value).context("parse canvas captures")?;

    captures
        .into_iter()
        .map(|capture| {
            let data = DataUrl::parse(&capture.data_url)
                .with_context(|| format!("decode canvas {}", capture.index))?;
            if data.mime != "image/png" {
                anyhow::bail!("canvas {} is not a png: {}", capture.index, data.mime);
            }
            Ok((capture, data))
        })
        .collect()
}

pub fn variant_file_name(image_index: usize, capture: &CanvasCapture) -> String {
    let label = sanitize_segment(&capture.label);
    if label.is_empty() {
        format!("{image_index}-{}.png", capture.index)
    } else {
        format!("{image_index}-{}-{label}.png", capture.index)
    }
}

/// Writes every capture under a temp name first and renames them into place
/// only once all writes succeeded. On failure the files written so far are
/// removed, along with `out_dir` if this call created it.
async fn write_variants(
    out_dir: &Path,
    image_index: usize,
    captures: &[(CanvasCapture, DataUrl)],
) -> anyhow::Result<Vec<PathBuf>> {
    let created_dir = !tokio::fs::try_exists(out_dir).await.unwrap_or(false);
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("create augmented dir: {}", out_dir.display()))?;

    let mut staged = Vec::with_capacity(captures.len());
    let mut written = Vec::with_capacity(captures.len());
    let result = stage_and_commit(out_dir, image_index, captures, &mut staged, &mut written).await;
    if result.is_err() {
        for path in staged.iter().chain(&written) {
            if let Err(err) = tokio::fs::remove_file(path).await
                && err.kind() != std::io::ErrorKind::NotFound
            {
                tracing::debug!(path = %path.display(), ?err, "remove partial variant");
            }
        }
        if created_dir {
            let _ = tokio::fs::remove_dir(out_dir).await;
        }
    }
    result.map(|()| written)
}

async fn stage_and_commit(
    out_dir: &Path,
    image_index: usize,
    captures: &[(CanvasCapture, DataUrl)],
    staged: &mut Vec<PathBuf>,
    written: &mut Vec<PathBuf>,
) -> anyhow::Result<()> {
    let batch = uuid::Uuid::new_v4().simple().to_string();
    for (capture, data) in captures {
        let tmp_path = out_dir.join(format!(".{}.tmp.{batch}", variant_file_name(image_index, capture)));
        tokio::fs::write(&tmp_path, &data.bytes)
            .await
            .with_context(|| format!("write augmented image: {}", tmp_path.display()))?;
        staged.push(tmp_path);
    }

    for (tmp_path, (capture, _)) in staged.iter().zip(captures) {
        let path = out_dir.join(variant_file_name(image_index, capture));
        tokio::fs::rename(tmp_path, &path)
            .await
            .with_context(|| format!("rename augmented image: {}", path.display()))?;
        written.push(path);
    }
    staged.clear();
    Ok(())
}

/// Writes [`BUNDLED_PAGE`] into `dir` and returns its `file://` URL.
pub fn install_bundled_page(dir: &Path) -> anyhow::Result<String> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create output dir: {}", dir.display()))?;
    let path = dir.join("augment.html");
    std::fs::write(&path, BUNDLED_PAGE)
        .with_context(|| format!("write augmentation page: {}", path.display()))?;
    let path = std::fs::canonicalize(&path)
        .with_context(|| format!("resolve augmentation page: {}", path.display()))?;
    let url = url::Url::from_file_path(&path)
        .map_err(|()| anyhow::anyhow!("not an absolute path: {}", path.display()))?;
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::browser::testing::{ScriptedDriver, ScriptedSession};

    const PNG_DATA_URL: &str = "data:image/png;base64,iVBORw0KGgo=";

    fn canvases() -> serde_json::Value {
        json!([
            { "index": 0, "label": "Original", "dataUrl": PNG_DATA_URL },
            { "index": 1, "label": "Horizontal Flip", "dataUrl": PNG_DATA_URL },
        ])
    }

    fn augmenter(session: &Arc<ScriptedSession>, root: &Path) -> ImageAugmenter {
        let driver = Arc::new(ScriptedDriver {
            session: Arc::clone(session),
        });
        ImageAugmenter::new(
            driver,
            "file:///tmp/augment.html",
            root,
            Duration::from_secs(60),
            Duration::from_millis(500),
        )
    }

    fn count_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test(start_paused = true)]
    async fn poll_recovers_within_retry_limit() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        for k in 0..DEFAULT_POLL_ATTEMPTS {
            let session = Arc::new(ScriptedSession::default());
            *session.evaluation.lock().unwrap() = canvases();
            session
                .selector_polls
                .lock()
                .unwrap()
                .extend((0..k).map(|_| false));
            let root = temp.path().join(format!("k{k}"));

            let started = tokio::time::Instant::now();
            let written = augmenter(&session, &root)
                .augment(AugmentRequest {
                    source: Path::new("images/0-AS2100-as2100.jpg"),
                    label: "AS2100-as2100",
                    image_index: 0,
                })
                .await?;
            assert_eq!(started.elapsed(), POLL_BACKOFF * k);
            assert_eq!(*session.polls.lock().unwrap(), k + 1);
            assert_eq!(session.uploaded.lock().unwrap().len(), 1);
            assert!(*session.closed.lock().unwrap());

            let out_dir = root.join("AS2100-as2100");
            assert_eq!(
                written,
                vec![
                    out_dir.join("0-0-Original.png"),
                    out_dir.join("0-1-Horizontal_Flip.png"),
                ]
            );
            assert_eq!(std::fs::read(&written[0])?[..4], [0x89, b'P', b'N', b'G']);
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_poll_writes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let session = Arc::new(ScriptedSession::default());
        *session.evaluation.lock().unwrap() = canvases();
        session
            .selector_polls
            .lock()
            .unwrap()
            .extend((0..DEFAULT_POLL_ATTEMPTS).map(|_| false));

        let err = augmenter(&session, temp.path())
            .augment(AugmentRequest {
                source: Path::new("images/0-a.jpg"),
                label: "a",
                image_index: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AugmentError::Extraction { attempts: 3, .. }));
        assert_eq!(count_files(temp.path()), 0);
        assert!(*session.closed.lock().unwrap());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn upload_failure_is_not_retried() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let session = Arc::new(ScriptedSession::default());
        *session.upload_result.lock().unwrap() = Some("no such file input".to_owned());

        let started = tokio::time::Instant::now();
        let err = augmenter(&session, temp.path())
            .augment(AugmentRequest {
                source: Path::new("images/0-a.jpg"),
                label: "a",
                image_index: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AugmentError::Upload { .. }));
        assert_eq!(*session.polls.lock().unwrap(), 0);
        assert_eq!(started.elapsed(), Duration::ZERO);
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_canvas_writes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let session = Arc::new(ScriptedSession::default());
        *session.evaluation.lock().unwrap() = json!([
            { "index": 0, "label": "Original", "dataUrl": PNG_DATA_URL },
            { "index": 1, "label": "Broken", "dataUrl": "data:," },
        ]);

        let err = augmenter(&session, temp.path())
            .augment(AugmentRequest {
                source: Path::new("images/0-a.jpg"),
                label: "a",
                image_index: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AugmentError::Capture { .. }));
        assert_eq!(count_files(temp.path()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn failed_variant_write_removes_earlier_variants() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let out_dir = temp.path().join("a");
        std::fs::create_dir_all(out_dir.join("0-1-Horizontal_Flip.png"))?;
        let session = Arc::new(ScriptedSession::default());
        *session.evaluation.lock().unwrap() = canvases();

        let err = augmenter(&session, temp.path())
            .augment(AugmentRequest {
                source: Path::new("images/0-a.jpg"),
                label: "a",
                image_index: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AugmentError::Io(_)));

        let mut left: Vec<String> = std::fs::read_dir(&out_dir)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<Result<_, _>>()?;
        left.sort();
        assert_eq!(left, vec!["0-1-Horizontal_Flip.png"]);
        Ok(())
    }

    #[test]
    fn capture_script_reads_output_canvases_and_labels() {
        assert!(CAPTURE_SCRIPT.contains(CANVAS_SELECTOR));
        assert!(CAPTURE_SCRIPT.contains(r##"querySelectorAll("#output p")"##));
        assert!(CAPTURE_SCRIPT.trim_end().ends_with("})()"));
    }

    #[test]
    fn bundled_page_has_upload_input_and_output() {
        assert!(BUNDLED_PAGE.contains(r#"id="uploadImage""#));
        assert!(BUNDLED_PAGE.contains(r#"id="output""#));
    }

    #[test]
    fn install_bundled_page_returns_file_url() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let url = install_bundled_page(temp.path())?;
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("/augment.html"));
        assert!(temp.path().join("augment.html").exists());
        Ok(())
    }
}
