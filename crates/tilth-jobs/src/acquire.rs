//! External acquisition tools: media download, channel listing, audio splitting.
//!
//! Each tool sits behind a narrow trait and is invoked as a subprocess with
//! a timeout. Failure text from the tools feeds the message-based permanence
//! heuristic; anything unrecognized stays retryable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use tilth_core::{defaults, DownloadedMedia, Error, MediaFetcher, MediaItem, MediaProvider, Result};

/// Fixed-duration segmentation of an audio file.
///
/// Returns segment paths in playback order. The caller owns the files and
/// deletes them when stitching is done.
#[async_trait]
pub trait AudioSplitter: Send + Sync {
    async fn split(&self, input: &Path, segment_secs: u32) -> Result<Vec<PathBuf>>;
}

/// Run a command with a timeout, returning stdout as a string.
async fn run_cmd_with_timeout(cmd: &mut Command, timeout_secs: u64) -> Result<String> {
    let output = tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| {
            Error::Internal(format!("External command timed out after {}s", timeout_secs))
        })?
        .map_err(|e| Error::Internal(format!("Failed to execute command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Internal(format!(
            "Command failed (exit {}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Keep keys filesystem-safe when they name temp files.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// =============================================================================
// FFMPEG SPLITTER
// =============================================================================

/// Splits audio into fixed-duration segments with ffmpeg's segment muxer.
pub struct FfmpegSplitter {
    binary: String,
    timeout_secs: u64,
}

impl FfmpegSplitter {
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            timeout_secs: defaults::SPLIT_CMD_TIMEOUT_SECS,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

impl Default for FfmpegSplitter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSplitter for FfmpegSplitter {
    async fn split(&self, input: &Path, segment_secs: u32) -> Result<Vec<PathBuf>> {
        let ext = input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3")
            .to_string();

        // Segments land directly in the temp dir under a unique prefix;
        // the caller owns and deletes the files after stitching.
        let dir = std::env::temp_dir();
        let prefix = format!("tilth-split-{}", uuid::Uuid::new_v4());
        let pattern = dir.join(format!("{}-%03d.{}", prefix, ext));

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-f")
            .arg("segment")
            .arg("-segment_time")
            .arg(segment_secs.to_string())
            .arg("-c")
            .arg("copy")
            .arg(&pattern);

        run_cmd_with_timeout(&mut cmd, self.timeout_secs).await?;

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&prefix) {
                paths.push(entry.path());
            }
        }
        paths.sort();

        debug!(
            input = %input.display(),
            segment_count = paths.len(),
            segment_secs,
            "Split audio into segments"
        );
        Ok(paths)
    }
}

// =============================================================================
// YT-DLP FETCHER / PROVIDER
// =============================================================================

/// Downloads raw audio with yt-dlp.
pub struct YtDlpFetcher {
    binary: String,
    timeout_secs: u64,
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            timeout_secs: defaults::FETCH_CMD_TIMEOUT_SECS,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, key: &str) -> Result<DownloadedMedia> {
        let target = std::env::temp_dir().join(format!("tilth-dl-{}.mp3", sanitize_key(key)));

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-x")
            .arg("--audio-format")
            .arg("mp3")
            .arg("--no-playlist")
            .arg("-o")
            .arg(&target)
            .arg(url);

        run_cmd_with_timeout(&mut cmd, self.timeout_secs).await?;

        let meta = tokio::fs::metadata(&target).await.map_err(|_| {
            Error::Internal(format!(
                "yt-dlp reported success but produced no file for {}",
                key
            ))
        })?;

        info!(media_key = %key, payload_bytes = meta.len(), "Downloaded media audio");
        Ok(DownloadedMedia::new(target, None, None))
    }
}

/// Raw yt-dlp JSON for one playlist entry.
#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    id: String,
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    upload_date: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    thumbnail: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    channel: Option<String>,
}

/// yt-dlp's YYYYMMDD upload date, as a UTC midnight timestamp.
fn parse_upload_date(raw: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%Y%m%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

impl From<YtDlpEntry> for MediaItem {
    fn from(entry: YtDlpEntry) -> Self {
        let url = entry
            .webpage_url
            .or(entry.url)
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", entry.id));
        MediaItem {
            key: entry.id,
            title: entry.title.unwrap_or_default(),
            description: entry.description.unwrap_or_default(),
            url,
            publish_date: entry.upload_date.as_deref().and_then(parse_upload_date),
            duration_secs: entry.duration,
            view_count: entry.view_count,
            thumbnail: entry.thumbnail,
            tags: entry.tags,
            channel_title: entry.channel,
        }
    }
}

/// Lists channel uploads with yt-dlp's flat playlist mode.
pub struct YtDlpProvider {
    binary: String,
    timeout_secs: u64,
}

impl YtDlpProvider {
    pub fn new() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            timeout_secs: defaults::FETCH_CMD_TIMEOUT_SECS,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

impl Default for YtDlpProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProvider for YtDlpProvider {
    async fn list_items(&self, channel: &str, limit: Option<usize>) -> Result<Vec<MediaItem>> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--flat-playlist").arg("--dump-json");
        if let Some(limit) = limit {
            cmd.arg("--playlist-end").arg(limit.to_string());
        }
        cmd.arg(channel);

        let stdout = run_cmd_with_timeout(&mut cmd, self.timeout_secs).await?;

        let mut items = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let entry: YtDlpEntry = serde_json::from_str(line)
                .map_err(|e| Error::Serialization(format!("Bad yt-dlp entry: {}", e)))?;
            items.push(MediaItem::from(entry));
        }

        info!(channel, result_count = items.len(), "Listed channel items");
        Ok(items)
    }
}
