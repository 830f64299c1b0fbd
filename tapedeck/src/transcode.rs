//! Local media preparation (ffmpeg)
//!
//! Produces the analysis-ready media for each item: a 480p 1 fps proxy with
//! burnt-in timecode, an over-length split into overlapping chunks, and a
//! short sample clip for the pre-scan phase. All outputs are idempotent:
//! an artifact already on disk is reused, which is what makes the proxy
//! phase cheap to re-run after a resume.

use crate::layout::WorkLayout;
use crate::models::WorkItem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Chunk length for over-length footage (50 minutes)
pub const CHUNK_SECONDS: u64 = 3000;

/// Overlap between consecutive chunks, so a segment straddling a boundary
/// is fully visible in at least one chunk
pub const CHUNK_OVERLAP_SECONDS: u64 = 30;

/// Pre-scan sample: three minutes starting two minutes in
const SAMPLE_OFFSET_SECONDS: u64 = 120;
const SAMPLE_LENGTH_SECONDS: u64 = 180;

/// Burnt-in timecode overlay for the proxy
const BITC_FILTER: &str = "drawtext=text='%{pts\\:hms}':fontcolor=white:fontsize=24:box=1:boxcolor=black@0.5:x=10:y=h-th-10";

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("Could not probe duration of {0}: {1}")]
    Probe(PathBuf, String),
}

/// One stretch of analysis-ready media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaChunk {
    pub path: PathBuf,
    /// Offset of this chunk within the source, in seconds
    pub start_secs: u64,
    pub end_secs: u64,
}

/// Output of the proxy phase, written beside the proxy and read by every
/// analysis phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyManifest {
    pub source: PathBuf,
    /// The proxy (or the source itself when proxying is off), un-chunked.
    /// Escalation re-uploads this rather than individual chunks.
    pub analysis_media: PathBuf,
    pub duration_secs: u64,
    /// Media the analysis passes upload, in source order. A single entry
    /// means the footage fits one call.
    pub chunks: Vec<MediaChunk>,
    /// Short clip for the pre-scan phase
    pub sample: PathBuf,
}

impl ProxyManifest {
    pub fn load(path: &Path) -> Result<ProxyManifest, TranscodeError> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| TranscodeError::Probe(path.to_path_buf(), e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), TranscodeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| TranscodeError::Probe(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

/// Seam to the local media toolchain
#[allow(async_fn_in_trait)]
pub trait Transcoder {
    async fn probe_duration(&self, media: &Path) -> Result<Duration, TranscodeError>;

    /// Produce (or reuse) the analysis media for one item and write its
    /// manifest. With `make_proxy` false the source file is analyzed as-is.
    async fn prepare(
        &self,
        item: &WorkItem,
        layout: &WorkLayout,
        make_proxy: bool,
    ) -> Result<ProxyManifest, TranscodeError>;
}

/// ffmpeg/ffprobe-backed transcoder
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    async fn run(
        &self,
        tool: &'static str,
        args: &[&str],
    ) -> Result<String, TranscodeError> {
        debug!(tool, ?args, "Running media tool");
        let output = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(TranscodeError::ToolFailed {
                tool,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn create_proxy(&self, source: &Path, proxy: &Path) -> Result<(), TranscodeError> {
        if proxy.exists() {
            debug!(proxy = %proxy.display(), "Proxy already present, reusing");
            return Ok(());
        }
        if let Some(parent) = proxy.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!(source = %source.display(), "Transcoding proxy (480p, 1 fps, burnt-in timecode)");
        let filter = format!("scale=-2:480,fps=1,{}", BITC_FILTER);
        self.run(
            "ffmpeg",
            &[
                "-y",
                "-i",
                &source.to_string_lossy(),
                "-vf",
                &filter,
                "-c:v",
                "libx264",
                "-crf",
                "28",
                "-preset",
                "fast",
                "-c:a",
                "aac",
                "-b:a",
                "96k",
                &proxy.to_string_lossy(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn cut(
        &self,
        source: &Path,
        out: &Path,
        start: u64,
        length: u64,
    ) -> Result<(), TranscodeError> {
        if out.exists() {
            return Ok(());
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.run(
            "ffmpeg",
            &[
                "-y",
                "-ss",
                &start.to_string(),
                "-i",
                &source.to_string_lossy(),
                "-t",
                &length.to_string(),
                "-c",
                "copy",
                &out.to_string_lossy(),
            ],
        )
        .await?;
        Ok(())
    }
}

impl Transcoder for FfmpegTranscoder {
    async fn probe_duration(&self, media: &Path) -> Result<Duration, TranscodeError> {
        let stdout = self
            .run(
                "ffprobe",
                &[
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                    &media.to_string_lossy(),
                ],
            )
            .await?;
        stdout
            .trim()
            .parse::<f64>()
            .map(Duration::from_secs_f64)
            .map_err(|e| TranscodeError::Probe(media.to_path_buf(), e.to_string()))
    }

    async fn prepare(
        &self,
        item: &WorkItem,
        layout: &WorkLayout,
        make_proxy: bool,
    ) -> Result<ProxyManifest, TranscodeError> {
        let stem = item.stem();
        let analysis_media = if make_proxy {
            let proxy = layout.proxies_dir().join(format!("{}_proxy.mp4", stem));
            self.create_proxy(&item.path, &proxy).await?;
            proxy
        } else {
            item.path.clone()
        };

        let duration = self.probe_duration(&analysis_media).await?;
        let duration_secs = duration.as_secs();

        let spans = chunk_spans(duration_secs);
        let chunks = if spans.is_empty() {
            vec![MediaChunk {
                path: analysis_media.clone(),
                start_secs: 0,
                end_secs: duration_secs,
            }]
        } else {
            let mut chunks = Vec::with_capacity(spans.len());
            for (index, (start, end)) in spans.iter().enumerate() {
                let path = layout
                    .chunks_dir()
                    .join(format!("{}_chunk{:02}.mp4", stem, index));
                self.cut(&analysis_media, &path, *start, end - start).await?;
                chunks.push(MediaChunk {
                    path,
                    start_secs: *start,
                    end_secs: *end,
                });
            }
            chunks
        };

        let (sample_start, sample_len) = sample_span(duration_secs);
        let sample = layout.samples_dir().join(format!("{}_sample.mp4", stem));
        self.cut(&analysis_media, &sample, sample_start, sample_len)
            .await?;

        let manifest = ProxyManifest {
            source: item.path.clone(),
            analysis_media,
            duration_secs,
            chunks,
            sample,
        };
        manifest.save(&layout.manifest_path(&stem))?;
        info!(
            item = %item.id,
            duration_secs,
            chunks = manifest.chunks.len(),
            "Media prepared"
        );
        Ok(manifest)
    }
}

/// Split plan for over-length footage. Empty when the footage fits a single
/// call's worth of chunk length; otherwise consecutive spans overlap by
/// [`CHUNK_OVERLAP_SECONDS`] and the last span ends at the duration.
pub fn chunk_spans(duration_secs: u64) -> Vec<(u64, u64)> {
    if duration_secs <= CHUNK_SECONDS {
        return Vec::new();
    }
    let mut spans = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + CHUNK_SECONDS).min(duration_secs);
        spans.push((start, end));
        if end == duration_secs {
            return spans;
        }
        start = end - CHUNK_OVERLAP_SECONDS;
    }
}

/// Pre-scan sample placement: skip leader footage when there is room
fn sample_span(duration_secs: u64) -> (u64, u64) {
    if duration_secs > SAMPLE_OFFSET_SECONDS + SAMPLE_LENGTH_SECONDS {
        (SAMPLE_OFFSET_SECONDS, SAMPLE_LENGTH_SECONDS)
    } else {
        (0, duration_secs.min(SAMPLE_LENGTH_SECONDS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_footage_not_chunked() {
        assert!(chunk_spans(CHUNK_SECONDS).is_empty());
        assert!(chunk_spans(600).is_empty());
    }

    #[test]
    fn test_chunks_overlap_and_cover() {
        let spans = chunk_spans(7200);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0], (0, 3000));
        assert_eq!(spans[1], (2970, 5970));
        assert_eq!(spans[2], (5940, 7200));
        for pair in spans.windows(2) {
            assert_eq!(pair[0].1 - pair[1].0, CHUNK_OVERLAP_SECONDS);
        }
        assert_eq!(spans.last().unwrap().1, 7200);
    }

    #[test]
    fn test_sample_skips_leader_when_long_enough() {
        assert_eq!(sample_span(3600), (120, 180));
        assert_eq!(sample_span(301), (120, 180));
    }

    #[test]
    fn test_sample_from_start_for_short_footage() {
        assert_eq!(sample_span(240), (0, 180));
        assert_eq!(sample_span(90), (0, 90));
    }
}
