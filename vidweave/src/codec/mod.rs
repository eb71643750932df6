//! Low-level media codec capability.
//!
//! The composition pipeline drives an external encode/decode capability
//! through this interface; it never touches pixels itself.

pub mod ffmpeg;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compose::clip::Clip;
use crate::domain::{OutputFormat, WatermarkPosition};

pub use ffmpeg::FfmpegCodec;

/// Codec failure modes.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("probe failed for {path}: {cause}")]
    Probe { path: String, cause: String },

    #[error("decode failed for {path}: {cause}")]
    Decode { path: String, cause: String },

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("codec I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of the primary visual stream in a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    StillImage,
    Video,
}

/// Metadata extracted from a media file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub kind: StreamKind,
    pub width: u32,
    pub height: u32,
    /// Stream duration in seconds; still images have none.
    pub duration: Option<f64>,
    pub fps: Option<f64>,
    pub has_audio: bool,
}

/// Watermark overlay, already resolved to a local file.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSpec {
    pub path: std::path::PathBuf,
    pub position: WatermarkPosition,
    pub opacity: f64,
}

/// Encode parameters for one render.
///
/// The codec/preset half comes from the fixed per-format table
/// (`EncodeParams::for_format`); the canvas half is filled in by the render
/// pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    pub format: OutputFormat,
    /// Video encoder name; `None` selects the dedicated GIF path.
    pub video_codec: Option<&'static str>,
    /// Audio encoder name; `None` produces no audio track.
    pub audio_codec: Option<&'static str>,
    pub preset: Option<&'static str>,
    /// Output frame rate, already capped for GIF.
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub background_color: String,
    pub crossfade_audio: bool,
    pub watermark: Option<WatermarkSpec>,
}

impl EncodeParams {
    /// Fixed per-format codec table over the closed format enum.
    ///
    /// GIF takes a distinct encode path: frame rate capped at 15 and no
    /// audio track.
    pub fn for_format(format: OutputFormat, fps: u32) -> Self {
        let (video_codec, audio_codec, preset, fps) = match format {
            OutputFormat::Mp4 => (Some("libx264"), Some("aac"), Some("medium"), fps),
            OutputFormat::Webm => (Some("libvpx-vp9"), Some("libvorbis"), None, fps),
            OutputFormat::Avi => (Some("libxvid"), Some("libmp3lame"), None, fps),
            OutputFormat::Mov => (Some("libx264"), Some("aac"), None, fps),
            OutputFormat::Gif => (None, None, None, fps.min(15)),
        };
        Self {
            format,
            video_codec,
            audio_codec,
            preset,
            fps,
            width: 1920,
            height: 1080,
            background_color: "black".to_string(),
            crossfade_audio: false,
            watermark: None,
        }
    }
}

/// Capability interface over an external media codec.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaCodec: Send + Sync {
    /// Extract stream metadata from a local media file.
    async fn probe(&self, path: &Path) -> Result<MediaInfo, CodecError>;

    /// Probe, requiring the file to decode as a still image.
    async fn probe_image(&self, path: &Path) -> Result<MediaInfo, CodecError>;

    /// Render a composed timeline to `output`.
    async fn encode(
        &self,
        timeline: &Clip,
        params: &EncodeParams,
        output: &Path,
    ) -> Result<(), CodecError>;
}
