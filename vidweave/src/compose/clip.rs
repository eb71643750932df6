//! Clip timeline model and the scene materializer.
//!
//! A `Clip` is the decoded-free description of composed visual content: an
//! ordered set of segments placed on a shared timeline, each pointing at a
//! local media file with trim, scaling, and fade annotations. The codec
//! capability turns this description into pixels at encode time.

use std::path::PathBuf;
use std::sync::Arc;

use crate::codec::{MediaCodec, StreamKind};
use crate::compose::ComposeError;
use crate::domain::MediaKind;
use crate::media::ResolvedMedia;

/// Kind of a timeline segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// A still image held visible for the segment duration.
    Still,
    /// A trimmed span of a video stream.
    Video,
}

/// One placed span of source media on the output timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub source: PathBuf,
    pub kind: SegmentKind,
    /// Placement offset on the combined timeline, seconds.
    pub start: f64,
    /// Visible duration on the timeline, seconds.
    pub duration: f64,
    /// Seconds consumed from the source, from its beginning.
    pub trim: f64,
    /// Target box the segment is scaled to (fit, aspect not preserved).
    pub scale_to: (u32, u32),
    /// Target frame rate for the segment.
    pub target_fps: u32,
    /// Source frame rate when known; used to skip redundant resampling.
    pub source_fps: Option<f64>,
    pub has_audio: bool,
    /// Fade-from-black window at the segment head, seconds.
    pub fade_in: Option<f64>,
    /// Fade-to-black window at the segment tail, seconds.
    pub fade_out: Option<f64>,
    /// Slide-in-from-right window at the segment head, seconds.
    pub slide_in: Option<f64>,
}

/// A time-bounded, resolution/framerate-normalized composition of segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clip {
    pub segments: Vec<Segment>,
    /// Total timeline duration in seconds.
    pub duration: f64,
}

impl Clip {
    pub fn single(segment: Segment) -> Self {
        let duration = segment.duration;
        Self {
            segments: vec![segment],
            duration,
        }
    }

    /// Shift every segment placement by `offset` seconds.
    pub fn shift(&mut self, offset: f64) {
        for segment in &mut self.segments {
            segment.start += offset;
        }
    }

    /// Truncate the visible timeline to `limit` seconds.
    ///
    /// Segments starting at or past the limit are dropped; the rest are
    /// clamped (trim shrinks with the visible duration).
    pub fn truncate(&mut self, limit: f64) {
        self.segments.retain(|s| s.start < limit);
        for segment in &mut self.segments {
            let visible = (limit - segment.start).min(segment.duration);
            if visible < segment.duration {
                segment.duration = visible;
                segment.trim = segment.trim.min(visible);
            }
        }
        self.duration = self.duration.min(limit);
    }

    /// Sequentially concatenate clips into one timeline.
    pub fn concat(clips: Vec<Clip>) -> Clip {
        let mut segments = Vec::new();
        let mut offset = 0.0;
        for mut clip in clips {
            clip.shift(offset);
            offset += clip.duration;
            segments.extend(clip.segments);
        }
        Clip {
            segments,
            duration: offset,
        }
    }
}

/// Turns resolved media plus scene parameters into clips.
pub struct ClipMaterializer {
    codec: Arc<dyn MediaCodec>,
}

impl ClipMaterializer {
    pub fn new(codec: Arc<dyn MediaCodec>) -> Self {
        Self { codec }
    }

    /// Produce a time-bounded, normalized clip for one scene.
    ///
    /// Decode failures surface as errors; a blank frame is never silently
    /// substituted.
    pub async fn materialize(
        &self,
        scene_name: &str,
        resolved: &ResolvedMedia,
        media_kind: MediaKind,
        duration: f64,
        target_resolution: (u32, u32),
        target_fps: u32,
    ) -> Result<Clip, ComposeError> {
        match media_kind {
            MediaKind::Image => {
                self.still_clip(scene_name, resolved, duration, target_resolution, target_fps)
                    .await
            }
            MediaKind::Video => {
                self.video_clip(scene_name, resolved, duration, target_resolution, target_fps)
                    .await
            }
            MediaKind::ImageOrVideo => {
                // Ambiguous-source mode: image decode first, video fallback.
                match self
                    .still_clip(scene_name, resolved, duration, target_resolution, target_fps)
                    .await
                {
                    Ok(clip) => Ok(clip),
                    Err(_) => {
                        self.video_clip(
                            scene_name,
                            resolved,
                            duration,
                            target_resolution,
                            target_fps,
                        )
                        .await
                    }
                }
            }
        }
    }

    async fn still_clip(
        &self,
        scene_name: &str,
        resolved: &ResolvedMedia,
        duration: f64,
        target_resolution: (u32, u32),
        target_fps: u32,
    ) -> Result<Clip, ComposeError> {
        self.codec
            .probe_image(resolved.path())
            .await
            .map_err(|e| ComposeError::Decode {
                scene: scene_name.to_string(),
                cause: e.to_string(),
            })?;

        Ok(Clip::single(Segment {
            source: resolved.path().to_path_buf(),
            kind: SegmentKind::Still,
            start: 0.0,
            duration,
            trim: duration,
            scale_to: target_resolution,
            target_fps,
            source_fps: None,
            has_audio: false,
            fade_in: None,
            fade_out: None,
            slide_in: None,
        }))
    }

    async fn video_clip(
        &self,
        scene_name: &str,
        resolved: &ResolvedMedia,
        duration: f64,
        target_resolution: (u32, u32),
        target_fps: u32,
    ) -> Result<Clip, ComposeError> {
        let info = self
            .codec
            .probe(resolved.path())
            .await
            .map_err(|e| ComposeError::Decode {
                scene: scene_name.to_string(),
                cause: e.to_string(),
            })?;

        if info.kind != StreamKind::Video {
            return Err(ComposeError::Decode {
                scene: scene_name.to_string(),
                cause: "source has no video stream".to_string(),
            });
        }

        // Trim to [0, min(requested, source duration)].
        let trim = match info.duration {
            Some(source_duration) => duration.min(source_duration),
            None => duration,
        };

        Ok(Clip::single(Segment {
            source: resolved.path().to_path_buf(),
            kind: SegmentKind::Video,
            start: 0.0,
            duration: trim,
            trim,
            scale_to: target_resolution,
            target_fps,
            source_fps: info.fps,
            has_audio: info.has_audio,
            fade_in: None,
            fade_out: None,
            slide_in: None,
        }))
    }
}
