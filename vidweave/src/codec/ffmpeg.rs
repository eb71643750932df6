//! ffmpeg/ffprobe-backed codec capability.
//!
//! Media metadata comes from `ffprobe -print_format json`; encoding builds
//! a single filter graph that places every segment on a background canvas
//! with its scaling, fades, and slide annotations applied.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{CodecError, EncodeParams, MediaCodec, MediaInfo, StreamKind};
use crate::compose::clip::{Clip, Segment, SegmentKind};
use crate::config::Settings;
use crate::domain::{OutputFormat, WatermarkPosition};

/// Container format names ffprobe reports for still images.
const STILL_IMAGE_FORMATS: &[&str] = &[
    "image2", "png_pipe", "jpeg_pipe", "mjpeg", "webp_pipe", "bmp_pipe", "tiff_pipe",
];

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

/// Parse an ffprobe rational frame rate like "30000/1001".
fn parse_fps(raw: &str) -> Option<f64> {
    let mut parts = raw.splitn(2, '/');
    let num: f64 = parts.next()?.trim().parse().ok()?;
    match parts.next() {
        Some(den) => {
            let den: f64 = den.trim().parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => Some(num),
    }
}

/// ffmpeg-backed implementation of the codec capability.
pub struct FfmpegCodec {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegCodec {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.ffmpeg_path.clone(), settings.ffprobe_path.clone())
    }

    fn classify(output: &ProbeOutput) -> StreamKind {
        let format_names: Vec<&str> = output
            .format
            .as_ref()
            .and_then(|f| f.format_name.as_deref())
            .unwrap_or_default()
            .split(',')
            .collect();
        if format_names
            .iter()
            .any(|name| STILL_IMAGE_FORMATS.contains(name))
        {
            return StreamKind::StillImage;
        }

        let single_frame = output
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .and_then(|s| s.nb_frames.as_deref())
            .is_some_and(|n| n == "1" || n == "0");
        if single_frame {
            StreamKind::StillImage
        } else {
            StreamKind::Video
        }
    }

    fn media_info(output: &ProbeOutput) -> Option<MediaInfo> {
        let video = output
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))?;
        let has_audio = output
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio"));
        let duration = video
            .duration
            .as_deref()
            .or(output
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref()))
            .and_then(|raw| raw.parse::<f64>().ok());
        let kind = Self::classify(output);
        Some(MediaInfo {
            kind,
            width: video.width.unwrap_or(0),
            height: video.height.unwrap_or(0),
            duration: if kind == StreamKind::StillImage {
                None
            } else {
                duration
            },
            fps: video.r_frame_rate.as_deref().and_then(parse_fps),
            has_audio,
        })
    }
}

#[async_trait::async_trait]
impl MediaCodec for FfmpegCodec {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, CodecError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(CodecError::Probe {
                path: path.display().to_string(),
                cause: last_lines(&output.stderr),
            });
        }

        let parsed: ProbeOutput =
            serde_json::from_slice(&output.stdout).map_err(|e| CodecError::Probe {
                path: path.display().to_string(),
                cause: format!("unparsable ffprobe output: {e}"),
            })?;

        Self::media_info(&parsed).ok_or_else(|| CodecError::Probe {
            path: path.display().to_string(),
            cause: "no video stream".to_string(),
        })
    }

    async fn probe_image(&self, path: &Path) -> Result<MediaInfo, CodecError> {
        let info = self.probe(path).await?;
        if info.kind != StreamKind::StillImage {
            return Err(CodecError::Decode {
                path: path.display().to_string(),
                cause: "not decodable as a still image".to_string(),
            });
        }
        Ok(info)
    }

    async fn encode(
        &self,
        timeline: &Clip,
        params: &EncodeParams,
        output: &Path,
    ) -> Result<(), CodecError> {
        let args = build_encode_args(timeline, params, output);
        debug!(?args, "running ffmpeg encode");

        let result = Command::new(&self.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .await?;

        if !result.status.success() {
            return Err(CodecError::Encode(format!(
                "ffmpeg exited with {}: {}",
                result.status.code().unwrap_or(-1),
                last_lines(&result.stderr)
            )));
        }
        Ok(())
    }
}

fn last_lines(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let mut lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines.split_off(lines.len().saturating_sub(3));
    if tail.is_empty() {
        "unknown ffmpeg error".to_string()
    } else {
        tail.join("; ")
    }
}

fn fmt_secs(value: f64) -> String {
    format!("{value:.3}")
}

/// Whether a video segment needs frame-rate resampling.
fn needs_fps_resample(segment: &Segment) -> bool {
    match (segment.kind, segment.source_fps) {
        (SegmentKind::Still, _) => true,
        (SegmentKind::Video, Some(source)) => (source - segment.target_fps as f64).abs() > 0.01,
        (SegmentKind::Video, None) => true,
    }
}

fn watermark_position(position: WatermarkPosition) -> &'static str {
    match position {
        WatermarkPosition::TopLeft => "x=10:y=10",
        WatermarkPosition::TopRight => "x=main_w-overlay_w-10:y=10",
        WatermarkPosition::BottomLeft => "x=10:y=main_h-overlay_h-10",
        WatermarkPosition::BottomRight => "x=main_w-overlay_w-10:y=main_h-overlay_h-10",
    }
}

/// Build the complete ffmpeg argument vector for one encode.
pub(crate) fn build_encode_args(
    timeline: &Clip,
    params: &EncodeParams,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
    ];

    for segment in &timeline.segments {
        match segment.kind {
            SegmentKind::Still => {
                args.extend(["-loop".into(), "1".into()]);
                args.extend(["-t".into(), fmt_secs(segment.duration)]);
            }
            SegmentKind::Video => {
                args.extend(["-t".into(), fmt_secs(segment.trim)]);
            }
        }
        args.extend(["-i".into(), segment.source.to_string_lossy().into_owned()]);
    }

    if let Some(watermark) = &params.watermark {
        args.extend(["-i".into(), watermark.path.to_string_lossy().into_owned()]);
    }

    let (graph, has_audio) = build_filter_graph(timeline, params);
    args.extend(["-filter_complex".into(), graph]);
    args.extend(["-map".into(), "[vout]".into()]);

    match (has_audio, params.audio_codec) {
        (true, Some(codec)) => {
            args.extend(["-map".into(), "[aout]".into()]);
            args.extend(["-c:a".into(), codec.into()]);
        }
        _ => args.push("-an".into()),
    }

    if let Some(codec) = params.video_codec {
        args.extend(["-c:v".into(), codec.into()]);
    }
    if let Some(preset) = params.preset {
        args.extend(["-preset".into(), preset.into()]);
    }
    if matches!(params.format, OutputFormat::Mp4 | OutputFormat::Mov) {
        args.extend(["-movflags".into(), "+faststart".into()]);
    }

    args.extend(["-t".into(), fmt_secs(timeline.duration)]);
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Build the filter graph; returns the graph and whether `[aout]` exists.
fn build_filter_graph(timeline: &Clip, params: &EncodeParams) -> (String, bool) {
    let mut filters: Vec<String> = Vec::new();
    let (width, height) = (params.width, params.height);

    filters.push(format!(
        "color=c={}:s={}x{}:r={}:d={}[base]",
        params.background_color,
        width,
        height,
        params.fps,
        fmt_secs(timeline.duration),
    ));

    for (index, segment) in timeline.segments.iter().enumerate() {
        let mut chain = vec![format!("scale={width}:{height}"), "setsar=1".to_string()];
        if needs_fps_resample(segment) {
            chain.push(format!("fps={}", segment.target_fps));
        }
        chain.push("format=yuva420p".to_string());
        if let Some(fade_in) = segment.fade_in {
            chain.push(format!("fade=t=in:st=0:d={}:alpha=1", fmt_secs(fade_in)));
        }
        if let Some(fade_out) = segment.fade_out {
            chain.push(format!(
                "fade=t=out:st={}:d={}:alpha=1",
                fmt_secs(segment.duration - fade_out),
                fmt_secs(fade_out)
            ));
        }
        chain.push(format!(
            "setpts=PTS-STARTPTS+{}/TB",
            fmt_secs(segment.start)
        ));
        filters.push(format!("[{index}:v]{}[v{index}]", chain.join(",")));
    }

    let mut previous = "base".to_string();
    for (index, segment) in timeline.segments.iter().enumerate() {
        let position = match segment.slide_in {
            Some(window) => format!(
                "x='max(0\\,W-W*(t-{})/{})':y=0",
                fmt_secs(segment.start),
                fmt_secs(window)
            ),
            None => "x=0:y=0".to_string(),
        };
        let label = format!("o{index}");
        filters.push(format!(
            "[{previous}][v{index}]overlay=eof_action=pass:{position}[{label}]"
        ));
        previous = label;
    }

    if let Some(watermark) = &params.watermark {
        let input = timeline.segments.len();
        filters.push(format!(
            "[{input}:v]format=rgba,colorchannelmixer=aa={:.2}[wm]",
            watermark.opacity
        ));
        filters.push(format!(
            "[{previous}][wm]overlay={}[marked]",
            watermark_position(watermark.position)
        ));
        previous = "marked".to_string();
    }

    if params.format == OutputFormat::Gif {
        // Dedicated GIF path: palette generation, no audio.
        filters.push(format!("[{previous}]split[p0][p1]"));
        filters.push("[p0]palettegen[pal]".to_string());
        filters.push("[p1][pal]paletteuse[vout]".to_string());
    } else {
        filters.push(format!("[{previous}]format=yuv420p[vout]"));
    }

    // Audio: each audio-bearing segment is trimmed, delayed to its
    // placement, and mixed. GIF and audio-less requests skip this.
    let mut audio_labels: Vec<String> = Vec::new();
    if params.audio_codec.is_some() {
        for (index, segment) in timeline.segments.iter().enumerate() {
            if !segment.has_audio {
                continue;
            }
            let mut chain = vec![
                format!("atrim=0:{}", fmt_secs(segment.trim)),
                "asetpts=PTS-STARTPTS".to_string(),
            ];
            if params.crossfade_audio {
                if let Some(fade_in) = segment.fade_in {
                    chain.push(format!("afade=t=in:st=0:d={}", fmt_secs(fade_in)));
                }
                if let Some(fade_out) = segment.fade_out {
                    chain.push(format!(
                        "afade=t=out:st={}:d={}",
                        fmt_secs(segment.duration - fade_out),
                        fmt_secs(fade_out)
                    ));
                }
            }
            let delay_ms = (segment.start * 1000.0).round() as u64;
            chain.push(format!("adelay={delay_ms}:all=1"));
            let label = format!("a{index}");
            filters.push(format!("[{index}:a]{}[{label}]", chain.join(",")));
            audio_labels.push(format!("[{label}]"));
        }
        if !audio_labels.is_empty() {
            filters.push(format!(
                "{}amix=inputs={}:duration=longest:normalize=0[aout]",
                audio_labels.concat(),
                audio_labels.len()
            ));
        }
    }

    (filters.join(";"), !audio_labels.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn segment(kind: SegmentKind, start: f64, duration: f64) -> Segment {
        Segment {
            source: PathBuf::from("/media/in.bin"),
            kind,
            start,
            duration,
            trim: duration,
            scale_to: (1920, 1080),
            target_fps: 30,
            source_fps: None,
            has_audio: false,
            fade_in: None,
            fade_out: None,
            slide_in: None,
        }
    }

    fn mp4_params() -> EncodeParams {
        let mut params = EncodeParams::for_format(OutputFormat::Mp4, 30);
        params.width = 1920;
        params.height = 1080;
        params
    }

    #[test]
    fn test_parse_fps_rational_and_plain() {
        assert_eq!(parse_fps("30/1"), Some(30.0));
        assert!((parse_fps("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_fps("25"), Some(25.0));
        assert_eq!(parse_fps("30/0"), None);
        assert_eq!(parse_fps("abc"), None);
    }

    #[test]
    fn test_classify_still_image_formats() {
        let parsed: ProbeOutput = serde_json::from_str(
            r#"{"format": {"format_name": "image2", "duration": null},
                "streams": [{"codec_type": "video", "width": 800, "height": 600}]}"#,
        )
        .unwrap();
        let info = FfmpegCodec::media_info(&parsed).unwrap();
        assert_eq!(info.kind, StreamKind::StillImage);
        assert_eq!(info.duration, None);
        assert!(!info.has_audio);
    }

    #[test]
    fn test_classify_video_with_audio() {
        let parsed: ProbeOutput = serde_json::from_str(
            r#"{"format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "12.5"},
                "streams": [
                    {"codec_type": "video", "width": 1920, "height": 1080,
                     "r_frame_rate": "30000/1001", "nb_frames": "374"},
                    {"codec_type": "audio"}
                ]}"#,
        )
        .unwrap();
        let info = FfmpegCodec::media_info(&parsed).unwrap();
        assert_eq!(info.kind, StreamKind::Video);
        assert_eq!(info.duration, Some(12.5));
        assert!(info.has_audio);
        assert!((info.fps.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_encode_args_mp4_codecs_and_faststart() {
        let timeline = Clip {
            segments: vec![segment(SegmentKind::Still, 0.0, 3.0)],
            duration: 3.0,
        };
        let args = build_encode_args(&timeline, &mp4_params(), Path::new("/out/a.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-preset medium"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(joined.contains("-loop 1"));
        // No audio-bearing segments: no track is produced.
        assert!(joined.contains("-an"));
        assert!(joined.ends_with("/out/a.mp4"));
    }

    #[test]
    fn test_encode_args_gif_uses_palette_and_no_audio() {
        let mut params = EncodeParams::for_format(OutputFormat::Gif, 30);
        params.width = 640;
        params.height = 480;
        let timeline = Clip {
            segments: vec![segment(SegmentKind::Still, 0.0, 2.0)],
            duration: 2.0,
        };
        let args = build_encode_args(&timeline, &params, Path::new("/out/a.gif"));
        let joined = args.join(" ");
        assert!(joined.contains("palettegen"));
        assert!(joined.contains("paletteuse"));
        assert!(joined.contains("-an"));
        assert!(!joined.contains("-c:v"));
    }

    #[test]
    fn test_fps_filter_skipped_when_source_matches() {
        let mut matching = segment(SegmentKind::Video, 0.0, 5.0);
        matching.source_fps = Some(30.0);
        let timeline = Clip {
            segments: vec![matching],
            duration: 5.0,
        };
        let (graph, _) = build_filter_graph(&timeline, &mp4_params());
        assert!(!graph.contains("fps=30"));

        let mut differing = segment(SegmentKind::Video, 0.0, 5.0);
        differing.source_fps = Some(24.0);
        let timeline = Clip {
            segments: vec![differing],
            duration: 5.0,
        };
        let (graph, _) = build_filter_graph(&timeline, &mp4_params());
        assert!(graph.contains("fps=30"));
    }

    #[test]
    fn test_fades_and_slide_appear_in_graph() {
        let mut fading = segment(SegmentKind::Still, 0.0, 3.0);
        fading.fade_out = Some(0.5);
        let mut sliding = segment(SegmentKind::Still, 3.0, 0.5);
        sliding.slide_in = Some(0.5);
        let timeline = Clip {
            segments: vec![fading, sliding],
            duration: 3.5,
        };
        let (graph, _) = build_filter_graph(&timeline, &mp4_params());
        assert!(graph.contains("fade=t=out:st=2.500:d=0.500:alpha=1"));
        assert!(graph.contains("overlay=eof_action=pass:x='max(0\\,W-W*(t-3.000)/0.500)':y=0"));
    }

    #[test]
    fn test_audio_segments_are_delayed_and_mixed() {
        let mut first = segment(SegmentKind::Video, 0.0, 4.0);
        first.has_audio = true;
        let mut second = segment(SegmentKind::Video, 4.0, 2.0);
        second.has_audio = true;
        let timeline = Clip {
            segments: vec![first, second],
            duration: 6.0,
        };
        let (graph, has_audio) = build_filter_graph(&timeline, &mp4_params());
        assert!(has_audio);
        assert!(graph.contains("adelay=4000:all=1"));
        assert!(graph.contains("amix=inputs=2"));
    }

    #[test]
    fn test_watermark_overlay_position_and_opacity() {
        let mut params = mp4_params();
        params.watermark = Some(crate::codec::WatermarkSpec {
            path: PathBuf::from("/media/logo.png"),
            position: WatermarkPosition::BottomRight,
            opacity: 0.5,
        });
        let timeline = Clip {
            segments: vec![segment(SegmentKind::Still, 0.0, 2.0)],
            duration: 2.0,
        };
        let args = build_encode_args(&timeline, &params, Path::new("/out/a.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("colorchannelmixer=aa=0.50"));
        assert!(joined.contains("overlay=x=main_w-overlay_w-10:y=main_h-overlay_h-10"));
        // Watermark is the extra trailing input.
        assert!(joined.contains("-i /media/logo.png"));
    }
}
