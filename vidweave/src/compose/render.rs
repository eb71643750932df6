//! Render pipeline: orchestrates resolve → materialize → composite →
//! encode for one composition request.

use std::path::PathBuf;
use std::sync::Arc;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::{EncodeParams, MediaCodec, WatermarkSpec};
use crate::compose::clip::{Clip, ClipMaterializer};
use crate::compose::progress::ProgressSender;
use crate::compose::{ComposeError, transition};
use crate::domain::{CompositionRequest, OutputFormat, Transition};
use crate::media::{MediaResolver, ResolvedMedia};

/// Result of a successful render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Final timeline duration in seconds, after transition adjustments.
    pub duration: f64,
    pub format: OutputFormat,
}

/// Orchestrates the composition of one request into one artifact.
pub struct RenderPipeline {
    resolver: Arc<MediaResolver>,
    materializer: ClipMaterializer,
    codec: Arc<dyn MediaCodec>,
    output_dir: PathBuf,
}

impl RenderPipeline {
    pub fn new(resolver: Arc<MediaResolver>, codec: Arc<dyn MediaCodec>, output_dir: PathBuf) -> Self {
        Self {
            resolver,
            materializer: ClipMaterializer::new(codec.clone()),
            codec,
            output_dir,
        }
    }

    /// Render the request to a fresh artifact under the output directory.
    ///
    /// Progress checkpoints are emitted in stage order and are strictly
    /// non-decreasing; cancellation is observed at the start of each scene
    /// iteration and once more before the encode step. Resolved media is
    /// owned by this invocation and released on every exit path.
    pub async fn render(
        &self,
        api_key: &str,
        request: &CompositionRequest,
        progress: &ProgressSender,
        token: &CancellationToken,
    ) -> Result<RenderedArtifact, ComposeError> {
        let (width, height) = request.quality.resolution();
        let scene_count = request.scenes.len();

        progress.checkpoint(10.0, "Creating clips from scenes").await;

        // Resolved media must outlive the encode step, which reads the
        // files; the vec drops (and deletes scratch files) on any return.
        let mut resolved_media: Vec<ResolvedMedia> = Vec::with_capacity(scene_count);
        let mut clips: Vec<(Clip, Transition)> = Vec::with_capacity(scene_count);

        for (index, (name, scene)) in request.scenes.iter().enumerate() {
            if token.is_cancelled() {
                return Err(ComposeError::Cancelled);
            }

            debug!(scene = %name, source = %scene.source, "resolving scene media");
            let resolved = self.resolver.resolve(&scene.source, api_key).await?;
            let clip = self
                .materializer
                .materialize(
                    name,
                    &resolved,
                    scene.media_type,
                    scene.duration,
                    (width, height),
                    request.fps,
                )
                .await?;
            resolved_media.push(resolved);
            clips.push((clip, scene.transition));

            let percent = 10.0 + ((index + 1) as f64 / scene_count as f64) * 50.0;
            progress.tick(percent, format!("Processing scene: {name}"));
        }

        progress.checkpoint(70.0, "Applying transitions").await;

        // Scene i's transition joins it onto the previous accumulated
        // result; a plain `none` starts a new run instead of merging.
        let mut final_clips: Vec<Clip> = Vec::new();
        for (clip, scene_transition) in clips {
            if final_clips.is_empty() || scene_transition == Transition::None {
                final_clips.push(clip);
            } else {
                let previous = final_clips.pop().unwrap_or_default();
                final_clips.push(transition::apply(
                    previous,
                    clip,
                    scene_transition,
                    transition::DEFAULT_TRANSITION_WINDOW,
                ));
            }
        }

        progress.checkpoint(80.0, "Concatenating video").await;
        let timeline = Clip::concat(final_clips);

        progress.checkpoint(90.0, "Rendering final video").await;

        let mut params = EncodeParams::for_format(request.output_format, request.fps);
        params.width = width;
        params.height = height;
        params.background_color = request.composition_settings.background_color.clone();
        params.crossfade_audio = request.composition_settings.crossfade_audio;

        let _watermark_media;
        if let Some(watermark) = &request.composition_settings.watermark {
            let resolved = self.resolver.resolve(&watermark.source, api_key).await?;
            params.watermark = Some(WatermarkSpec {
                path: resolved.path().to_path_buf(),
                position: watermark.position,
                opacity: watermark.opacity,
            });
            _watermark_media = Some(resolved);
        } else {
            _watermark_media = None;
        }

        // Encode is not interruptible; last cancellation check before it.
        if token.is_cancelled() {
            return Err(ComposeError::Cancelled);
        }

        let output_path = self.fresh_output_path(request.output_format);
        self.codec.encode(&timeline, &params, &output_path).await?;

        let metadata = tokio::fs::metadata(&output_path)
            .await
            .map_err(|_| ComposeError::MissingArtifact(output_path.display().to_string()))?;

        progress
            .checkpoint(100.0, "Video composition complete")
            .await;
        info!(
            path = %output_path.display(),
            duration = timeline.duration,
            "composition rendered"
        );

        Ok(RenderedArtifact {
            path: output_path,
            size_bytes: metadata.len(),
            duration: timeline.duration,
            format: request.output_format,
        })
    }

    /// Collision-free output path derived from random bytes.
    fn fresh_output_path(&self, format: OutputFormat) -> PathBuf {
        let tag: u64 = rand::rng().random();
        self.output_dir.join(format!(
            "composition_{:012x}.{}",
            tag & 0xffff_ffff_ffff,
            format.extension()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, MediaInfo, MockMediaCodec, StreamKind};
    use crate::database::models::StoredFileDbModel;
    use crate::database::repositories::{FileRepository, SqlxFileRepository};
    use crate::database::test_pool;
    use crate::domain::{
        CompositionSettings, MediaKind, Priority, Quality, Scene, SceneList,
    };
    use chrono::Utc;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Fixture {
        resolver: Arc<MediaResolver>,
        files: Arc<SqlxFileRepository>,
        dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let pool = test_pool().await;
        let files = Arc::new(SqlxFileRepository::new(pool));
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MediaResolver::new(
            files.clone(),
            dir.path().to_path_buf(),
            1024 * 1024,
            Duration::from_secs(2),
        ));
        Fixture {
            resolver,
            files,
            dir,
        }
    }

    async fn seed_file(fixture: &Fixture, id: &str, name: &str) {
        let path = fixture.dir.path().join(name);
        tokio::fs::write(&path, b"media-bytes").await.unwrap();
        fixture
            .files
            .create(&StoredFileDbModel {
                id: id.to_string(),
                api_key: "k".to_string(),
                filename: name.to_string(),
                original_filename: name.to_string(),
                file_path: path.to_string_lossy().to_string(),
                media_kind: "video".to_string(),
                mime_type: "application/octet-stream".to_string(),
                file_size: 11,
                width: None,
                height: None,
                duration: None,
                fps: None,
                created_at: Utc::now().to_rfc3339(),
                expires_at: None,
            })
            .await
            .unwrap();
    }

    fn scene(source: &str, kind: MediaKind, duration: f64, transition: Transition) -> Scene {
        Scene {
            source: source.to_string(),
            media_type: kind,
            duration,
            transition,
        }
    }

    fn request(entries: Vec<(String, Scene)>, format: OutputFormat, fps: u32) -> CompositionRequest {
        CompositionRequest {
            scenes: SceneList::new(entries),
            output_format: format,
            quality: Quality::Fhd,
            fps,
            priority: Priority::Normal,
            composition_settings: CompositionSettings::default(),
            webhook_url: None,
            metadata: serde_json::Value::Null,
        }
    }

    fn image_info() -> MediaInfo {
        MediaInfo {
            kind: StreamKind::StillImage,
            width: 800,
            height: 600,
            duration: None,
            fps: None,
            has_audio: false,
        }
    }

    fn video_info(duration: f64) -> MediaInfo {
        MediaInfo {
            kind: StreamKind::Video,
            width: 1280,
            height: 720,
            duration: Some(duration),
            fps: Some(30.0),
            has_audio: true,
        }
    }

    fn writing_codec() -> MockMediaCodec {
        let mut codec = MockMediaCodec::new();
        codec.expect_encode().returning(|_, _, output| {
            std::fs::write(output, b"artifact").unwrap();
            Ok(())
        });
        codec
    }

    #[tokio::test]
    async fn test_render_two_scenes_emits_monotonic_progress_to_100() {
        let fixture = fixture().await;
        seed_file(&fixture, "img-1", "a.jpg").await;
        seed_file(&fixture, "vid-1", "b.mp4").await;

        let mut codec = writing_codec();
        codec.expect_probe_image().returning(|_| Ok(image_info()));
        codec.expect_probe().returning(|_| Ok(video_info(30.0)));

        let pipeline = RenderPipeline::new(
            fixture.resolver.clone(),
            Arc::new(codec),
            fixture.dir.path().to_path_buf(),
        );
        let request = request(
            vec![
                (
                    "Scene 1".to_string(),
                    scene("img-1", MediaKind::Image, 3.0, Transition::Fade),
                ),
                (
                    "Scene 2".to_string(),
                    scene("vid-1", MediaKind::Video, 5.0, Transition::SlideLeft),
                ),
            ],
            OutputFormat::Mp4,
            30,
        );

        let (sender, mut rx) = ProgressSender::channel(64);
        let collector = tokio::spawn(async move {
            let mut updates = Vec::new();
            while let Some(update) = rx.recv().await {
                updates.push(update);
            }
            updates
        });

        let token = CancellationToken::new();
        let artifact = pipeline
            .render("k", &request, &sender, &token)
            .await
            .unwrap();
        drop(sender);
        let updates = collector.await.unwrap();

        assert!(artifact.path.exists());
        assert!(artifact.size_bytes > 0);
        // Scene 2 joins the accumulated result with slide_left: 3.0 + 0.5.
        assert!((artifact.duration - 3.5).abs() < 1e-9);

        let percents: Vec<f64> = updates.iter().map(|u| u.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(*percents.last().unwrap(), 100.0);
        assert!(percents.contains(&70.0));
        assert!(percents.contains(&80.0));
        assert!(percents.contains(&90.0));
    }

    #[tokio::test]
    async fn test_transitions_fold_onto_accumulated_tail() {
        let fixture = fixture().await;
        for (id, name) in [
            ("s-a", "a.jpg"),
            ("s-b", "b.jpg"),
            ("s-c", "c.jpg"),
            ("s-d", "d.jpg"),
        ] {
            seed_file(&fixture, id, name).await;
        }

        let captured: Arc<Mutex<Option<Clip>>> = Arc::new(Mutex::new(None));
        let captured_in_mock = captured.clone();
        let mut codec = MockMediaCodec::new();
        codec.expect_probe_image().returning(|_| Ok(image_info()));
        codec.expect_encode().returning(move |timeline, _, output| {
            *captured_in_mock.lock().unwrap() = Some(timeline.clone());
            std::fs::write(output, b"artifact").unwrap();
            Ok(())
        });

        let pipeline = RenderPipeline::new(
            fixture.resolver.clone(),
            Arc::new(codec),
            fixture.dir.path().to_path_buf(),
        );
        // A(3, none) B(4, crossfade) C(2, none) D(2, fade):
        // crossfade merges B onto A (3+4-0.5); C starts a new run; fade
        // merges D onto C (2+2). Total = 6.5 + 4.0.
        let request = request(
            vec![
                ("A".to_string(), scene("s-a", MediaKind::Image, 3.0, Transition::None)),
                ("B".to_string(), scene("s-b", MediaKind::Image, 4.0, Transition::Crossfade)),
                ("C".to_string(), scene("s-c", MediaKind::Image, 2.0, Transition::None)),
                ("D".to_string(), scene("s-d", MediaKind::Image, 2.0, Transition::Fade)),
            ],
            OutputFormat::Mp4,
            30,
        );

        let artifact = pipeline
            .render("k", &request, &ProgressSender::noop(), &CancellationToken::new())
            .await
            .unwrap();

        assert!((artifact.duration - 10.5).abs() < 1e-9);
        let timeline = captured.lock().unwrap().take().unwrap();
        assert_eq!(timeline.segments.len(), 4);
        // D fades in at the tail of C's run, not anywhere near A/B.
        let last = &timeline.segments[3];
        assert_eq!(last.fade_in, Some(0.5));
        assert!((last.start - 8.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_gif_path_caps_fps_and_has_no_audio() {
        let fixture = fixture().await;
        seed_file(&fixture, "img-1", "a.jpg").await;

        let captured: Arc<Mutex<Option<EncodeParams>>> = Arc::new(Mutex::new(None));
        let captured_in_mock = captured.clone();
        let mut codec = MockMediaCodec::new();
        codec.expect_probe_image().returning(|_| Ok(image_info()));
        codec.expect_encode().returning(move |_, params, output| {
            *captured_in_mock.lock().unwrap() = Some(params.clone());
            std::fs::write(output, b"gif").unwrap();
            Ok(())
        });

        let pipeline = RenderPipeline::new(
            fixture.resolver.clone(),
            Arc::new(codec),
            fixture.dir.path().to_path_buf(),
        );
        let request = request(
            vec![("A".to_string(), scene("img-1", MediaKind::Image, 2.0, Transition::None))],
            OutputFormat::Gif,
            30,
        );

        let artifact = pipeline
            .render("k", &request, &ProgressSender::noop(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(artifact.format, OutputFormat::Gif);

        let params = captured.lock().unwrap().take().unwrap();
        assert_eq!(params.fps, 15);
        assert!(params.audio_codec.is_none());
        assert!(params.video_codec.is_none());
    }

    #[tokio::test]
    async fn test_unknown_source_fails_with_source_error() {
        let fixture = fixture().await;
        let codec = writing_codec();
        let pipeline = RenderPipeline::new(
            fixture.resolver.clone(),
            Arc::new(codec),
            fixture.dir.path().to_path_buf(),
        );
        let request = request(
            vec![("A".to_string(), scene("no-such-handle", MediaKind::Image, 2.0, Transition::None))],
            OutputFormat::Mp4,
            30,
        );

        let err = pipeline
            .render("k", &request, &ProgressSender::noop(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no-such-handle"));
    }

    #[tokio::test]
    async fn test_cancellation_observed_before_scene_loop() {
        let fixture = fixture().await;
        let pipeline = RenderPipeline::new(
            fixture.resolver.clone(),
            Arc::new(MockMediaCodec::new()),
            fixture.dir.path().to_path_buf(),
        );
        let request = request(
            vec![("A".to_string(), scene("handle", MediaKind::Image, 2.0, Transition::None))],
            OutputFormat::Mp4,
            30,
        );

        let token = CancellationToken::new();
        token.cancel();
        let err = pipeline
            .render("k", &request, &ProgressSender::noop(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::Cancelled));
    }

    #[tokio::test]
    async fn test_encode_failure_surfaces_codec_error() {
        let fixture = fixture().await;
        seed_file(&fixture, "img-1", "a.jpg").await;

        let mut codec = MockMediaCodec::new();
        codec.expect_probe_image().returning(|_| Ok(image_info()));
        codec
            .expect_encode()
            .returning(|_, _, _| Err(CodecError::Encode("muxer exploded".to_string())));

        let pipeline = RenderPipeline::new(
            fixture.resolver.clone(),
            Arc::new(codec),
            fixture.dir.path().to_path_buf(),
        );
        let request = request(
            vec![("A".to_string(), scene("img-1", MediaKind::Image, 2.0, Transition::None))],
            OutputFormat::Mp4,
            30,
        );

        let err = pipeline
            .render("k", &request, &ProgressSender::noop(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("muxer exploded"));
    }

    #[test]
    fn test_fresh_output_paths_do_not_collide() {
        let dir = Path::new("/outputs");
        let pipeline_dir = dir.to_path_buf();
        let pipeline = RenderPipeline::new(
            Arc::new(MediaResolver::new(
                Arc::new(NullFiles),
                std::env::temp_dir(),
                1,
                Duration::from_secs(1),
            )),
            Arc::new(MockMediaCodec::new()),
            pipeline_dir,
        );
        let a = pipeline.fresh_output_path(OutputFormat::Mp4);
        let b = pipeline.fresh_output_path(OutputFormat::Mp4);
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with(".mp4"));
    }

    struct NullFiles;

    #[async_trait::async_trait]
    impl FileRepository for NullFiles {
        async fn create(&self, _file: &StoredFileDbModel) -> crate::Result<()> {
            Ok(())
        }
        async fn get(
            &self,
            _id: &str,
            _api_key: &str,
        ) -> crate::Result<Option<StoredFileDbModel>> {
            Ok(None)
        }
        async fn delete(&self, _id: &str, _api_key: &str) -> crate::Result<bool> {
            Ok(false)
        }
        async fn delete_expired(&self) -> crate::Result<u64> {
            Ok(0)
        }
    }
}
