//! Composition request model.
//!
//! A request is an ordered collection of named scenes plus output
//! parameters. Scene order is the insertion order of the request map and
//! determines render order.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Job priority.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Media kind of a scene source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "video")]
    Video,
    /// Source that could be either; image decode is attempted first.
    #[serde(rename = "image/video", alias = "image_or_video")]
    ImageOrVideo,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::ImageOrVideo => "image/video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "image/video" | "image_or_video" => Some(Self::ImageOrVideo),
            _ => None,
        }
    }
}

/// Transition applied where a scene joins the preceding composed result.
///
/// Only `none`, `fade`, `crossfade`, and `slide_left` have distinct
/// composition rules; the remaining variants are accepted on the wire and
/// degrade to plain concatenation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Fade,
    Crossfade,
    SlideLeft,
    SlideRight,
    SlideUp,
    SlideDown,
    ZoomIn,
    ZoomOut,
    #[default]
    None,
}

/// Output container format.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
    Avi,
    Mov,
    Gif,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Avi => "avi",
            Self::Mov => "mov",
            Self::Gif => "gif",
        }
    }
}

/// Quality preset mapping to a fixed output resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "high")]
    High,
    #[serde(rename = "ultra")]
    Ultra,
    #[serde(rename = "480p")]
    Sd,
    #[serde(rename = "720p")]
    Hd,
    #[default]
    #[serde(rename = "1080p")]
    Fhd,
    #[serde(rename = "1440p")]
    Qhd,
    #[serde(rename = "4k")]
    Uhd,
}

impl Quality {
    /// Fixed quality → resolution table. The named tiers alias the
    /// resolution-based ones.
    pub fn resolution(&self) -> (u32, u32) {
        match self {
            Self::Sd | Self::Low => (640, 480),
            Self::Hd | Self::Medium => (1280, 720),
            Self::Fhd | Self::High => (1920, 1080),
            Self::Qhd => (2560, 1440),
            Self::Uhd | Self::Ultra => (3840, 2160),
        }
    }
}

/// One named segment of the output video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// URL or opaque file-store handle backing the scene.
    pub source: String,
    pub media_type: MediaKind,
    /// Scene duration in seconds; must be positive.
    pub duration: f64,
    #[serde(default)]
    pub transition: Transition,
}

/// Watermark position within the frame.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

/// Watermark overlay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    /// URL or file handle of the watermark image.
    pub source: String,
    #[serde(default)]
    pub position: WatermarkPosition,
    #[serde(default = "default_watermark_opacity")]
    pub opacity: f64,
}

fn default_watermark_opacity() -> f64 {
    0.5
}

/// Composition-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionSettings {
    #[serde(default = "default_background_color")]
    pub background_color: String,
    #[serde(default)]
    pub crossfade_audio: bool,
    #[serde(default)]
    pub watermark: Option<Watermark>,
}

fn default_background_color() -> String {
    "black".to_string()
}

impl Default for CompositionSettings {
    fn default() -> Self {
        Self {
            background_color: default_background_color(),
            crossfade_audio: false,
            watermark: None,
        }
    }
}

const NAMED_COLORS: &[&str] = &[
    "white", "black", "red", "green", "blue", "yellow", "cyan", "magenta", "orange", "purple",
    "pink", "brown", "gray", "grey",
];

fn is_valid_color(color: &str) -> bool {
    if let Some(hex) = color.strip_prefix('#') {
        return matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    NAMED_COLORS.contains(&color.to_ascii_lowercase().as_str())
}

/// Ordered, uniquely-named scene collection.
///
/// Serialized as a JSON object; deserialization preserves key order and
/// rejects duplicate scene names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneList(Vec<(String, Scene)>);

impl SceneList {
    pub fn new(entries: Vec<(String, Scene)>) -> Self {
        Self(entries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Scene)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }
}

impl Serialize for SceneList {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, scene) in &self.0 {
            map.serialize_entry(name, scene)?;
        }
        map.end()
    }
}

struct SceneListVisitor;

impl<'de> Visitor<'de> for SceneListVisitor {
    type Value = SceneList;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of scene names to scene data")
    }

    fn visit_map<A: MapAccess<'de>>(
        self,
        mut access: A,
    ) -> std::result::Result<Self::Value, A::Error> {
        let mut entries: Vec<(String, Scene)> =
            Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((name, scene)) = access.next_entry::<String, Scene>()? {
            if entries.iter().any(|(existing, _)| *existing == name) {
                return Err(serde::de::Error::custom(format!(
                    "duplicate scene name '{name}'"
                )));
            }
            entries.push((name, scene));
        }
        Ok(SceneList(entries))
    }
}

impl<'de> Deserialize<'de> for SceneList {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(SceneListVisitor)
    }
}

/// A full video composition request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionRequest {
    pub scenes: SceneList,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub composition_settings: CompositionSettings,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_fps() -> u32 {
    30
}

impl CompositionRequest {
    /// Sum of scene durations, before transition adjustments.
    pub fn total_duration(&self) -> f64 {
        self.scenes.iter().map(|(_, scene)| scene.duration).sum()
    }

    /// Validate the request. Runs before any job record is created.
    pub fn validate(&self) -> Result<()> {
        if self.scenes.is_empty() {
            return Err(Error::validation("At least one scene is required"));
        }
        for (name, scene) in self.scenes.iter() {
            if scene.source.trim().is_empty() {
                return Err(Error::validation(format!(
                    "Scene '{name}' has an empty source"
                )));
            }
            if scene.duration <= 0.0 || !scene.duration.is_finite() {
                return Err(Error::validation(format!(
                    "Scene '{name}' duration must be positive"
                )));
            }
        }
        if !(1..=60).contains(&self.fps) {
            return Err(Error::validation("fps must be between 1 and 60"));
        }
        if !is_valid_color(&self.composition_settings.background_color) {
            return Err(Error::validation(format!(
                "Invalid color: {}",
                self.composition_settings.background_color
            )));
        }
        if let Some(watermark) = &self.composition_settings.watermark {
            if !(0.0..=1.0).contains(&watermark.opacity) {
                return Err(Error::validation(
                    "watermark opacity must be between 0 and 1",
                ));
            }
        }
        Ok(())
    }
}
