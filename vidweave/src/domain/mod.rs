//! Domain models for video composition requests.

pub mod composition;

pub use composition::{
    CompositionRequest, CompositionSettings, MediaKind, OutputFormat, Priority, Quality, Scene,
    SceneList, Transition, Watermark, WatermarkPosition,
};
