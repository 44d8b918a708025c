//! Core library for the Sticker Album audio stack.
//!
//! Every sticker placed on an album page plays a looping sample. The
//! [`AudioEngine`] keeps those loops phase aligned while stickers come and
//! go, the [`OfflineMixer`] renders the same album deterministically for
//! export, and the [`ExportOrchestrator`] hands the result to an external
//! video encoder. Visual-to-audio mapping lives in [`mapping`] and is shared
//! by both render paths.

pub mod analysis;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod export;
pub mod mapping;
pub mod mixer;
pub mod registry;
pub mod sample;
pub mod sticker;
pub mod timeline;

pub use analysis::SpectrumAnalyser;
pub use config::{AppConfig, AssetConfig, AudioConfig, ExportConfig};
pub use engine::{
    AudioEngine, AudioOutput, EngineHost, EngineState, LifecycleSignal, NullOutput, RenderHandle,
    Subscription, TrackInfo,
};
pub use error::{AlbumAudioError, Result};
pub use export::{
    export_file_name, EncodeRequest, EncoderClient, ExportJob, ExportOptions, ExportOrchestrator,
    ExportOutput, ExportPhase, ExportProgress, FrameRenderer, HttpEncoderClient, StillImage,
};
pub use mapping::{MappingConfig, PhaserParams, TrackParams};
pub use mixer::{MixerConfig, OfflineMixer, RenderedAudio};
pub use registry::{KitEntry, SharedRegistry, StickerAudio, StickerRegistry};
pub use sample::{InMemorySource, SampleBuffer, SampleCache, SampleSource, WavDirectorySource};
pub use sticker::StickerInstance;
pub use timeline::{LoopTiming, Transport};
