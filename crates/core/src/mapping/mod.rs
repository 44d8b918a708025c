//! Pure translation from a sticker's visual state to audio parameters.
//!
//! Both the live engine and the offline mixer call into this module so a
//! sticker sounds the same in playback and in an export.

use serde::{Deserialize, Serialize};

use crate::StickerInstance;

/// Tunables for the visual → audio mapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub base_volume: f32,
    pub scale_volume_multiplier: f32,
    /// Reserved left margin of the album layout, excluded from the pan range.
    pub left_padding: f32,
    pub default_sheet_width: f32,
    /// Rotation (degrees, either direction) at which the effect saturates.
    pub max_rotation_effect: f32,
    /// Wet mix reached at full effect intensity. Always below 1.
    pub wet_ceiling: f32,
    /// Length of the smoothing ramp used when a live track is updated.
    pub ramp_seconds: f32,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            base_volume: 0.6,
            scale_volume_multiplier: 0.4,
            left_padding: 48.0,
            default_sheet_width: 800.0,
            max_rotation_effect: 45.0,
            wet_ceiling: 0.5,
            ramp_seconds: 0.1,
        }
    }
}

/// Audio parameters for one sticker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackParams {
    pub volume: f32,
    pub pan: f32,
    pub effect_intensity: f32,
    pub wet: f32,
    pub pitch_semitones: i32,
}

impl TrackParams {
    pub fn from_sticker(sticker: &StickerInstance, config: &MappingConfig, sheet_width: f32) -> Self {
        let effect_intensity = map_effect_intensity(sticker.rotation, config);
        Self {
            volume: map_volume(sticker.scale, config),
            pan: map_pan(sticker.x, sheet_width, config),
            effect_intensity,
            wet: effect_intensity * config.wet_ceiling,
            pitch_semitones: sticker.pitch,
        }
    }

    pub fn phaser(&self) -> PhaserParams {
        PhaserParams::from_intensity(self.effect_intensity)
    }
}

/// `base + (scale - 1) * multiplier`. Unclamped; the master limiter is the ceiling.
pub fn map_volume(scale: f32, config: &MappingConfig) -> f32 {
    config.base_volume + (scale - 1.0) * config.scale_volume_multiplier
}

/// Horizontal position to stereo pan in `[-1, 1]`, ignoring the left margin.
pub fn map_pan(x: f32, sheet_width: f32, config: &MappingConfig) -> f32 {
    let span = sheet_width - config.left_padding;
    if span <= f32::EPSILON {
        return 0.0;
    }
    let normalised = (x - config.left_padding) / span;
    (normalised * 2.0 - 1.0).clamp(-1.0, 1.0)
}

/// `|rotation| / max_rotation_effect`, clamped to `[0, 1]`.
pub fn map_effect_intensity(rotation: f32, config: &MappingConfig) -> f32 {
    if config.max_rotation_effect <= f32::EPSILON {
        return 0.0;
    }
    (rotation.abs() / config.max_rotation_effect).clamp(0.0, 1.0)
}

/// Modulation settings derived from effect intensity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaserParams {
    pub rate_hz: f32,
    /// Sweep width above `base_frequency`, in octaves.
    pub octaves: f32,
    pub base_frequency: f32,
}

impl PhaserParams {
    pub fn from_intensity(intensity: f32) -> Self {
        let intensity = intensity.clamp(0.0, 1.0);
        Self {
            rate_hz: 0.2 + intensity * 3.8,
            octaves: 1.0 + intensity * 3.0,
            base_frequency: 300.0 + intensity * 900.0,
        }
    }

    /// Geometric middle of the sweep; the offline network is tuned here.
    pub fn center_frequency(&self) -> f32 {
        self.base_frequency * 2f32.powf(self.octaves * 0.5)
    }
}
