//! Signal-processing blocks shared by the live engine and the offline mixer.

mod dynamics;
mod pan;
mod phaser;
mod pitch;
mod ramp;
mod saturation;

use serde::{Deserialize, Serialize};

pub use dynamics::{Compressor, CompressorSettings, Limiter, LimiterSettings};
pub use pan::pan_stereo;
pub use phaser::{AllpassNetwork, Phaser};
pub use pitch::PitchShifter;
pub use ramp::ParamRamp;
pub use saturation::Saturator;

/// Master-bus dynamics settings, identical for live and offline rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicsConfig {
    pub compressor: CompressorSettings,
    pub limiter: LimiterSettings,
}

#[inline]
pub(crate) fn db_to_amplitude(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[inline]
pub(crate) fn amplitude_to_db(amplitude: f32) -> f32 {
    20.0 * amplitude.max(1e-10).log10()
}

/// One-pole smoothing coefficient for a time constant in seconds.
#[inline]
pub(crate) fn time_to_coeff(seconds: f32, sample_rate: u32) -> f32 {
    if seconds <= 0.0 {
        0.0
    } else {
        (-1.0 / (seconds * sample_rate as f32)).exp()
    }
}
