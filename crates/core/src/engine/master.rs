use crate::dsp::{Compressor, DynamicsConfig, Limiter, ParamRamp, Saturator};

/// Master chain: gain → saturation → compressor → limiter.
///
/// Gain follows the user's volume only; overload is left to the compressor
/// and limiter rather than scaling by track count.
#[derive(Debug)]
pub(crate) struct MasterBus {
    gain: ParamRamp,
    saturator: Saturator,
    compressor: Compressor,
    limiter: Limiter,
}

impl MasterBus {
    pub fn new(dynamics: &DynamicsConfig, saturation_drive: f32, volume: f32, sample_rate: u32) -> Self {
        Self {
            gain: ParamRamp::new(volume),
            saturator: Saturator::new(saturation_drive),
            compressor: Compressor::new(dynamics.compressor, sample_rate),
            limiter: Limiter::new(dynamics.limiter, sample_rate),
        }
    }

    pub fn set_volume(&mut self, volume: f32, ramp_frames: u32) {
        self.gain.ramp_to(volume, ramp_frames);
    }

    pub fn saturation_amount(&self) -> f32 {
        self.saturator.amount()
    }

    pub fn reset(&mut self) {
        self.compressor.reset();
        self.limiter.reset();
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let gain = self.gain.next_value();
        let left = self.saturator.process(left * gain);
        let right = self.saturator.process(right * gain);
        let (left, right) = self.compressor.process(left, right);
        self.limiter.process(left, right)
    }
}
