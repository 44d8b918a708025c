use std::f32::consts::{PI, TAU};

use crate::mapping::PhaserParams;

use super::ParamRamp;

/// Frames between coefficient refreshes in the modulated phaser.
const COEFF_INTERVAL: u32 = 16;

/// First-order all-pass section.
#[derive(Debug, Clone, Copy, Default)]
struct AllpassStage {
    x1: f32,
    y1: f32,
}

impl AllpassStage {
    #[inline]
    fn process(&mut self, input: f32, coeff: f32) -> f32 {
        let output = coeff * input + self.x1 - coeff * self.y1;
        self.x1 = input;
        self.y1 = output;
        output
    }
}

#[inline]
fn allpass_coeff(frequency: f32, sample_rate: u32) -> f32 {
    let nyquist_guard = sample_rate as f32 * 0.49;
    let t = (PI * frequency.clamp(10.0, nyquist_guard) / sample_rate as f32).tan();
    (t - 1.0) / (t + 1.0)
}

/// LFO-swept all-pass phaser used by live tracks. Returns only the phased
/// (wet) signal; the caller blends it with the dry path.
#[derive(Debug, Clone)]
pub struct Phaser {
    sample_rate: u32,
    left: Vec<AllpassStage>,
    right: Vec<AllpassStage>,
    lfo_phase: f32,
    rate_hz: f32,
    octaves: ParamRamp,
    base_frequency: ParamRamp,
    coeff: f32,
    countdown: u32,
}

impl Phaser {
    pub fn new(sample_rate: u32, stages: usize, params: PhaserParams) -> Self {
        let mut phaser = Self {
            sample_rate,
            left: vec![AllpassStage::default(); stages.max(1)],
            right: vec![AllpassStage::default(); stages.max(1)],
            lfo_phase: 0.0,
            rate_hz: params.rate_hz,
            octaves: ParamRamp::new(params.octaves),
            base_frequency: ParamRamp::new(params.base_frequency),
            coeff: 0.0,
            countdown: 0,
        };
        phaser.refresh_coeff();
        phaser
    }

    /// Retunes the sweep, gliding depth and centre over `ramp_frames`.
    pub fn set_params(&mut self, params: PhaserParams, ramp_frames: u32) {
        self.rate_hz = params.rate_hz;
        self.octaves.ramp_to(params.octaves, ramp_frames);
        self.base_frequency.ramp_to(params.base_frequency, ramp_frames);
    }

    #[inline]
    pub fn tick(&mut self, left: f32, right: f32) -> (f32, f32) {
        let octaves = self.octaves.next_value();
        let base = self.base_frequency.next_value();

        self.lfo_phase += TAU * self.rate_hz / self.sample_rate as f32;
        if self.lfo_phase >= TAU {
            self.lfo_phase -= TAU;
        }

        if self.countdown == 0 {
            let sweep = 0.5 + 0.5 * self.lfo_phase.sin();
            self.coeff = allpass_coeff(base * 2f32.powf(octaves * sweep), self.sample_rate);
            self.countdown = COEFF_INTERVAL;
        }
        self.countdown -= 1;

        let coeff = self.coeff;
        let l = self.left.iter_mut().fold(left, |x, stage| stage.process(x, coeff));
        let r = self.right.iter_mut().fold(right, |x, stage| stage.process(x, coeff));
        (l, r)
    }

    pub fn reset(&mut self) {
        self.left.iter_mut().for_each(|s| *s = AllpassStage::default());
        self.right.iter_mut().for_each(|s| *s = AllpassStage::default());
        self.lfo_phase = 0.0;
        self.refresh_coeff();
    }

    fn refresh_coeff(&mut self) {
        self.coeff = allpass_coeff(self.base_frequency.value(), self.sample_rate);
        self.countdown = 0;
    }
}

/// Fixed-tuning all-pass network used offline in place of the swept phaser.
///
/// It reproduces the phase colouring at the centre of the live sweep but not
/// the movement, so exports are close to live playback rather than identical.
#[derive(Debug, Clone)]
pub struct AllpassNetwork {
    left: Vec<AllpassStage>,
    right: Vec<AllpassStage>,
    coeff: f32,
}

impl AllpassNetwork {
    pub fn new(sample_rate: u32, stages: usize, params: PhaserParams) -> Self {
        Self {
            left: vec![AllpassStage::default(); stages.max(1)],
            right: vec![AllpassStage::default(); stages.max(1)],
            coeff: allpass_coeff(params.center_frequency(), sample_rate),
        }
    }

    #[inline]
    pub fn tick(&mut self, left: f32, right: f32) -> (f32, f32) {
        let coeff = self.coeff;
        let l = self.left.iter_mut().fold(left, |x, stage| stage.process(x, coeff));
        let r = self.right.iter_mut().fold(right, |x, stage| stage.process(x, coeff));
        (l, r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn energy(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s * s).sum()
    }

    #[test]
    fn allpass_preserves_energy_of_a_long_tone() {
        let params = PhaserParams::from_intensity(0.5);
        let mut network = AllpassNetwork::new(48_000, 4, params);
        let input: Vec<f32> = (0..48_000)
            .map(|i| (TAU * 440.0 * i as f32 / 48_000.0).sin())
            .collect();
        let output: Vec<f32> = input.iter().map(|&x| network.tick(x, x).0).collect();

        let ratio = energy(&output[4_800..]) / energy(&input[4_800..]);
        assert!((ratio - 1.0).abs() < 0.05, "energy ratio {ratio}");
    }

    #[test]
    fn phaser_is_silent_on_silence() {
        let mut phaser = Phaser::new(48_000, 4, PhaserParams::from_intensity(1.0));
        for _ in 0..1_000 {
            assert_eq!(phaser.tick(0.0, 0.0), (0.0, 0.0));
        }
    }

    #[test]
    fn phaser_output_stays_bounded() {
        let mut phaser = Phaser::new(48_000, 6, PhaserParams::from_intensity(1.0));
        phaser.set_params(PhaserParams::from_intensity(0.2), 480);
        for i in 0..48_000 {
            let x = (TAU * 220.0 * i as f32 / 48_000.0).sin();
            let (l, r) = phaser.tick(x, x);
            assert!(l.abs() < 4.0 && r.abs() < 4.0);
        }
    }
}
