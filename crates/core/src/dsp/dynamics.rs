use serde::{Deserialize, Serialize};

use super::{amplitude_to_db, db_to_amplitude, time_to_coeff};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorSettings {
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
    pub knee_db: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold_db: -12.0,
            ratio: 4.0,
            attack_secs: 0.003,
            release_secs: 0.25,
            knee_db: 0.0,
        }
    }
}

/// Stereo-linked feed-forward compressor.
#[derive(Debug, Clone)]
pub struct Compressor {
    settings: CompressorSettings,
    attack_coeff: f32,
    release_coeff: f32,
    gain_reduction_db: f32,
}

impl Compressor {
    pub fn new(settings: CompressorSettings, sample_rate: u32) -> Self {
        Self {
            settings: CompressorSettings {
                ratio: settings.ratio.max(1.0),
                knee_db: settings.knee_db.max(0.0),
                ..settings
            },
            attack_coeff: time_to_coeff(settings.attack_secs, sample_rate),
            release_coeff: time_to_coeff(settings.release_secs, sample_rate),
            gain_reduction_db: 0.0,
        }
    }

    pub fn gain_reduction_db(&self) -> f32 {
        self.gain_reduction_db
    }

    pub fn reset(&mut self) {
        self.gain_reduction_db = 0.0;
    }

    fn target_reduction(&self, input_db: f32) -> f32 {
        let CompressorSettings {
            threshold_db,
            ratio,
            knee_db,
            ..
        } = self.settings;
        let slope = 1.0 - 1.0 / ratio;

        if knee_db <= 0.0 {
            return (input_db - threshold_db).max(0.0) * slope;
        }

        let below = threshold_db - knee_db / 2.0;
        let above = threshold_db + knee_db / 2.0;
        if input_db <= below {
            0.0
        } else if input_db >= above {
            (input_db - threshold_db) * slope
        } else {
            let x = input_db - below;
            slope / (2.0 * knee_db) * x * x
        }
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let level = left.abs().max(right.abs());
        let target = self.target_reduction(amplitude_to_db(level));

        let coeff = if target > self.gain_reduction_db {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.gain_reduction_db = coeff * self.gain_reduction_db + (1.0 - coeff) * target;

        let gain = db_to_amplitude(-self.gain_reduction_db);
        (left * gain, right * gain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    pub threshold_db: f32,
    pub lookahead_secs: f32,
    pub release_secs: f32,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            threshold_db: -1.0,
            lookahead_secs: 0.0015,
            release_secs: 0.1,
        }
    }
}

/// Feed-forward lookahead peak limiter.
///
/// Audio is delayed by the lookahead window while the gain envelope converges
/// on the smallest gain any sample in that window needs. It only ever reduces
/// gain, so signals under the threshold come out as the delayed input.
#[derive(Debug, Clone)]
pub struct Limiter {
    threshold: f32,
    delay_left: Vec<f32>,
    delay_right: Vec<f32>,
    target_gains: Vec<f32>,
    write_pos: usize,
    gain: f32,
    attack_coeff: f32,
    release_coeff: f32,
}

impl Limiter {
    pub fn new(settings: LimiterSettings, sample_rate: u32) -> Self {
        let lookahead = ((settings.lookahead_secs * sample_rate as f32).round() as usize).max(1);
        let len = lookahead + 1;
        // 99 % of the way to the target within the lookahead window.
        let attack_coeff = (-4.605_17 / lookahead as f32).exp();

        Self {
            threshold: db_to_amplitude(settings.threshold_db),
            delay_left: vec![0.0; len],
            delay_right: vec![0.0; len],
            target_gains: vec![1.0; len],
            write_pos: 0,
            gain: 1.0,
            attack_coeff,
            release_coeff: time_to_coeff(settings.release_secs, sample_rate),
        }
    }

    pub fn latency_frames(&self) -> usize {
        self.delay_left.len()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.delay_left.fill(0.0);
        self.delay_right.fill(0.0);
        self.target_gains.fill(1.0);
        self.write_pos = 0;
        self.gain = 1.0;
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let peak = left.abs().max(right.abs());
        let target = if peak > self.threshold {
            self.threshold / peak
        } else {
            1.0
        };

        let delayed_left = self.delay_left[self.write_pos];
        let delayed_right = self.delay_right[self.write_pos];
        self.delay_left[self.write_pos] = left;
        self.delay_right[self.write_pos] = right;
        self.target_gains[self.write_pos] = target;
        self.write_pos = (self.write_pos + 1) % self.delay_left.len();

        let min_gain = self.target_gains.iter().copied().fold(1.0_f32, f32::min);
        let coeff = if min_gain < self.gain {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.gain = self.gain * coeff + min_gain * (1.0 - coeff);

        (delayed_left * self.gain, delayed_right * self.gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressor_leaves_quiet_signal_alone() {
        let mut compressor = Compressor::new(CompressorSettings::default(), 48_000);
        for _ in 0..4_800 {
            let (l, r) = compressor.process(0.1, -0.1);
            assert_eq!((l, r), (0.1, -0.1));
        }
    }

    #[test]
    fn compressor_reduces_loud_signal() {
        let mut compressor = Compressor::new(CompressorSettings::default(), 48_000);
        let mut last = (0.0, 0.0);
        for _ in 0..48_000 {
            last = compressor.process(1.0, 1.0);
        }
        // 12 dB over a 4:1 threshold settles at 9 dB of reduction.
        assert!((compressor.gain_reduction_db() - 9.0).abs() < 0.1);
        assert!(last.0 < 0.4);
    }

    #[test]
    fn soft_knee_is_continuous_at_its_edges() {
        let compressor = Compressor::new(
            CompressorSettings {
                knee_db: 6.0,
                ..CompressorSettings::default()
            },
            48_000,
        );
        assert_eq!(compressor.target_reduction(-15.0), 0.0);
        let edge = compressor.target_reduction(-9.0);
        assert!((edge - 3.0 * 0.75).abs() < 1e-4);
    }

    #[test]
    fn limiter_holds_the_ceiling() {
        let mut limiter = Limiter::new(LimiterSettings::default(), 48_000);
        let ceiling = limiter.threshold();
        let mut peak = 0.0_f32;
        for i in 0..48_000 {
            let x = if i % 100 < 50 { 2.0 } else { -2.0 };
            let (l, _) = limiter.process(x, x);
            if i > 4_800 {
                peak = peak.max(l.abs());
            }
        }
        assert!(peak <= ceiling * 1.02, "peak {peak} over ceiling {ceiling}");
    }

    #[test]
    fn limiter_only_delays_quiet_signal() {
        let mut limiter = Limiter::new(LimiterSettings::default(), 1_000);
        let latency = limiter.latency_frames();
        let input: Vec<f32> = (0..50).map(|i| (i as f32) * 0.01).collect();
        let output: Vec<f32> = input.iter().map(|&x| limiter.process(x, x).0).collect();

        for i in latency..input.len() {
            assert!((output[i] - input[i - latency]).abs() < 1e-6);
        }
    }
}
