use serde::{Deserialize, Serialize};

use crate::{AlbumAudioError, Result};

/// Musical grid every live track is synchronised to.
///
/// At the defaults (120 bpm, 4/4, 8 measures) one measure lasts 2 s and the
/// full loop 16 s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopTiming {
    pub tempo_bpm: f64,
    pub beats_per_measure: u32,
    pub measures_per_loop: u32,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            tempo_bpm: 120.0,
            beats_per_measure: 4,
            measures_per_loop: 8,
        }
    }
}

impl LoopTiming {
    /// Rejects grids that have no finite measure length.
    pub fn validate(&self) -> Result<()> {
        if !self.tempo_bpm.is_finite() || self.tempo_bpm <= 0.0 {
            return Err(AlbumAudioError::InvalidInput("tempo must be a positive number"));
        }
        if self.beats_per_measure == 0 {
            return Err(AlbumAudioError::InvalidInput("a measure needs at least one beat"));
        }
        if self.measures_per_loop == 0 {
            return Err(AlbumAudioError::InvalidInput("a loop needs at least one measure"));
        }
        Ok(())
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.tempo_bpm
    }

    pub fn seconds_per_measure(&self) -> f64 {
        self.seconds_per_beat() * self.beats_per_measure as f64
    }

    pub fn loop_duration(&self) -> f64 {
        self.seconds_per_measure() * self.measures_per_loop as f64
    }

    pub fn measure_frames(&self, sample_rate: u32) -> u64 {
        (self.seconds_per_measure() * sample_rate as f64).round().max(1.0) as u64
    }

    pub fn loop_frames(&self, sample_rate: u32) -> u64 {
        self.measure_frames(sample_rate)
            .saturating_mul(self.measures_per_loop.max(1) as u64)
    }
}

/// Sample-accurate transport clock, counted in frames since `play()`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Transport {
    pub frame: u64,
}

impl Transport {
    pub fn reset(&mut self) {
        self.frame = 0;
    }

    pub fn advance(&mut self, frames: u64) {
        self.frame += frames;
    }

    pub fn seconds(&self, sample_rate: u32) -> f64 {
        self.frame as f64 / sample_rate as f64
    }

    /// First frame at or after the current position that lies on the measure grid.
    pub fn next_measure_frame(&self, measure_frames: u64) -> u64 {
        match self.frame % measure_frames {
            0 => self.frame,
            remainder => self.frame + (measure_frames - remainder),
        }
    }

    /// Position inside the loop at an arbitrary transport frame.
    pub fn loop_position(frame: u64, loop_frames: u64) -> u64 {
        frame % loop_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grid_is_two_second_measures_in_a_sixteen_second_loop() {
        let timing = LoopTiming::default();
        assert_eq!(timing.seconds_per_beat(), 0.5);
        assert_eq!(timing.seconds_per_measure(), 2.0);
        assert_eq!(timing.loop_duration(), 16.0);
        assert_eq!(timing.measure_frames(48_000), 96_000);
        assert_eq!(timing.loop_frames(48_000), 768_000);
    }

    #[test]
    fn rejects_grids_without_a_measure_length() {
        assert!(LoopTiming::default().validate().is_ok());
        for timing in [
            LoopTiming { tempo_bpm: 0.0, ..LoopTiming::default() },
            LoopTiming { tempo_bpm: -90.0, ..LoopTiming::default() },
            LoopTiming { tempo_bpm: f64::NAN, ..LoopTiming::default() },
            LoopTiming { beats_per_measure: 0, ..LoopTiming::default() },
            LoopTiming { measures_per_loop: 0, ..LoopTiming::default() },
        ] {
            assert!(timing.validate().is_err(), "{timing:?}");
        }

        let glacial = LoopTiming { tempo_bpm: 1e-300, ..LoopTiming::default() };
        assert!(glacial.validate().is_ok());
        assert_eq!(glacial.loop_frames(48_000), u64::MAX);
    }

    #[test]
    fn transport_quantises_to_measure_frames() {
        let mut transport = Transport::default();
        assert_eq!(transport.next_measure_frame(100), 0);

        transport.advance(130);
        assert_eq!(transport.next_measure_frame(100), 200);
        assert_eq!(transport.seconds(10), 13.0);
        assert_eq!(Transport::loop_position(1_730, 800), 130);

        transport.reset();
        assert_eq!(transport.frame, 0);
    }
}
