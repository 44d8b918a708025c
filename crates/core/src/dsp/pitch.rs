use signalsmith_stretch::Stretch;

const CHANNELS: u32 = 2;

/// Semitone transposition without changing playback speed.
///
/// Input and output blocks always have the same length, so the stretcher
/// only transposes. The shifter delays audio by [`PitchShifter::latency`]
/// frames; callers that need phase alignment read their source that far ahead.
pub struct PitchShifter {
    stretcher: Stretch,
    semitones: i32,
    input: Vec<f32>,
    output: Vec<f32>,
}

impl PitchShifter {
    pub fn new(sample_rate: u32, semitones: i32) -> Self {
        let mut shifter = Self {
            stretcher: Stretch::preset_default(CHANNELS, sample_rate),
            semitones: 0,
            input: Vec::new(),
            output: Vec::new(),
        };
        shifter.set_semitones(semitones);
        shifter
    }

    pub fn set_semitones(&mut self, semitones: i32) {
        self.semitones = semitones.clamp(-12, 12);
        self.stretcher
            .set_transpose_factor_semitones(self.semitones as f32, None);
    }

    pub fn semitones(&self) -> i32 {
        self.semitones
    }

    pub fn latency(&self) -> usize {
        self.stretcher.input_latency() + self.stretcher.output_latency()
    }

    pub fn reset(&mut self) {
        self.stretcher.reset();
    }

    /// Transposes a planar stereo block in place.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        self.input.clear();
        for (l, r) in left.iter().zip(right.iter()).take(frames) {
            self.input.push(*l);
            self.input.push(*r);
        }
        self.output.clear();
        self.output.resize(frames * 2, 0.0);

        self.stretcher.process(&self.input[..], &mut self.output[..]);

        for (i, frame) in self.output.chunks_exact(2).enumerate() {
            left[i] = frame[0];
            right[i] = frame[1];
        }
    }
}

impl std::fmt::Debug for PitchShifter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitchShifter")
            .field("semitones", &self.semitones)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_to_an_octave() {
        let mut shifter = PitchShifter::new(48_000, 3);
        assert_eq!(shifter.semitones(), 3);
        shifter.set_semitones(20);
        assert_eq!(shifter.semitones(), 12);
        assert!(shifter.latency() > 0);
    }

    #[test]
    fn keeps_block_length() {
        let mut shifter = PitchShifter::new(48_000, -5);
        let mut left = vec![0.25; 512];
        let mut right = vec![-0.25; 512];
        shifter.process(&mut left, &mut right);
        assert_eq!(left.len(), 512);
        assert!(left.iter().chain(right.iter()).all(|s| s.is_finite()));
    }
}
