use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{AlbumAudioError, Result};

/// Time-averaging constant between successive snapshots, as in browser analysers.
const SMOOTHING: f32 = 0.8;
/// Range mapped onto the 0..=255 byte scale.
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

/// Rolling window over the master output with on-demand spectrum snapshots.
///
/// The engine pushes every rendered frame; the UI pulls
/// [`SpectrumAnalyser::frequency_data`] whenever it redraws.
pub struct SpectrumAnalyser {
    size: usize,
    ring: Vec<f32>,
    write_pos: usize,
    smoothed: Vec<f32>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SpectrumAnalyser {
    /// `size` is the FFT length; it yields `size / 2 + 1` bins.
    pub fn new(size: usize) -> Result<Self> {
        if size < 2 {
            return Err(AlbumAudioError::InvalidInput(
                "analyser needs an fft size of at least two samples",
            ));
        }
        Ok(Self {
            size,
            ring: vec![0.0; size],
            write_pos: 0,
            smoothed: vec![0.0; size / 2 + 1],
            fft_planner: RealFftPlanner::new(),
            fft: None,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bin_count(&self) -> usize {
        self.size / 2 + 1
    }

    pub fn reset(&mut self) {
        self.ring.fill(0.0);
        self.smoothed.fill(0.0);
        self.write_pos = 0;
    }

    #[inline]
    pub fn push_frame(&mut self, left: f32, right: f32) {
        self.ring[self.write_pos] = 0.5 * (left + right);
        self.write_pos = (self.write_pos + 1) % self.size;
    }

    /// RMS level of the current window.
    pub fn rms(&self) -> f32 {
        compute_rms(&self.ring)
    }

    /// Smoothed magnitude spectrum of the latest window, in dB.
    pub fn frequency_data(&mut self) -> Result<Vec<f32>> {
        let size = self.size;
        let start = self.write_pos;
        let fft = prepare_fft(&mut self.fft, &mut self.fft_planner, size);

        for index in 0..size {
            let sample = self.ring[(start + index) % size];
            fft.input[index] = sample * hann_value(index, size);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let scale = 1.0 / size as f32;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(fft.spectrum.iter()) {
            let magnitude = bin.norm() * scale;
            *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * magnitude;
        }

        Ok(self
            .smoothed
            .iter()
            .map(|magnitude| 20.0 * magnitude.max(1e-12).log10())
            .collect())
    }

    /// [`SpectrumAnalyser::frequency_data`] scaled to bytes between -100 and -30 dB.
    pub fn byte_frequency_data(&mut self) -> Result<Vec<u8>> {
        Ok(self
            .frequency_data()?
            .into_iter()
            .map(|db| {
                let normalised = (db - MIN_DB) / (MAX_DB - MIN_DB);
                (normalised.clamp(0.0, 1.0) * 255.0).round() as u8
            })
            .collect())
    }
}

fn prepare_fft<'a>(
    slot: &'a mut Option<FftResources>,
    planner: &mut RealFftPlanner<f32>,
    size: usize,
) -> &'a mut FftResources {
    slot.get_or_insert_with(|| {
        let plan = planner.plan_fft_forward(size);
        let scratch = plan.make_scratch_vec();
        let spectrum = plan.make_output_vec();
        let input = plan.make_input_vec();
        FftResources {
            plan,
            scratch,
            spectrum,
            input,
        }
    })
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("size", &self.size)
            .field("write_pos", &self.write_pos)
            .field("planned", &self.fft.is_some())
            .finish()
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
