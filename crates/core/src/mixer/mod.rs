//! Offline mixer: renders a fixed-length stereo mix of an album for export.
//!
//! The render depends only on its inputs. It uses the same parameter
//! mapping as the live engine, but swaps the swept phaser for a static
//! [`AllpassNetwork`] and loops each sample at its own length instead of the
//! live loop period, so an export is close to, not identical with, what was
//! heard live. The master bus also saturates once the summed track volume
//! passes [`MixerConfig::saturation_threshold`], which live playback never does.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::dsp::{pan_stereo, AllpassNetwork, Compressor, DynamicsConfig, Limiter, PitchShifter, Saturator};
use crate::mapping::{MappingConfig, TrackParams};
use crate::registry::SharedRegistry;
use crate::sample::{SampleBuffer, SampleCache, SampleSource};
use crate::{AlbumAudioError, Result, StickerInstance};

/// Offline master-bus tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Summed track volume above which saturation kicks in.
    pub saturation_threshold: f32,
    /// Additional summed volume over which saturation ramps to full.
    pub saturation_range: f32,
    pub saturation_drive: f32,
    /// All-pass stages per channel, shared with the live phaser.
    pub allpass_stages: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            saturation_threshold: 1.5,
            saturation_range: 3.0,
            saturation_drive: 20.0,
            allpass_stages: 4,
        }
    }
}

/// Saturation amount in `[0, 1]` for a given sum of mapped track volumes.
pub fn saturation_amount(total_volume: f32, config: &MixerConfig) -> f32 {
    let excess = total_volume - config.saturation_threshold;
    if excess <= 0.0 || config.saturation_range <= 0.0 {
        return if excess > 0.0 { 1.0 } else { 0.0 };
    }
    (excess / config.saturation_range).clamp(0.0, 1.0)
}

/// A finished stereo render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedAudio {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
    /// Number of stickers that contributed audio.
    pub track_count: usize,
    pub saturation_amount: f32,
}

impl RenderedAudio {
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn peak(&self) -> f32 {
        self.left
            .iter()
            .chain(self.right.iter())
            .fold(0.0_f32, |peak, s| peak.max(s.abs()))
    }

    /// Serialises as interleaved 16-bit PCM WAV. Samples are clamped to
    /// `[-1, 1]` before quantisation.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        {
            let mut writer = WavWriter::new(Cursor::new(&mut buffer), wav_spec(self.sample_rate))?;
            self.write_samples(&mut writer)?;
            writer.finalize()?;
        }
        Ok(buffer)
    }

    pub fn write_wav(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = WavWriter::create(path, wav_spec(self.sample_rate))?;
        self.write_samples(&mut writer)?;
        writer.finalize()?;
        Ok(())
    }

    fn write_samples<W: std::io::Write + std::io::Seek>(&self, writer: &mut WavWriter<W>) -> Result<()> {
        for (&left, &right) in self.left.iter().zip(self.right.iter()) {
            writer.write_sample(quantize(left))?;
            writer.write_sample(quantize(right))?;
        }
        Ok(())
    }
}

fn wav_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

#[inline]
fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Renders sticker lists to stereo buffers without touching the live engine.
pub struct OfflineMixer {
    sample_rate: u32,
    block_size: usize,
    mapping: MappingConfig,
    dynamics: DynamicsConfig,
    config: MixerConfig,
    sheet_width: f32,
    registry: SharedRegistry,
    source: Arc<dyn SampleSource>,
    samples: SampleCache,
}

impl OfflineMixer {
    pub fn new(config: &AppConfig, registry: SharedRegistry, source: Arc<dyn SampleSource>) -> Self {
        Self {
            sample_rate: config.audio.sample_rate,
            block_size: config.audio.block_size.max(1),
            mapping: config.mapping,
            dynamics: config.dynamics,
            config: config.mixer,
            sheet_width: config.mapping.default_sheet_width,
            registry,
            source,
            samples: SampleCache::new(config.audio.sample_rate),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sheet_width(&self) -> f32 {
        self.sheet_width
    }

    pub fn set_sheet_width(&mut self, width: f32) {
        if width.is_finite() && width > 0.0 {
            self.sheet_width = width;
        }
    }

    /// Mixes `stickers` for `duration_secs`. Unknown types and unloadable
    /// samples are skipped.
    pub fn render(
        &mut self,
        stickers: &[StickerInstance],
        master_volume: f32,
        duration_secs: f32,
    ) -> Result<RenderedAudio> {
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(AlbumAudioError::InvalidInput("render duration must be positive"));
        }
        if self.sample_rate == 0 {
            return Err(AlbumAudioError::InvalidInput("sample rate must be positive"));
        }
        let master_volume = if master_volume.is_nan() { 0.0 } else { master_volume.clamp(0.0, 1.0) };
        let frames = (duration_secs as f64 * self.sample_rate as f64).round() as usize;

        let tracks = self.prepare(stickers)?;

        let mut compressor = Compressor::new(self.dynamics.compressor, self.sample_rate);
        let mut limiter = Limiter::new(self.dynamics.limiter, self.sample_rate);
        let latency = limiter.latency_frames();
        let padded = frames + latency;

        let mut mix_left = vec![0.0; padded];
        let mut mix_right = vec![0.0; padded];
        let mut total_volume = 0.0;
        for (sample, params) in &tracks {
            self.render_track(sample, params, &mut mix_left, &mut mix_right);
            total_volume += params.volume;
        }

        let mut saturator = Saturator::new(self.config.saturation_drive);
        saturator.set_amount(saturation_amount(total_volume, &self.config));

        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for (i, (&l, &r)) in mix_left.iter().zip(mix_right.iter()).enumerate() {
            let l = saturator.process(l * master_volume);
            let r = saturator.process(r * master_volume);
            let (l, r) = compressor.process(l, r);
            let (l, r) = limiter.process(l, r);
            if i >= latency {
                left.push(l);
                right.push(r);
            }
        }

        tracing::info!(
            tracks = tracks.len(),
            frames,
            saturation = saturator.amount(),
            "offline render finished"
        );
        Ok(RenderedAudio {
            left,
            right,
            sample_rate: self.sample_rate,
            track_count: tracks.len(),
            saturation_amount: saturator.amount(),
        })
    }

    /// Loads what is missing and pairs each playable sticker with its sample.
    fn prepare(&mut self, stickers: &[StickerInstance]) -> Result<Vec<(Arc<SampleBuffer>, TrackParams)>> {
        let registry = self
            .registry
            .read()
            .map_err(|_| AlbumAudioError::msg("sticker registry has been poisoned"))?;
        let types: Vec<String> = stickers.iter().map(|s| s.sticker_type.clone()).collect();
        self.samples.load_all(&registry, &types, self.source.as_ref());

        let tracks = stickers
            .iter()
            .filter_map(|sticker| {
                let sample = self.samples.get_for_type(&registry, &sticker.sticker_type)?;
                let params = TrackParams::from_sticker(sticker, &self.mapping, self.sheet_width);
                Some((sample, params))
            })
            .collect();
        Ok(tracks)
    }

    /// Adds one sticker, looped at the sample's own length, into the mix.
    fn render_track(&self, sample: &SampleBuffer, params: &TrackParams, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let sample_frames = sample.frames();
        if sample_frames == 0 {
            return;
        }

        let mut shifter = (params.pitch_semitones != 0)
            .then(|| PitchShifter::new(self.sample_rate, params.pitch_semitones));
        let read_ahead = shifter.as_ref().map_or(0, PitchShifter::latency);

        let mut dry_left: Vec<f32> = (0..frames + read_ahead)
            .map(|t| sample.left[t % sample_frames])
            .collect();
        let mut dry_right: Vec<f32> = (0..frames + read_ahead)
            .map(|t| sample.right[t % sample_frames])
            .collect();

        if let Some(shifter) = shifter.as_mut() {
            for (l, r) in dry_left
                .chunks_mut(self.block_size)
                .zip(dry_right.chunks_mut(self.block_size))
            {
                shifter.process(l, r);
            }
        }

        let mut network = AllpassNetwork::new(self.sample_rate, self.config.allpass_stages, params.phaser());
        let wet = params.wet;
        let dry_frames = dry_left[read_ahead..].iter().zip(dry_right[read_ahead..].iter());
        for (i, (&dl, &dr)) in dry_frames.enumerate().take(frames) {
            let (wl, wr) = network.tick(dl, dr);
            let (pl, pr) = pan_stereo(dl * (1.0 - wet) + wl * wet, dr * (1.0 - wet) + wr * wet, params.pan);
            left[i] += pl * params.volume;
            right[i] += pr * params.volume;
        }
    }
}

impl std::fmt::Debug for OfflineMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineMixer")
            .field("sample_rate", &self.sample_rate)
            .field("cached_samples", &self.samples.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StickerAudio;
    use crate::sample::InMemorySource;
    use crate::StickerRegistry;

    const RATE: u32 = 1_000;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.audio.sample_rate = RATE;
        config.audio.block_size = 128;
        config
    }

    fn impulse_every(period: usize) -> SampleBuffer {
        let mut samples = vec![0.0; period];
        samples[0] = 1.0;
        SampleBuffer::mono(samples, RATE).unwrap()
    }

    fn tone(frames: usize) -> SampleBuffer {
        let samples = (0..frames).map(|i| (i as f32 * 0.3).sin() * 0.8).collect();
        SampleBuffer::mono(samples, RATE).unwrap()
    }

    fn mixer() -> OfflineMixer {
        let source = InMemorySource::new()
            .with("audio/001/001-001.wav", tone(700))
            .with("audio/001/001-002.wav", tone(1_300))
            .with("audio/002/002-001.wav", impulse_every(300));
        OfflineMixer::new(
            &config(),
            StickerRegistry::with_builtin_catalog().into_shared(),
            Arc::new(source),
        )
    }

    fn album() -> Vec<StickerInstance> {
        vec![
            StickerInstance::new("a", "001-001", 100.0, 0.0).with_rotation(30.0),
            StickerInstance::new("b", "001-002", 700.0, 50.0).with_scale(1.5),
            StickerInstance::new("ghost", "999-001", 300.0, 0.0),
        ]
    }

    #[test]
    fn saturation_starts_past_the_threshold() {
        let config = MixerConfig::default();
        assert_eq!(saturation_amount(0.0, &config), 0.0);
        assert_eq!(saturation_amount(1.5, &config), 0.0);
        assert_eq!(saturation_amount(3.0, &config), 0.5);
        assert_eq!(saturation_amount(40.0, &config), 1.0);
    }

    #[test]
    fn identical_inputs_render_identical_bytes() {
        let first = mixer().render(&album(), 0.8, 4.0).unwrap();
        let second = mixer().render(&album(), 0.8, 4.0).unwrap();

        assert_eq!(first.frames(), 4_000);
        assert_eq!(first.track_count, 2);
        assert_eq!(first.to_wav_bytes().unwrap(), second.to_wav_bytes().unwrap());

        let mut reused = mixer();
        reused.render(&album(), 0.2, 1.0).unwrap();
        assert_eq!(reused.render(&album(), 0.8, 4.0).unwrap(), first);
    }

    #[test]
    fn samples_loop_at_their_own_length() {
        let mixer = mixer();
        let sample = impulse_every(300);
        let params = TrackParams {
            volume: 0.5,
            pan: 0.0,
            effect_intensity: 0.0,
            wet: 0.0,
            pitch_semitones: 0,
        };
        let mut left = vec![0.0; 1_000];
        let mut right = vec![0.0; 1_000];
        mixer.render_track(&sample, &params, &mut left, &mut right);

        let hits: Vec<usize> = left
            .iter()
            .enumerate()
            .filter(|(_, s)| s.abs() > 0.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(hits, vec![0, 300, 600, 900]);
        assert_eq!(left[300], 0.5);
    }

    #[test]
    fn empty_album_renders_silence() {
        let rendered = mixer().render(&[], 1.0, 0.5).unwrap();
        assert_eq!(rendered.frames(), 500);
        assert_eq!(rendered.peak(), 0.0);
        assert_eq!(rendered.saturation_amount, 0.0);
    }

    #[test]
    fn crowded_albums_saturate() {
        let crowd: Vec<StickerInstance> = (0..6)
            .map(|i| StickerInstance::new(format!("s{i}"), "001-001", 400.0, 0.0))
            .collect();
        let rendered = mixer().render(&crowd, 1.0, 1.0).unwrap();

        assert!(rendered.saturation_amount > 0.0);
        assert!(rendered.peak() <= 1.0);
    }

    #[test]
    fn pitched_stickers_keep_the_render_length() {
        let album = vec![StickerInstance::new("p", "001-002", 400.0, 0.0).with_pitch(3)];
        let rendered = mixer().render(&album, 1.0, 2.0).unwrap();
        assert_eq!(rendered.frames(), 2_000);
        assert!(rendered.peak() > 0.0);
    }

    #[test]
    fn rejects_non_positive_durations() {
        assert!(mixer().render(&album(), 1.0, 0.0).is_err());
        assert!(mixer().render(&album(), 1.0, f32::NAN).is_err());
    }

    #[test]
    fn wav_bytes_are_clamped_pcm() {
        let audio = RenderedAudio {
            left: vec![2.0, -0.5],
            right: vec![-3.0, 0.0],
            sample_rate: 8_000,
            track_count: 0,
            saturation_amount: 0.0,
        };
        let bytes = audio.to_wav_bytes().unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(bytes.len(), 44 + 2 * 2 * 2);

        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX, -16_384, 0]);
    }

    #[test]
    fn writes_wav_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.wav");
        let rendered = mixer().render(&album(), 1.0, 0.25).unwrap();
        rendered.write_wav(&path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, RATE);
        assert_eq!(reader.duration(), 250);
    }

    #[test]
    fn follows_kits_registered_between_renders() {
        let registry = StickerRegistry::with_builtin_catalog().into_shared();
        let source = InMemorySource::new()
            .with("audio/001/001-001.wav", SampleBuffer::mono(vec![0.0; 500], RATE).unwrap())
            .with("kits/loud.wav", tone(500));
        let mut mixer = OfflineMixer::new(&config(), Arc::clone(&registry), Arc::new(source));
        let album = [StickerInstance::new("a", "001-001", 400.0, 0.0)];
        assert_eq!(mixer.render(&album, 1.0, 1.0).unwrap().peak(), 0.0);

        registry.write().unwrap().register(
            "001-001",
            StickerAudio {
                sample_path: "kits/loud.wav".to_string(),
                is_percussion: false,
            },
        );
        assert!(mixer.render(&album, 1.0, 1.0).unwrap().peak() > 0.01);

        registry.write().unwrap().clear();
        assert_eq!(mixer.render(&album, 1.0, 1.0).unwrap().peak(), 0.0);
    }
}
