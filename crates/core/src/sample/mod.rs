//! Decoded sticker samples and the per-path cache that owns them.
//!
//! The live engine and the offline mixer each keep their own [`SampleCache`];
//! both resolve paths through the registry and tolerate individual load
//! failures the same way.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use hound::{SampleFormat, WavReader};
use rayon::prelude::*;
use rubato::{FftFixedIn, Resampler};

use crate::{registry::StickerRegistry, AlbumAudioError, Result};

const RESAMPLE_CHUNK: usize = 1024;
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Planar stereo sample data at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if left.len() != right.len() {
            return Err(AlbumAudioError::InvalidInput(
                "left and right channels have different lengths",
            ));
        }
        if sample_rate == 0 {
            return Err(AlbumAudioError::InvalidInput("sample rate must be non-zero"));
        }
        Ok(Self {
            left,
            right,
            sample_rate,
        })
    }

    /// Same signal on both channels.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::new(samples.clone(), samples, sample_rate)
    }

    /// Splits interleaved data with any channel count into stereo. Mono is
    /// duplicated; channels beyond the second are dropped.
    pub fn from_interleaved(interleaved: &[f32], channels: usize, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(AlbumAudioError::InvalidInput("channel count must be non-zero"));
        }
        let frames = interleaved.len() / channels;
        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for frame in interleaved.chunks_exact(channels) {
            left.push(frame[0]);
            right.push(if channels > 1 { frame[1] } else { frame[0] });
        }
        Self::new(left, right, sample_rate)
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Returns the buffer converted to `target_rate`.
    pub fn resampled(self, target_rate: u32) -> Result<Self> {
        if self.sample_rate == target_rate || self.is_empty() {
            return Ok(Self {
                sample_rate: target_rate,
                ..self
            });
        }

        let mut resampler = FftFixedIn::<f32>::new(
            self.sample_rate as usize,
            target_rate as usize,
            RESAMPLE_CHUNK,
            RESAMPLE_SUB_CHUNKS,
            2,
        )
        .map_err(|e| AlbumAudioError::Resample(e.to_string()))?;

        let expected =
            (self.frames() as f64 * target_rate as f64 / self.sample_rate as f64).round() as usize;
        let delay = resampler.output_delay();
        let mut left = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
        let mut right = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

        let mut pos = 0;
        while left.len() < expected + delay {
            let needed = resampler.input_frames_next();
            let mut chunk_left = vec![0.0f32; needed];
            let mut chunk_right = vec![0.0f32; needed];
            if pos < self.frames() {
                let take = needed.min(self.frames() - pos);
                chunk_left[..take].copy_from_slice(&self.left[pos..pos + take]);
                chunk_right[..take].copy_from_slice(&self.right[pos..pos + take]);
            }
            pos += needed;

            let output = resampler
                .process(&[chunk_left, chunk_right], None)
                .map_err(|e| AlbumAudioError::Resample(e.to_string()))?;
            left.extend_from_slice(&output[0]);
            right.extend_from_slice(&output[1]);
        }

        left.drain(..delay);
        right.drain(..delay);
        left.truncate(expected);
        right.truncate(expected);

        Self::new(left, right, target_rate)
    }
}

/// Something that can turn a registry sample path into decoded audio.
pub trait SampleSource: Send + Sync {
    fn load(&self, sample_path: &str) -> Result<SampleBuffer>;
}

/// Reads WAV files relative to an asset root directory.
#[derive(Debug, Clone)]
pub struct WavDirectorySource {
    root: PathBuf,
}

impl WavDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SampleSource for WavDirectorySource {
    fn load(&self, sample_path: &str) -> Result<SampleBuffer> {
        let path = self.root.join(sample_path);
        let reader = WavReader::open(&path).map_err(|e| AlbumAudioError::SampleLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        decode_wav(reader).map_err(|e| AlbumAudioError::SampleLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

fn decode_wav<R: std::io::Read>(mut reader: WavReader<R>) -> Result<SampleBuffer> {
    let spec = reader.spec();
    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|sample| sample.map(|v| v as f32 / i16::MAX as f32))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 24) => {
            const I24_MAX: f32 = 8_388_607.0;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|v| v as f32 / I24_MAX))
                .collect::<std::result::Result<_, _>>()?
        }
        (format, bits) => {
            return Err(AlbumAudioError::msg(format!(
                "unsupported wav encoding {format:?} at {bits} bits"
            )))
        }
    };
    SampleBuffer::from_interleaved(&interleaved, spec.channels as usize, spec.sample_rate)
}

/// Pre-decoded samples keyed by path. Handy for kits delivered in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    buffers: HashMap<String, SampleBuffer>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sample_path: impl Into<String>, buffer: SampleBuffer) {
        self.buffers.insert(sample_path.into(), buffer);
    }

    pub fn with(mut self, sample_path: impl Into<String>, buffer: SampleBuffer) -> Self {
        self.insert(sample_path, buffer);
        self
    }
}

impl SampleSource for InMemorySource {
    fn load(&self, sample_path: &str) -> Result<SampleBuffer> {
        self.buffers
            .get(sample_path)
            .cloned()
            .ok_or_else(|| AlbumAudioError::SampleLoad {
                path: sample_path.to_string(),
                reason: "not found".to_string(),
            })
    }
}

/// Decoded buffers keyed by sample path, converted to the owner's sample rate.
///
/// Lookups go through the registry, so a type whose entry is overridden or
/// cleared resolves to the buffer of its current path. A path whose load
/// failed is remembered and never retried.
#[derive(Debug)]
pub struct SampleCache {
    sample_rate: u32,
    buffers: HashMap<String, Arc<SampleBuffer>>,
    failed: HashSet<String>,
}

impl SampleCache {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            buffers: HashMap::new(),
            failed: HashSet::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn get(&self, sample_path: &str) -> Option<Arc<SampleBuffer>> {
        self.buffers.get(sample_path).cloned()
    }

    /// Buffer for whatever path `sticker_type` currently resolves to.
    pub fn get_for_type(&self, registry: &StickerRegistry, sticker_type: &str) -> Option<Arc<SampleBuffer>> {
        self.get(&registry.resolve(sticker_type)?.sample_path)
    }

    pub fn contains(&self, sample_path: &str) -> bool {
        self.buffers.contains_key(sample_path)
    }

    pub fn has_failed(&self, sample_path: &str) -> bool {
        self.failed.contains(sample_path)
    }

    /// True when the path has neither been loaded nor attempted.
    pub fn needs_load(&self, sample_path: &str) -> bool {
        !self.contains(sample_path) && !self.has_failed(sample_path)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
        self.failed.clear();
    }

    /// Loads the current sample of every listed type that has not been
    /// attempted yet, concurrently. Returns the number of newly loaded buffers.
    pub fn load_all(
        &mut self,
        registry: &StickerRegistry,
        types: &[String],
        source: &dyn SampleSource,
    ) -> usize {
        let pending = self.pending_paths(registry, types);
        let results = fetch_all(&pending, source, self.sample_rate);
        self.absorb(results)
    }

    /// Adds results fetched elsewhere (typically outside a lock via [`fetch_all`]).
    pub fn absorb(&mut self, results: Vec<(String, Result<SampleBuffer>)>) -> usize {
        let mut loaded = 0;
        for (sample_path, result) in results {
            match result {
                Ok(buffer) => {
                    self.buffers.insert(sample_path, Arc::new(buffer));
                    loaded += 1;
                }
                Err(err) => {
                    tracing::warn!(%sample_path, error = %err, "sample unavailable");
                    self.failed.insert(sample_path);
                }
            }
        }
        loaded
    }

    /// Distinct sample paths of the resolvable types still to be loaded.
    pub fn pending_paths(&self, registry: &StickerRegistry, types: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        types
            .iter()
            .filter_map(|sticker_type| registry.resolve(sticker_type))
            .map(|audio| audio.sample_path.as_str())
            .filter(|path| self.needs_load(path) && seen.insert(*path))
            .map(str::to_string)
            .collect()
    }
}

/// Fetches and rate-converts the given samples in parallel.
pub fn fetch_all(
    pending: &[String],
    source: &dyn SampleSource,
    sample_rate: u32,
) -> Vec<(String, Result<SampleBuffer>)> {
    pending
        .par_iter()
        .map(|path| {
            let result = source
                .load(path)
                .and_then(|buffer| buffer.resampled(sample_rate));
            (path.clone(), result)
        })
        .collect()
}
