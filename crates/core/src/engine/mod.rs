//! Live audio engine: one looping track per placed sticker, summed into a
//! protected master bus.
//!
//! The UI calls [`AudioEngine::sync_with_stickers`] whenever the album
//! changes; the engine diffs the list against what it retains and creates,
//! ramps or tears down tracks to match. Audio is pulled in blocks through
//! [`AudioEngine::render`] or a [`RenderHandle`] held by an [`AudioOutput`].

mod host;
mod listeners;
mod master;
mod output;
mod track;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLockReadGuard};

use serde::Serialize;

use crate::analysis::SpectrumAnalyser;
use crate::config::AppConfig;
use crate::dsp::DynamicsConfig;
use crate::mapping::{MappingConfig, TrackParams};
use crate::registry::{SharedRegistry, StickerAudio, StickerRegistry};
use crate::sample::{fetch_all, SampleCache, SampleSource};
use crate::timeline::{LoopTiming, Transport};
use crate::{AlbumAudioError, Result, StickerInstance};

pub use host::{EngineHost, LifecycleSignal};
pub use listeners::Subscription;
pub use output::{AudioOutput, NullOutput, RenderHandle};
pub use track::TrackInfo;

use listeners::{ListenerSet, SharedListeners};
use master::MasterBus;
use track::{TrackContext, TrackNode};

/// Snapshot delivered to state subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineState {
    pub is_playing: bool,
    pub is_initialized: bool,
    pub master_volume: f32,
    pub active_tracks_by_type: BTreeMap<String, usize>,
    /// Sum of the mapped volumes of every active track.
    pub total_mapped_volume: f32,
    /// Always zero for live playback; only offline renders saturate.
    pub saturation_amount: f32,
}

/// Handle to the live engine. Clones share the same engine.
#[derive(Clone)]
pub struct AudioEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: SharedRegistry,
    source: Arc<dyn SampleSource>,
    core: Arc<Mutex<EngineCore>>,
    output: Mutex<Box<dyn AudioOutput>>,
    listeners: SharedListeners,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Ok(output) = self.output.get_mut() {
            output.stop();
        }
    }
}

impl AudioEngine {
    /// Engine without a device; audio is pulled with [`AudioEngine::render`].
    pub fn new(config: &AppConfig, registry: SharedRegistry, source: Arc<dyn SampleSource>) -> Result<Self> {
        Self::with_output(config, registry, source, Box::new(NullOutput))
    }

    pub fn with_output(
        config: &AppConfig,
        registry: SharedRegistry,
        source: Arc<dyn SampleSource>,
        output: Box<dyn AudioOutput>,
    ) -> Result<Self> {
        if config.audio.sample_rate == 0 {
            return Err(AlbumAudioError::InvalidInput("sample rate must be positive"));
        }
        config.timing.validate()?;
        let core = EngineCore::new(config)?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                registry,
                source,
                core: Arc::new(Mutex::new(core)),
                output: Mutex::new(output),
                listeners: Arc::new(Mutex::new(ListenerSet::default())),
            }),
        })
    }

    /// True when both handles refer to the same engine.
    pub fn ptr_eq(&self, other: &AudioEngine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Builds the master chain, loads every known sample and starts the
    /// output. Calling it again once initialized does nothing.
    ///
    /// If the output cannot start the engine stays uninitialized and the
    /// call may be retried.
    pub fn initialize(&self) -> Result<()> {
        let (pending, sample_rate) = {
            let core = self.lock_core()?;
            if core.initialized {
                return Ok(());
            }
            let registry = self.read_registry()?;
            let types = registry.list_all_types();
            (core.samples.pending_paths(&registry, &types), core.sample_rate)
        };

        let results = fetch_all(&pending, self.inner.source.as_ref(), sample_rate);

        {
            let mut core = self.lock_core()?;
            let loaded = core.samples.absorb(results);
            tracing::debug!(loaded, requested = pending.len(), "samples loaded");
            if core.master.is_none() {
                let master = MasterBus::new(
                    &core.dynamics,
                    core.saturation_drive,
                    core.master_volume,
                    core.sample_rate,
                );
                core.master = Some(master);
            }
        }

        let started = self
            .lock_output()?
            .start(RenderHandle::new(Arc::clone(&self.inner.core)));
        if let Err(err) = started {
            self.lock_core()?.master = None;
            tracing::error!(error = %err, "audio output failed to start");
            return Err(match err {
                AlbumAudioError::Init(reason) => AlbumAudioError::Init(reason),
                other => AlbumAudioError::Init(other.to_string()),
            });
        }

        let state = {
            let mut core = self.lock_core()?;
            core.initialized = true;
            tracing::info!(
                sample_rate = core.sample_rate,
                samples = core.samples.len(),
                "audio engine initialized"
            );
            core.state()
        };
        self.notify(&state);
        Ok(())
    }

    /// Starts the loop from its beginning with every retained sticker.
    /// Does nothing unless initialized and stopped.
    pub fn play(&self) -> Result<()> {
        let retained: Vec<StickerInstance> = {
            let core = self.lock_core()?;
            if !core.initialized || core.playing {
                return Ok(());
            }
            core.retained.values().cloned().collect()
        };
        let resolved = self.resolve_types(retained.iter())?;
        self.load_missing(&resolved)?;

        let state = {
            let mut core = self.lock_core()?;
            if !core.initialized || core.playing {
                return Ok(());
            }
            core.transport.reset();
            core.playing = true;

            let reference = core.transport.frame;
            let retained: Vec<StickerInstance> = core.retained.values().cloned().collect();
            for sticker in &retained {
                if let Some(audio) = resolved.get(&sticker.sticker_type) {
                    core.spawn_track(sticker, audio, reference);
                }
            }
            tracing::info!(tracks = core.tracks.len(), "playback started");
            core.state()
        };
        self.notify(&state);
        Ok(())
    }

    /// Tears down every track synchronously. Retained stickers survive so a
    /// later [`AudioEngine::play`] resumes them. Does nothing unless playing.
    pub fn stop(&self) -> Result<()> {
        let state = {
            let mut core = self.lock_core()?;
            if !core.playing {
                return Ok(());
            }
            core.halt();
            tracing::info!("playback stopped");
            core.state()
        };
        self.notify(&state);
        Ok(())
    }

    pub fn toggle(&self) -> Result<()> {
        if self.is_playing()? {
            self.stop()
        } else {
            self.play()
        }
    }

    /// Stops regardless of the current flags, for page hide and unmount.
    pub fn force_stop(&self) -> Result<()> {
        let state = {
            let mut core = self.lock_core()?;
            core.halt();
            core.state()
        };
        self.notify(&state);
        Ok(())
    }

    /// Drops every track and every retained sticker. Initialization is kept.
    pub fn reset(&self) -> Result<()> {
        let state = {
            let mut core = self.lock_core()?;
            core.halt();
            core.retained.clear();
            core.state()
        };
        self.notify(&state);
        Ok(())
    }

    /// Stops the output and returns the engine to its uninitialized state.
    pub fn dispose(&self) -> Result<()> {
        self.lock_output()?.stop();
        let state = {
            let mut core = self.lock_core()?;
            core.halt();
            core.retained.clear();
            core.samples.clear();
            core.master = None;
            core.initialized = false;
            tracing::info!("audio engine disposed");
            core.state()
        };
        self.notify(&state);
        Ok(())
    }

    /// Reconciles the engine with the album's current sticker list.
    ///
    /// Stickers missing from `stickers` are forgotten for good; unknown types
    /// are ignored; existing tracks glide to their new parameters; new tracks
    /// all start together on the next measure boundary.
    pub fn sync_with_stickers(&self, stickers: &[StickerInstance]) -> Result<()> {
        let resolved = self.resolve_types(stickers.iter())?;
        self.load_missing(&resolved)?;

        let state = {
            let mut core = self.lock_core()?;
            let incoming: HashSet<&str> = stickers.iter().map(|s| s.id.as_str()).collect();
            let stale: Vec<String> = core
                .retained
                .keys()
                .filter(|id| !incoming.contains(id.as_str()))
                .cloned()
                .collect();
            for id in &stale {
                tracing::debug!(%id, "sticker removed");
                core.forget(id);
            }

            let measure_frames = core.timing.measure_frames(core.sample_rate);
            let reference = core.transport.next_measure_frame(measure_frames);
            let ramp_frames = core.ramp_frames();

            for sticker in stickers {
                let Some(audio) = resolved.get(&sticker.sticker_type) else {
                    tracing::debug!(id = %sticker.id, sticker_type = %sticker.sticker_type, "unknown sticker type skipped");
                    core.forget(&sticker.id);
                    continue;
                };
                core.retained.insert(sticker.id.clone(), sticker.clone());
                if !core.playing {
                    continue;
                }

                let params = TrackParams::from_sticker(sticker, &core.mapping, core.sheet_width);
                let unchanged = core
                    .tracks
                    .get(&sticker.id)
                    .map(|track| track.plays(&sticker.sticker_type, audio));
                match unchanged {
                    Some(true) => {
                        if let Some(track) = core.tracks.get_mut(&sticker.id) {
                            track.update(params, ramp_frames);
                        }
                    }
                    Some(false) => {
                        tracing::debug!(id = %sticker.id, "sticker type or sample changed; track recreated");
                        if let Some(old) = core.tracks.remove(&sticker.id) {
                            old.teardown();
                        }
                        core.spawn_track(sticker, audio, reference);
                    }
                    None => core.spawn_track(sticker, audio, reference),
                }
            }

            let volume = core.master_volume;
            if let Some(master) = core.master.as_mut() {
                master.set_volume(volume, ramp_frames);
            }
            core.state()
        };
        self.notify(&state);
        Ok(())
    }

    /// Sets the user volume, clamped to `[0, 1]`. NaN counts as silence.
    pub fn set_master_volume(&self, volume: f32) -> Result<()> {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        let state = {
            let mut core = self.lock_core()?;
            core.master_volume = volume;
            let ramp_frames = core.ramp_frames();
            if let Some(master) = core.master.as_mut() {
                master.set_volume(volume, ramp_frames);
            }
            core.state()
        };
        self.notify(&state);
        Ok(())
    }

    /// Updates the layout width used for panning and re-pans live tracks.
    pub fn set_sheet_width(&self, width: f32) -> Result<()> {
        if !width.is_finite() || width <= 0.0 {
            return Err(AlbumAudioError::InvalidInput("sheet width must be a positive number"));
        }
        let mut core = self.lock_core()?;
        core.sheet_width = width;
        let ramp_frames = core.ramp_frames();
        let EngineCore {
            tracks,
            retained,
            mapping,
            ..
        } = &mut *core;
        for (id, track) in tracks.iter_mut() {
            if let Some(sticker) = retained.get(id) {
                track.update(TrackParams::from_sticker(sticker, mapping, width), ramp_frames);
            }
        }
        Ok(())
    }

    /// Fills an interleaved stereo block and advances the transport.
    pub fn render(&self, interleaved: &mut [f32]) -> Result<()> {
        self.lock_core()?.render(interleaved);
        Ok(())
    }

    pub fn render_handle(&self) -> RenderHandle {
        RenderHandle::new(Arc::clone(&self.inner.core))
    }

    pub fn state(&self) -> Result<EngineState> {
        Ok(self.lock_core()?.state())
    }

    pub fn is_playing(&self) -> Result<bool> {
        Ok(self.lock_core()?.playing)
    }

    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.lock_core()?.initialized)
    }

    pub fn master_volume(&self) -> Result<f32> {
        Ok(self.lock_core()?.master_volume)
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock_core().map(|core| core.sample_rate).unwrap_or(0)
    }

    /// Current transport position in seconds since `play()`.
    pub fn transport_seconds(&self) -> Result<f64> {
        let core = self.lock_core()?;
        Ok(core.transport.seconds(core.sample_rate))
    }

    pub fn active_tracks(&self) -> Result<Vec<TrackInfo>> {
        Ok(self.lock_core()?.tracks.values().map(TrackNode::info).collect())
    }

    /// Ids of every sticker the engine remembers, playing or not.
    pub fn retained_ids(&self) -> Result<Vec<String>> {
        Ok(self.lock_core()?.retained.keys().cloned().collect())
    }

    /// Smoothed dB spectrum of the master output.
    pub fn frequency_data(&self) -> Result<Vec<f32>> {
        self.lock_core()?.analyser.frequency_data()
    }

    pub fn byte_frequency_data(&self) -> Result<Vec<u8>> {
        self.lock_core()?.analyser.byte_frequency_data()
    }

    /// Registers `callback` for every state change until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn on_state_change(&self, callback: impl Fn(&EngineState) + Send + Sync + 'static) -> Subscription {
        listeners::subscribe(&self.inner.listeners, callback)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.lock().map(|set| set.len()).unwrap_or(0)
    }

    fn notify(&self, state: &EngineState) {
        listeners::notify(&self.inner.listeners, state);
    }

    fn resolve_types<'a>(
        &self,
        stickers: impl Iterator<Item = &'a StickerInstance>,
    ) -> Result<HashMap<String, StickerAudio>> {
        let registry = self.read_registry()?;
        let mut resolved = HashMap::new();
        for sticker in stickers {
            if resolved.contains_key(&sticker.sticker_type) {
                continue;
            }
            if let Some(audio) = registry.resolve(&sticker.sticker_type) {
                resolved.insert(sticker.sticker_type.clone(), audio.clone());
            }
        }
        Ok(resolved)
    }

    /// Loads samples for types registered or overridden after initialization.
    fn load_missing(&self, resolved: &HashMap<String, StickerAudio>) -> Result<()> {
        let (pending, sample_rate) = {
            let core = self.lock_core()?;
            if !core.initialized {
                return Ok(());
            }
            let paths: BTreeSet<&str> = resolved
                .values()
                .map(|audio| audio.sample_path.as_str())
                .filter(|path| core.samples.needs_load(path))
                .collect();
            let pending: Vec<String> = paths.into_iter().map(str::to_string).collect();
            (pending, core.sample_rate)
        };
        if pending.is_empty() {
            return Ok(());
        }

        let results = fetch_all(&pending, self.inner.source.as_ref(), sample_rate);
        let loaded = self.lock_core()?.samples.absorb(results);
        tracing::debug!(loaded, requested = pending.len(), "lazily loaded samples");
        Ok(())
    }

    fn lock_core(&self) -> Result<MutexGuard<'_, EngineCore>> {
        self.inner
            .core
            .lock()
            .map_err(|_| AlbumAudioError::msg("audio engine state has been poisoned"))
    }

    fn lock_output(&self) -> Result<MutexGuard<'_, Box<dyn AudioOutput>>> {
        self.inner
            .output
            .lock()
            .map_err(|_| AlbumAudioError::msg("audio output has been poisoned"))
    }

    fn read_registry(&self) -> Result<RwLockReadGuard<'_, StickerRegistry>> {
        self.inner
            .registry
            .read()
            .map_err(|_| AlbumAudioError::msg("sticker registry has been poisoned"))
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine").finish_non_exhaustive()
    }
}

/// Everything the audio thread touches, guarded by one mutex.
pub(crate) struct EngineCore {
    sample_rate: u32,
    timing: LoopTiming,
    mapping: MappingConfig,
    dynamics: DynamicsConfig,
    saturation_drive: f32,
    phaser_stages: usize,
    initialized: bool,
    playing: bool,
    master_volume: f32,
    sheet_width: f32,
    transport: Transport,
    samples: SampleCache,
    retained: BTreeMap<String, StickerInstance>,
    tracks: BTreeMap<String, TrackNode>,
    master: Option<MasterBus>,
    analyser: SpectrumAnalyser,
    mix_left: Vec<f32>,
    mix_right: Vec<f32>,
}

impl EngineCore {
    fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            sample_rate: config.audio.sample_rate,
            timing: config.timing,
            mapping: config.mapping,
            dynamics: config.dynamics,
            saturation_drive: config.mixer.saturation_drive,
            phaser_stages: config.mixer.allpass_stages,
            initialized: false,
            playing: false,
            master_volume: 1.0,
            sheet_width: config.mapping.default_sheet_width,
            transport: Transport::default(),
            samples: SampleCache::new(config.audio.sample_rate),
            retained: BTreeMap::new(),
            tracks: BTreeMap::new(),
            master: None,
            analyser: SpectrumAnalyser::new(config.audio.analyser_size)?,
            mix_left: Vec::new(),
            mix_right: Vec::new(),
        })
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn ramp_frames(&self) -> u32 {
        (self.mapping.ramp_seconds.max(0.0) * self.sample_rate as f32).round() as u32
    }

    fn context(&self) -> TrackContext {
        TrackContext {
            sample_rate: self.sample_rate,
            loop_frames: self.timing.loop_frames(self.sample_rate),
            phaser_stages: self.phaser_stages,
        }
    }

    fn spawn_track(&mut self, sticker: &StickerInstance, audio: &StickerAudio, start_frame: u64) {
        let Some(sample) = self.samples.get(&audio.sample_path) else {
            tracing::debug!(id = %sticker.id, sticker_type = %sticker.sticker_type, "no sample loaded; sticker stays silent");
            return;
        };
        let params = TrackParams::from_sticker(sticker, &self.mapping, self.sheet_width);
        let track = TrackNode::new(
            &sticker.id,
            &sticker.sticker_type,
            audio,
            sample,
            params,
            start_frame,
            self.context(),
        );
        tracing::debug!(id = %sticker.id, start_frame, "track started");
        self.tracks.insert(sticker.id.clone(), track);
    }

    /// Removes the track and retained state for `id`.
    fn forget(&mut self, id: &str) {
        self.retained.remove(id);
        if let Some(track) = self.tracks.remove(id) {
            track.teardown();
        }
    }

    fn halt(&mut self) {
        for (_, track) in std::mem::take(&mut self.tracks) {
            track.teardown();
        }
        self.playing = false;
        self.transport.reset();
        if let Some(master) = self.master.as_mut() {
            master.reset();
        }
    }

    fn state(&self) -> EngineState {
        let mut active_tracks_by_type = BTreeMap::new();
        let mut total_mapped_volume = 0.0;
        for track in self.tracks.values() {
            *active_tracks_by_type
                .entry(track.sticker_type().to_string())
                .or_insert(0) += 1;
            total_mapped_volume += track.params().volume;
        }
        EngineState {
            is_playing: self.playing,
            is_initialized: self.initialized,
            master_volume: self.master_volume,
            active_tracks_by_type,
            total_mapped_volume,
            saturation_amount: self.master.as_ref().map_or(0.0, MasterBus::saturation_amount),
        }
    }

    pub(crate) fn render(&mut self, interleaved: &mut [f32]) {
        interleaved.fill(0.0);
        if !self.playing {
            return;
        }
        let Some(master) = self.master.as_mut() else {
            return;
        };

        let frames = interleaved.len() / 2;
        self.mix_left.clear();
        self.mix_right.clear();
        self.mix_left.resize(frames, 0.0);
        self.mix_right.resize(frames, 0.0);

        let block_start = self.transport.frame;
        for track in self.tracks.values_mut() {
            track.render(block_start, &mut self.mix_left, &mut self.mix_right);
        }

        for (i, frame) in interleaved.chunks_exact_mut(2).enumerate() {
            let (left, right) = master.process(self.mix_left[i], self.mix_right[i]);
            frame[0] = left;
            frame[1] = right;
            self.analyser.push_frame(left, right);
        }
        self.transport.advance(frames as u64);
    }
}
