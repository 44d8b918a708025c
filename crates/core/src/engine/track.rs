use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;

use crate::dsp::{pan_stereo, ParamRamp, Phaser, PitchShifter};
use crate::mapping::TrackParams;
use crate::registry::StickerAudio;
use crate::sample::SampleBuffer;
use crate::timeline::Transport;

/// Fixed properties shared by every track the engine creates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrackContext {
    pub sample_rate: u32,
    pub loop_frames: u64,
    pub phaser_stages: usize,
}

/// Read-only view of a live track, for display and inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackInfo {
    pub id: String,
    pub sticker_type: String,
    pub is_percussion: bool,
    pub params: TrackParams,
    /// Transport time at which the track becomes audible.
    pub start_secs: f64,
    /// Position inside its sample where playback begins.
    pub start_offset_secs: f64,
}

/// One playing sticker: looped sample → pitch → phaser → pan → gain.
///
/// The sample is read at `transport mod loop`, so every track stays phase
/// aligned with the loop no matter when it joined. Samples shorter than the
/// loop are followed by silence; longer ones are cut at the loop end.
pub(crate) struct TrackNode {
    id: String,
    sticker_type: String,
    audio: StickerAudio,
    sample: Arc<SampleBuffer>,
    params: TrackParams,
    context: TrackContext,
    start_frame: u64,
    gain: ParamRamp,
    pan: ParamRamp,
    wet: ParamRamp,
    phaser: Phaser,
    pitch: Option<PitchShifter>,
    scratch_left: Vec<f32>,
    scratch_right: Vec<f32>,
}

impl TrackNode {
    pub fn new(
        id: &str,
        sticker_type: &str,
        audio: &StickerAudio,
        sample: Arc<SampleBuffer>,
        params: TrackParams,
        start_frame: u64,
        context: TrackContext,
    ) -> Self {
        let pitch = (params.pitch_semitones != 0)
            .then(|| PitchShifter::new(context.sample_rate, params.pitch_semitones));

        Self {
            id: id.to_string(),
            sticker_type: sticker_type.to_string(),
            audio: audio.clone(),
            sample,
            params,
            context,
            start_frame,
            gain: ParamRamp::new(params.volume),
            pan: ParamRamp::new(params.pan),
            wet: ParamRamp::new(params.wet),
            phaser: Phaser::new(context.sample_rate, context.phaser_stages, params.phaser()),
            pitch,
            scratch_left: Vec::new(),
            scratch_right: Vec::new(),
        }
    }

    pub fn sticker_type(&self) -> &str {
        &self.sticker_type
    }

    /// True when the track already plays `audio` for `sticker_type`.
    pub fn plays(&self, sticker_type: &str, audio: &StickerAudio) -> bool {
        self.sticker_type == sticker_type && self.audio == *audio
    }

    pub fn params(&self) -> &TrackParams {
        &self.params
    }

    pub fn start_offset_frames(&self) -> u64 {
        Transport::loop_position(self.start_frame, self.context.loop_frames)
    }

    pub fn info(&self) -> TrackInfo {
        let rate = self.context.sample_rate as f64;
        TrackInfo {
            id: self.id.clone(),
            sticker_type: self.sticker_type.clone(),
            is_percussion: self.audio.is_percussion,
            params: self.params,
            start_secs: self.start_frame as f64 / rate,
            start_offset_secs: self.start_offset_frames() as f64 / rate,
        }
    }

    /// Glides to new parameters without restarting playback.
    pub fn update(&mut self, params: TrackParams, ramp_frames: u32) {
        self.gain.ramp_to(params.volume, ramp_frames);
        self.pan.ramp_to(params.pan, ramp_frames);
        self.wet.ramp_to(params.wet, ramp_frames);
        self.phaser.set_params(params.phaser(), ramp_frames);

        match (&mut self.pitch, params.pitch_semitones) {
            (Some(shifter), semitones) => shifter.set_semitones(semitones),
            (None, 0) => {}
            (None, semitones) => {
                self.pitch = Some(PitchShifter::new(self.context.sample_rate, semitones));
            }
        }

        self.params = params;
    }

    /// Adds this track's output for the block starting at `block_start`.
    pub fn render(&mut self, block_start: u64, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        self.scratch_left.clear();
        self.scratch_right.clear();
        self.scratch_left.resize(frames, 0.0);
        self.scratch_right.resize(frames, 0.0);

        let read_ahead = self.pitch.as_ref().map_or(0, |p| p.latency() as u64);
        let sample_frames = self.sample.frames() as u64;
        for i in 0..frames {
            let t = block_start + i as u64 + read_ahead;
            if t < self.start_frame {
                continue;
            }
            let pos = Transport::loop_position(t, self.context.loop_frames);
            if pos < sample_frames {
                self.scratch_left[i] = self.sample.left[pos as usize];
                self.scratch_right[i] = self.sample.right[pos as usize];
            }
        }

        if let Some(shifter) = self.pitch.as_mut() {
            shifter.process(&mut self.scratch_left, &mut self.scratch_right);
        }

        for i in 0..frames {
            let (dry_l, dry_r) = (self.scratch_left[i], self.scratch_right[i]);
            let (wet_l, wet_r) = self.phaser.tick(dry_l, dry_r);
            let wet = self.wet.next_value();
            let mixed_l = dry_l * (1.0 - wet) + wet_l * wet;
            let mixed_r = dry_r * (1.0 - wet) + wet_r * wet;

            let (panned_l, panned_r) = pan_stereo(mixed_l, mixed_r, self.pan.next_value());
            let gain = self.gain.next_value();
            left[i] += panned_l * gain;
            right[i] += panned_r * gain;
        }
    }

    /// Releases every stage. A stage that panics while being released is
    /// logged and does not keep the remaining stages alive.
    pub fn teardown(self) {
        let TrackNode {
            id,
            sample,
            phaser,
            pitch,
            ..
        } = self;

        dispose_stage(&id, "pitch", move || {
            if let Some(mut shifter) = pitch {
                shifter.reset();
            }
        });
        dispose_stage(&id, "phaser", move || drop(phaser));
        dispose_stage(&id, "player", move || drop(sample));
    }
}

fn dispose_stage(id: &str, stage: &'static str, release: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(release)).is_err() {
        tracing::warn!(id, stage, "track stage failed to dispose");
    }
}
