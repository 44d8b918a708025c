//! Video export: still frame + offline audio, encoded by an external service.

mod client;

use std::path::Path;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::ExportConfig;
use crate::mixer::OfflineMixer;
use crate::{AlbumAudioError, Result, StickerInstance};

pub use client::{EncodeRequest, EncoderClient, HttpEncoderClient};

/// Where an export job currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportPhase {
    Idle,
    Preparing,
    Rendering,
    Uploading,
    Encoding,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportProgress {
    pub phase: ExportPhase,
    pub percent: u8,
    pub message: String,
}

/// User choices for one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub duration_secs: f32,
    pub fps: u32,
    pub include_audio: bool,
    /// Render the frame over a chroma-key background instead of the album page.
    pub green_screen: bool,
    pub master_volume: f32,
    /// Layout width the album is shown at, so exported pans match what the
    /// user hears live. The mixer's configured width applies when unset.
    pub sheet_width: Option<f32>,
    /// Identifier of the album background to draw, if not the default.
    pub background: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from_config(&ExportConfig::default())
    }
}

impl ExportOptions {
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            duration_secs: config.duration_secs,
            fps: config.fps,
            include_audio: true,
            green_screen: false,
            master_volume: 1.0,
            sheet_width: None,
            background: None,
        }
    }
}

/// Frozen input of one export. Later edits to the album do not reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportJob {
    stickers: Vec<StickerInstance>,
    options: ExportOptions,
}

impl ExportJob {
    pub fn snapshot(stickers: &[StickerInstance], options: ExportOptions) -> Self {
        Self {
            stickers: stickers.to_vec(),
            options,
        }
    }

    pub fn stickers(&self) -> &[StickerInstance] {
        &self.stickers
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }
}

/// Produces the PNG still frame of the album.
pub trait FrameRenderer: Send {
    fn render_frame(&self, stickers: &[StickerInstance], options: &ExportOptions) -> Result<Vec<u8>>;
}

/// A frame rendered ahead of time, such as a screenshot on disk.
#[derive(Debug, Clone)]
pub struct StillImage {
    png: Vec<u8>,
}

impl StillImage {
    pub fn new(png: Vec<u8>) -> Self {
        Self { png }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(std::fs::read(path)?))
    }
}

impl FrameRenderer for StillImage {
    fn render_frame(&self, _stickers: &[StickerInstance], _options: &ExportOptions) -> Result<Vec<u8>> {
        if self.png.is_empty() {
            return Err(AlbumAudioError::InvalidInput("still image is empty"));
        }
        Ok(self.png.clone())
    }
}

/// A finished export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutput {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

/// `sticker-album-<YYYY-MM-DD>.mp4`
pub fn export_file_name(date: NaiveDate) -> String {
    format!("sticker-album-{}.mp4", date.format("%Y-%m-%d"))
}

/// Drives a job through preparing → rendering → uploading → encoding.
/// Encoding begins once the encoder reports the upload as handed over.
///
/// The encoder's health is checked before any rendering, so a dead server
/// fails fast. There is no cancellation; a failed job is simply run again.
pub struct ExportOrchestrator {
    mixer: OfflineMixer,
    default_sheet_width: f32,
    frames: Box<dyn FrameRenderer>,
    encoder: Box<dyn EncoderClient>,
    phase: ExportPhase,
}

impl ExportOrchestrator {
    pub fn new(mixer: OfflineMixer, frames: Box<dyn FrameRenderer>, encoder: Box<dyn EncoderClient>) -> Self {
        Self {
            default_sheet_width: mixer.sheet_width(),
            mixer,
            frames,
            encoder,
            phase: ExportPhase::Idle,
        }
    }

    pub fn phase(&self) -> ExportPhase {
        self.phase
    }

    pub fn run(&mut self, job: &ExportJob, progress: &mut dyn FnMut(&ExportProgress)) -> Result<ExportOutput> {
        let mut percent = 0;
        let result = self.execute(job, &mut |phase, at, message: &str| {
            percent = at;
            progress(&ExportProgress {
                phase,
                percent: at,
                message: message.to_string(),
            });
        });

        match result {
            Ok(output) => {
                tracing::info!(file = %output.file_name, bytes = output.bytes.len(), "export complete");
                Ok(output)
            }
            Err(err) => {
                self.phase = ExportPhase::Error;
                tracing::error!(error = %err, "export failed");
                progress(&ExportProgress {
                    phase: ExportPhase::Error,
                    percent,
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn execute(
        &mut self,
        job: &ExportJob,
        emit: &mut dyn FnMut(ExportPhase, u8, &str),
    ) -> Result<ExportOutput> {
        let options = job.options();
        if options.fps == 0 {
            return Err(AlbumAudioError::InvalidInput("export fps must be positive"));
        }

        self.enter(ExportPhase::Preparing, emit, 0, "Checking the export server");
        self.encoder.health()?;
        emit(ExportPhase::Preparing, 5, "Export server is ready");

        self.enter(ExportPhase::Rendering, emit, 10, "Rendering the album frame");
        let image = self.frames.render_frame(job.stickers(), options)?;

        let audio = if options.include_audio {
            emit(ExportPhase::Rendering, 25, "Rendering audio");
            self.mixer
                .set_sheet_width(options.sheet_width.unwrap_or(self.default_sheet_width));
            let rendered = self
                .mixer
                .render(job.stickers(), options.master_volume, options.duration_secs)?;
            Some(rendered.to_wav_bytes()?)
        } else {
            None
        };
        emit(ExportPhase::Rendering, 40, "Rendering finished");

        let request = EncodeRequest {
            image,
            audio,
            duration_secs: options.duration_secs,
            fps: options.fps,
        };
        self.enter(ExportPhase::Uploading, emit, 60, "Uploading to the encoder");
        let ExportOrchestrator { encoder, phase, .. } = &mut *self;
        let bytes = encoder.encode(&request, &mut || {
            *phase = ExportPhase::Encoding;
            emit(ExportPhase::Encoding, 70, "Encoding video");
        })?;

        self.enter(ExportPhase::Complete, emit, 100, "Export complete");
        Ok(ExportOutput {
            bytes,
            file_name: export_file_name(Local::now().date_naive()),
        })
    }

    fn enter(&mut self, phase: ExportPhase, emit: &mut dyn FnMut(ExportPhase, u8, &str), percent: u8, message: &str) {
        self.phase = phase;
        emit(phase, percent, message);
    }
}

impl std::fmt::Debug for ExportOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportOrchestrator")
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::sample::{InMemorySource, SampleBuffer};
    use crate::{AppConfig, StickerRegistry};

    struct CountingFrames(Arc<AtomicUsize>);

    impl FrameRenderer for CountingFrames {
        fn render_frame(&self, _stickers: &[StickerInstance], _options: &ExportOptions) -> Result<Vec<u8>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(b"\x89PNG".to_vec())
        }
    }

    enum Reply {
        Video,
        Fails(&'static str),
        /// Connection lost before the payload was fully sent.
        Dropped,
    }

    struct FakeEncoder {
        alive: bool,
        reply: Reply,
        received: Arc<Mutex<Vec<EncodeRequest>>>,
    }

    impl EncoderClient for FakeEncoder {
        fn health(&self) -> Result<()> {
            if self.alive {
                Ok(())
            } else {
                Err(AlbumAudioError::ServerUnavailable("connection refused".into()))
            }
        }

        fn encode(&self, request: &EncodeRequest, uploaded: &mut dyn FnMut()) -> Result<Vec<u8>> {
            self.received.lock().unwrap().push(request.clone());
            match self.reply {
                Reply::Video => {
                    uploaded();
                    Ok(b"MP4".to_vec())
                }
                Reply::Fails(text) => {
                    uploaded();
                    Err(AlbumAudioError::Encoding(text.to_string()))
                }
                Reply::Dropped => Err(AlbumAudioError::ServerUnavailable("connection reset".into())),
            }
        }
    }

    struct Harness {
        orchestrator: ExportOrchestrator,
        frames: Arc<AtomicUsize>,
        received: Arc<Mutex<Vec<EncodeRequest>>>,
    }

    fn harness(alive: bool, reply: Reply) -> Harness {
        let mut config = AppConfig::default();
        config.audio.sample_rate = 1_000;
        let source = InMemorySource::new().with(
            "audio/001/001-001.wav",
            SampleBuffer::mono(vec![0.3; 500], 1_000).unwrap(),
        );
        let mixer = OfflineMixer::new(
            &config,
            StickerRegistry::with_builtin_catalog().into_shared(),
            Arc::new(source),
        );
        let frames = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let encoder = FakeEncoder {
            alive,
            reply,
            received: Arc::clone(&received),
        };
        Harness {
            orchestrator: ExportOrchestrator::new(
                mixer,
                Box::new(CountingFrames(Arc::clone(&frames))),
                Box::new(encoder),
            ),
            frames,
            received,
        }
    }

    fn job(include_audio: bool) -> ExportJob {
        let options = ExportOptions {
            duration_secs: 2.0,
            include_audio,
            ..ExportOptions::default()
        };
        ExportJob::snapshot(&[StickerInstance::new("a", "001-001", 300.0, 200.0)], options)
    }

    fn run(harness: &mut Harness, job: &ExportJob) -> (Result<ExportOutput>, Vec<ExportProgress>) {
        let mut seen = Vec::new();
        let result = harness.orchestrator.run(job, &mut |p| seen.push(p.clone()));
        (result, seen)
    }

    #[test]
    fn walks_every_phase_in_order() {
        let mut harness = harness(true, Reply::Video);
        let (result, seen) = run(&mut harness, &job(true));
        let output = result.unwrap();

        assert_eq!(output.bytes, b"MP4");
        assert!(output.file_name.starts_with("sticker-album-"));
        assert!(output.file_name.ends_with(".mp4"));

        let phases: Vec<ExportPhase> = seen.iter().map(|p| p.phase).collect();
        assert_eq!(
            phases,
            vec![
                ExportPhase::Preparing,
                ExportPhase::Preparing,
                ExportPhase::Rendering,
                ExportPhase::Rendering,
                ExportPhase::Rendering,
                ExportPhase::Uploading,
                ExportPhase::Encoding,
                ExportPhase::Complete,
            ]
        );
        assert!(seen.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(harness.orchestrator.phase(), ExportPhase::Complete);

        let received = harness.received.lock().unwrap();
        let audio = received[0].audio.as_ref().unwrap();
        assert_eq!(&audio[..4], b"RIFF");
        assert_eq!(audio.len(), 44 + 2_000 * 4);
        assert_eq!(received[0].fps, 30);
        assert_eq!(received[0].duration_secs, 2.0);
    }

    #[test]
    fn dead_server_fails_before_rendering() {
        let mut harness = harness(false, Reply::Video);
        let (result, seen) = run(&mut harness, &job(true));

        let err = result.unwrap_err();
        assert!(err.is_server_unavailable());
        assert_eq!(harness.frames.load(Ordering::SeqCst), 0);
        assert!(harness.received.lock().unwrap().is_empty());

        let last = seen.last().unwrap();
        assert_eq!(last.phase, ExportPhase::Error);
        assert!(last.message.contains("not running"));
        assert_eq!(harness.orchestrator.phase(), ExportPhase::Error);
    }

    #[test]
    fn encoder_errors_surface_verbatim() {
        let mut failing = harness(true, Reply::Fails("unsupported pixel format"));
        let (result, seen) = run(&mut failing, &job(false));

        assert_eq!(result.unwrap_err().to_string(), "unsupported pixel format");
        assert_eq!(seen.last().unwrap().message, "unsupported pixel format");
        assert_eq!(seen.last().unwrap().percent, 70);

        let mut retry = harness(true, Reply::Video);
        assert!(run(&mut retry, &job(false)).0.is_ok());
    }

    #[test]
    fn lost_uploads_never_reach_encoding() {
        let mut harness = harness(true, Reply::Dropped);
        let (result, seen) = run(&mut harness, &job(false));

        assert!(result.unwrap_err().is_server_unavailable());
        assert!(seen.iter().all(|p| p.phase != ExportPhase::Encoding));
        let last = seen.last().unwrap();
        assert_eq!(last.phase, ExportPhase::Error);
        assert_eq!(last.percent, 60);
    }

    #[test]
    fn exports_pan_with_the_album_width() {
        fn channel_levels(wav: &[u8]) -> (i64, i64) {
            let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
            let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
            samples.chunks_exact(2).fold((0, 0), |(l, r), frame| {
                (l + i64::from(frame[0]).abs(), r + i64::from(frame[1]).abs())
            })
        }

        let mut harness = harness(true, Reply::Video);
        let narrow = ExportOptions {
            sheet_width: Some(300.0),
            ..job(true).options().clone()
        };
        run(&mut harness, &ExportJob::snapshot(job(true).stickers(), narrow)).0.unwrap();
        run(&mut harness, &job(true)).0.unwrap();

        let received = harness.received.lock().unwrap();
        let (left, right) = channel_levels(received[0].audio.as_ref().unwrap());
        assert!(right > 0);
        assert_eq!(left, 0);

        let (left, right) = channel_levels(received[1].audio.as_ref().unwrap());
        assert!(left > right);
    }

    #[test]
    fn audio_is_optional() {
        let mut harness = harness(true, Reply::Video);
        run(&mut harness, &job(false)).0.unwrap();
        assert!(harness.received.lock().unwrap()[0].audio.is_none());
    }

    #[test]
    fn jobs_snapshot_the_album() {
        let mut album = vec![StickerInstance::new("a", "001-001", 10.0, 10.0)];
        let job = ExportJob::snapshot(&album, ExportOptions::default());
        album[0].x = 500.0;
        album.push(StickerInstance::new("b", "001-002", 0.0, 0.0));

        assert_eq!(job.stickers().len(), 1);
        assert_eq!(job.stickers()[0].x, 10.0);
    }

    #[test]
    fn names_files_by_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(export_file_name(date), "sticker-album-2024-03-09.mp4");
    }
}
