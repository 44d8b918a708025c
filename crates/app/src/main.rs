mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use sticker_album_core::{
    AppConfig, AudioEngine, EngineHost, ExportJob, ExportOptions, ExportOrchestrator,
    HttpEncoderClient, KitEntry, LifecycleSignal, OfflineMixer, SampleSource, SharedRegistry,
    StickerInstance, StickerRegistry, StillImage, WavDirectorySource,
};
use tracing_subscriber::EnvFilter;

use crate::output::CpalOutput;

fn main() -> sticker_album_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Types => list_types(),
        Commands::Play {
            album,
            seconds,
            volume,
        } => run_play(config, &album, seconds, volume),
        Commands::Render {
            album,
            out,
            duration,
            volume,
        } => run_render(&config, &album, &out, duration, volume),
        Commands::Export {
            album,
            image,
            out,
            server,
        } => run_export(config, &album, &image, out, server),
    }
}

fn list_types() -> sticker_album_core::Result<()> {
    let registry = StickerRegistry::with_builtin_catalog();
    for sticker_type in registry.list_all_types() {
        if let Some(audio) = registry.resolve(&sticker_type) {
            let kind = if audio.is_percussion { "percussion" } else { "melodic" };
            println!("{sticker_type}\t{kind}\t{}", audio.sample_path);
        }
    }
    Ok(())
}

fn run_play(mut config: AppConfig, album_path: &Path, seconds: f32, volume: f32) -> sticker_album_core::Result<()> {
    let album = AlbumFile::load(album_path)?;
    if let Some(rate) = CpalOutput::default_sample_rate() {
        config.audio.sample_rate = rate;
    }
    tracing::info!(album = ?album_path, stickers = album.stickers.len(), "starting live playback");

    let registry = album.registry();
    let source: Arc<dyn SampleSource> = Arc::new(WavDirectorySource::new(config.assets.root.clone()));
    let host = EngineHost::new(move || {
        AudioEngine::with_output(
            &config,
            Arc::clone(&registry),
            Arc::clone(&source),
            Box::new(CpalOutput::new()),
        )
    });

    let engine = host.acquire()?;
    let _subscription = engine.on_state_change(|state| {
        tracing::debug!(
            playing = state.is_playing,
            volume = state.master_volume,
            tracks = state.active_tracks_by_type.values().sum::<usize>(),
            "engine state"
        );
    });

    engine.initialize()?;
    if let Some(width) = album.sheet_width {
        engine.set_sheet_width(width)?;
    }
    engine.set_master_volume(volume)?;
    engine.play()?;
    engine.sync_with_stickers(&album.stickers)?;

    for track in engine.active_tracks()? {
        tracing::info!(
            id = %track.id,
            sticker_type = %track.sticker_type,
            volume = track.params.volume,
            pan = track.params.pan,
            "track playing"
        );
    }

    let deadline = Duration::from_secs_f32(seconds.max(0.0));
    let tick = Duration::from_secs(1);
    let mut elapsed = Duration::ZERO;
    while elapsed < deadline {
        let step = tick.min(deadline - elapsed);
        std::thread::sleep(step);
        elapsed += step;
        tracing::info!(position = engine.transport_seconds()?, "playing");
    }

    engine.stop()?;
    host.handle_lifecycle(LifecycleSignal::BeforeUnload)
}

fn run_render(
    config: &AppConfig,
    album_path: &Path,
    out: &Path,
    duration: Option<f32>,
    volume: f32,
) -> sticker_album_core::Result<()> {
    let album = AlbumFile::load(album_path)?;
    let source = Arc::new(WavDirectorySource::new(config.assets.root.clone()));
    let mut mixer = OfflineMixer::new(config, album.registry(), source);
    if let Some(width) = album.sheet_width {
        mixer.set_sheet_width(width);
    }

    let duration = duration.unwrap_or(config.export.duration_secs);
    tracing::info!(album = ?album_path, duration, "rendering offline mix");
    let rendered = mixer.render(&album.stickers, volume, duration)?;
    rendered.write_wav(out)?;

    tracing::info!(
        out = ?out,
        tracks = rendered.track_count,
        peak = rendered.peak(),
        saturation = rendered.saturation_amount,
        "mix written"
    );
    Ok(())
}

fn run_export(
    mut config: AppConfig,
    album_path: &Path,
    image: &Path,
    out: Option<PathBuf>,
    server: Option<String>,
) -> sticker_album_core::Result<()> {
    if let Some(server) = server {
        config.export.server_url = server;
    }
    let album = AlbumFile::load(album_path)?;
    let source = Arc::new(WavDirectorySource::new(config.assets.root.clone()));
    let mixer = OfflineMixer::new(&config, album.registry(), source);

    let mut orchestrator = ExportOrchestrator::new(
        mixer,
        Box::new(StillImage::from_file(image)?),
        Box::new(HttpEncoderClient::new(&config.export)),
    );
    let options = ExportOptions {
        sheet_width: album.sheet_width,
        ..ExportOptions::from_config(&config.export)
    };
    let job = ExportJob::snapshot(&album.stickers, options);

    let output = orchestrator.run(&job, &mut |progress| {
        tracing::info!(phase = ?progress.phase, percent = progress.percent, "{}", progress.message);
    })?;

    let path = out.unwrap_or_else(|| PathBuf::from(&output.file_name));
    std::fs::write(&path, &output.bytes)?;
    tracing::info!(out = ?path, bytes = output.bytes.len(), "video saved");
    Ok(())
}

/// Album document read from disk.
#[derive(Debug, Deserialize)]
struct AlbumFile {
    #[serde(default)]
    sheet_width: Option<f32>,
    /// Extra sticker types registered on top of the built-in catalog.
    #[serde(default)]
    kits: Vec<KitEntry>,
    stickers: Vec<StickerInstance>,
}

impl AlbumFile {
    fn load(path: &Path) -> sticker_album_core::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn registry(&self) -> SharedRegistry {
        let mut registry = StickerRegistry::with_builtin_catalog();
        for kit in &self.kits {
            registry.register_kit(kit.clone());
        }
        registry.into_shared()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Sticker Album audio engine", long_about = None)]
struct Cli {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every built-in sticker type and its sample.
    Types,
    /// Play an album live through the default output device.
    Play {
        /// Album JSON file.
        #[arg(short, long)]
        album: PathBuf,
        /// How long to play before stopping.
        #[arg(short, long, default_value_t = 16.0)]
        seconds: f32,
        #[arg(short, long, default_value_t = 1.0)]
        volume: f32,
    },
    /// Render an album offline to a WAV file.
    Render {
        #[arg(short, long)]
        album: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
        /// Render length in seconds; the configured export duration otherwise.
        #[arg(short, long)]
        duration: Option<f32>,
        #[arg(short, long, default_value_t = 1.0)]
        volume: f32,
    },
    /// Export an album as a video using a still frame from disk.
    Export {
        #[arg(short, long)]
        album: PathBuf,
        /// PNG used as the video frame.
        #[arg(short, long)]
        image: PathBuf,
        /// Output file; `sticker-album-<date>.mp4` otherwise.
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Encoder base URL, overriding the configuration.
        #[arg(long)]
        server: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn album_files_register_kits() {
        let album: AlbumFile = serde_json::from_str(
            r#"{
                "sheet_width": 640,
                "kits": [{ "type": "900-001", "sample_path": "kits/900/a.wav", "is_percussion": true }],
                "stickers": [{ "id": "s1", "type": "900-001", "x": 100, "y": 40, "scale": 1.2 }]
            }"#,
        )
        .unwrap();

        assert_eq!(album.sheet_width, Some(640.0));
        assert_eq!(album.stickers[0].scale, 1.2);
        let registry = album.registry();
        let registry = registry.read().unwrap();
        assert!(registry.resolve("900-001").unwrap().is_percussion);
        assert!(registry.is_known("001-001"));
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "sticker-album",
            "render",
            "--album",
            "album.json",
            "--out",
            "mix.wav",
            "--duration",
            "4",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Render { duration: Some(d), .. } if d == 4.0));
    }
}
