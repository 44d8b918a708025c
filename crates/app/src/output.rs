//! cpal playback backend for the live engine.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated thread
//! for its whole life. The thread reports whether the stream started and then
//! parks until it is told to stop.

use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use sticker_album_core::{AlbumAudioError, AudioOutput, RenderHandle, Result};

pub struct CpalOutput {
    worker: Option<Worker>,
}

struct Worker {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self { worker: None }
    }

    /// Sample rate the default output device prefers, if there is one.
    pub fn default_sample_rate() -> Option<u32> {
        let device = cpal::default_host().default_output_device()?;
        let config = device.default_output_config().ok()?;
        Some(config.sample_rate().0)
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for CpalOutput {
    fn start(&mut self, renderer: RenderHandle) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("sticker-album-output".to_string())
            .spawn(move || {
                let stream = match open_stream(renderer) {
                    Ok(stream) => stream,
                    Err(reason) => {
                        let _ = ready_tx.send(Err(reason));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("output stream closed");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(Worker { stop: stop_tx, thread });
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = thread.join();
                Err(AlbumAudioError::Init(reason))
            }
            Err(_) => {
                let _ = thread.join();
                Err(AlbumAudioError::Init("output thread exited before starting".to_string()))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            if worker.thread.join().is_err() {
                tracing::warn!("output thread panicked while stopping");
            }
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_stream(renderer: RenderHandle) -> std::result::Result<cpal::Stream, String> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| "no output device available".to_string())?;
    let supported = device.default_output_config().map_err(|e| e.to_string())?;

    let config = cpal::StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(renderer.sample_rate()),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, renderer),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, renderer),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, renderer),
        format => return Err(format!("unsupported sample format {format:?}")),
    }?;

    stream.play().map_err(|e| e.to_string())?;
    tracing::info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "output stream started"
    );
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    renderer: RenderHandle,
) -> std::result::Result<cpal::Stream, String>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut stereo = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                stereo.resize(frames * 2, 0.0);
                renderer.render(&mut stereo);

                for (frame, out) in data.chunks_exact_mut(channels.max(1)).enumerate() {
                    for (channel, sample) in out.iter_mut().enumerate() {
                        let value = match (channels, channel) {
                            (1, _) => 0.5 * (stereo[frame * 2] + stereo[frame * 2 + 1]),
                            (_, 0 | 1) => stereo[frame * 2 + channel],
                            _ => 0.0,
                        };
                        *sample = T::from_sample(value);
                    }
                }
            },
            |err| tracing::error!(error = %err, "output stream error"),
            None,
        )
        .map_err(|e| e.to_string())
}
