use std::sync::{Arc, Mutex};

use crate::Result;

use super::EngineCore;

/// Pulls rendered audio out of the engine. Cloned into output backends,
/// which call [`RenderHandle::render`] from their device callback.
#[derive(Clone)]
pub struct RenderHandle {
    core: Arc<Mutex<EngineCore>>,
}

impl RenderHandle {
    pub(crate) fn new(core: Arc<Mutex<EngineCore>>) -> Self {
        Self { core }
    }

    /// Fills an interleaved stereo block. A poisoned engine renders silence.
    pub fn render(&self, interleaved: &mut [f32]) {
        match self.core.lock() {
            Ok(mut core) => core.render(interleaved),
            Err(_) => interleaved.fill(0.0),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.core.lock().map(|core| core.sample_rate()).unwrap_or(0)
    }
}

impl std::fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHandle").finish()
    }
}

/// A sink that drives the engine in real time.
pub trait AudioOutput: Send {
    /// Begins pulling audio. Failing here fails engine initialization.
    fn start(&mut self, renderer: RenderHandle) -> Result<()>;

    fn stop(&mut self);
}

/// No device at all; whoever owns the engine pulls audio via
/// [`super::AudioEngine::render`].
#[derive(Debug, Default)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn start(&mut self, _renderer: RenderHandle) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}
}
