use std::sync::{Mutex, MutexGuard};

use crate::{AlbumAudioError, Result};

use super::AudioEngine;

/// Page lifecycle events the host forwards to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    PageHide,
    BeforeUnload,
    VisibilityHidden,
}

type EngineFactory = Box<dyn Fn() -> Result<AudioEngine> + Send + Sync>;

/// Owns the one live engine of an application.
///
/// [`EngineHost::acquire`] hands out the same engine until
/// [`EngineHost::dispose`], after which the next acquire builds a new one.
pub struct EngineHost {
    factory: EngineFactory,
    current: Mutex<Option<AudioEngine>>,
}

impl EngineHost {
    pub fn new(factory: impl Fn() -> Result<AudioEngine> + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            current: Mutex::new(None),
        }
    }

    pub fn acquire(&self) -> Result<AudioEngine> {
        let mut current = self.lock()?;
        if let Some(engine) = current.as_ref() {
            return Ok(engine.clone());
        }
        let engine = (self.factory)()?;
        tracing::debug!("audio engine created");
        *current = Some(engine.clone());
        Ok(engine)
    }

    /// The engine, if one has been acquired and not disposed.
    pub fn current(&self) -> Option<AudioEngine> {
        self.lock().ok().and_then(|current| current.clone())
    }

    /// Tears the engine down and forgets it.
    pub fn dispose(&self) -> Result<()> {
        let engine = self.lock()?.take();
        match engine {
            Some(engine) => engine.dispose(),
            None => Ok(()),
        }
    }

    pub fn handle_lifecycle(&self, signal: LifecycleSignal) -> Result<()> {
        tracing::debug!(?signal, "lifecycle signal");
        match signal {
            LifecycleSignal::PageHide | LifecycleSignal::VisibilityHidden => match self.current() {
                Some(engine) => engine.force_stop(),
                None => Ok(()),
            },
            LifecycleSignal::BeforeUnload => self.dispose(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<AudioEngine>>> {
        self.current
            .lock()
            .map_err(|_| AlbumAudioError::msg("engine host has been poisoned"))
    }
}

impl std::fmt::Debug for EngineHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHost")
            .field("active", &self.current().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sample::{InMemorySource, SampleBuffer};
    use crate::{AppConfig, StickerInstance, StickerRegistry};

    fn host() -> EngineHost {
        EngineHost::new(|| {
            let mut config = AppConfig::default();
            config.audio.sample_rate = 1_000;
            config.audio.analyser_size = 64;
            let source = InMemorySource::new().with(
                "audio/001/001-001.wav",
                SampleBuffer::mono(vec![0.25; 2_000], 1_000)?,
            );
            AudioEngine::new(
                &config,
                StickerRegistry::with_builtin_catalog().into_shared(),
                Arc::new(source),
            )
        })
    }

    #[test]
    fn acquire_returns_one_engine_until_disposed() {
        let host = host();
        let first = host.acquire().unwrap();
        let second = host.acquire().unwrap();
        assert!(first.ptr_eq(&second));

        host.dispose().unwrap();
        assert!(host.current().is_none());
        assert!(!first.is_initialized().unwrap());

        let third = host.acquire().unwrap();
        assert!(!third.ptr_eq(&first));
    }

    #[test]
    fn page_hide_stops_but_keeps_the_album() {
        let host = host();
        let engine = host.acquire().unwrap();
        engine.initialize().unwrap();
        engine.play().unwrap();
        engine
            .sync_with_stickers(&[StickerInstance::new("a", "001-001", 200.0, 0.0)])
            .unwrap();

        host.handle_lifecycle(LifecycleSignal::VisibilityHidden).unwrap();
        assert!(!engine.is_playing().unwrap());
        assert!(engine.active_tracks().unwrap().is_empty());
        assert_eq!(engine.retained_ids().unwrap(), vec!["a"]);

        host.handle_lifecycle(LifecycleSignal::BeforeUnload).unwrap();
        assert!(host.current().is_none());
        assert!(!host.acquire().unwrap().ptr_eq(&engine));
    }
}
