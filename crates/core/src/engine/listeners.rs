use std::sync::{Arc, Mutex, Weak};

use super::EngineState;

type Listener = Arc<dyn Fn(&EngineState) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

impl ListenerSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub(crate) type SharedListeners = Arc<Mutex<ListenerSet>>;

pub(crate) fn subscribe(
    listeners: &SharedListeners,
    callback: impl Fn(&EngineState) + Send + Sync + 'static,
) -> Subscription {
    let id = match listeners.lock() {
        Ok(mut set) => {
            let id = set.next_id;
            set.next_id += 1;
            set.entries.push((id, Arc::new(callback)));
            id
        }
        Err(_) => {
            tracing::warn!("listener set poisoned; subscription ignored");
            u64::MAX
        }
    };
    Subscription {
        id,
        listeners: Arc::downgrade(listeners),
    }
}

/// Delivers `state` to every current listener. Callbacks run without any
/// engine lock held, so they may call back into the engine.
pub(crate) fn notify(listeners: &SharedListeners, state: &EngineState) {
    let snapshot: Vec<Listener> = match listeners.lock() {
        Ok(set) => set.entries.iter().map(|(_, l)| Arc::clone(l)).collect(),
        Err(_) => return,
    };
    for listener in snapshot {
        listener(state);
    }
}

/// Handle returned by [`super::AudioEngine::on_state_change`]. Dropping it or
/// calling [`Subscription::unsubscribe`] stops all further deliveries.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<ListenerSet>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    fn detach(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut set) = listeners.lock() {
                set.entries.retain(|(id, _)| *id != self.id);
            }
        }
        self.listeners = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
