//! Lifecycle notifications fired around initialisation and processing.
//!
//! Events always come in Starting/Finished pairs. [`Listeners::scoped`]
//! fires the Starting event and returns a guard that fires Finished when
//! dropped, so the pair survives early returns.

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    ItemInitialisationStarting,
    ItemInitialisationFinished,
    ItemResponseProcessingStarting,
    ItemResponseProcessingFinished,
    TestInitialisationStarting,
    TestInitialisationFinished,
    TestOutcomeProcessingStarting,
    TestOutcomeProcessingFinished,
}

impl LifecycleEvent {
    /// The Finished event paired with a Starting event.
    pub fn finished(self) -> LifecycleEvent {
        match self {
            LifecycleEvent::ItemInitialisationStarting => LifecycleEvent::ItemInitialisationFinished,
            LifecycleEvent::ItemResponseProcessingStarting => {
                LifecycleEvent::ItemResponseProcessingFinished
            }
            LifecycleEvent::TestInitialisationStarting => LifecycleEvent::TestInitialisationFinished,
            LifecycleEvent::TestOutcomeProcessingStarting => {
                LifecycleEvent::TestOutcomeProcessingFinished
            }
            finished => finished,
        }
    }
}

/// Receives lifecycle events synchronously, on the session's thread.
pub trait LifecycleListener: Send + Sync {
    fn on_event(&self, event: LifecycleEvent);
}

/// The listeners registered on a session.
#[derive(Clone, Default)]
pub struct Listeners {
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.listeners.len())
            .finish()
    }
}

impl Listeners {
    pub fn add(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.push(listener);
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn fire(&self, event: LifecycleEvent) {
        tracing::trace!(?event, "lifecycle event");
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }

    /// Fire `starting` now and its Finished event when the guard drops.
    pub fn scoped(&self, starting: LifecycleEvent) -> LifecycleGuard {
        self.fire(starting);
        LifecycleGuard {
            listeners: self.clone(),
            finished: starting.finished(),
        }
    }
}

/// Fires the Finished half of an event pair on drop.
#[must_use = "dropping the guard fires the Finished event immediately"]
pub struct LifecycleGuard {
    listeners: Listeners,
    finished: LifecycleEvent,
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        self.listeners.fire(self.finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<LifecycleEvent>>);

    impl LifecycleListener for Recorder {
        fn on_event(&self, event: LifecycleEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn failing_step(listeners: &Listeners) -> Result<(), String> {
        let _guard = listeners.scoped(LifecycleEvent::TestOutcomeProcessingStarting);
        let step: Result<(), String> = Err("boom".to_string());
        step?;
        Ok(())
    }

    #[test]
    fn guard_fires_finished_on_early_return() {
        let recorder = Arc::new(Recorder::default());
        let mut listeners = Listeners::default();
        listeners.add(recorder.clone());
        assert!(failing_step(&listeners).is_err());
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                LifecycleEvent::TestOutcomeProcessingStarting,
                LifecycleEvent::TestOutcomeProcessingFinished
            ]
        );
    }

    #[test]
    fn finished_pairs() {
        assert_eq!(
            LifecycleEvent::ItemInitialisationStarting.finished(),
            LifecycleEvent::ItemInitialisationFinished
        );
        assert_eq!(
            LifecycleEvent::ItemInitialisationFinished.finished(),
            LifecycleEvent::ItemInitialisationFinished
        );
    }
}
