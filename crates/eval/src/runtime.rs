//! Per-session runtime: settings, randomness, notifications, listeners and
//! the optional CAS service. Each session owns exactly one.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cas::EvaluationService;
use crate::config::EngineSettings;
use crate::context::{EvalContext, RuntimeNotifications, VariableScope};
use crate::listener::{LifecycleListener, Listeners};

pub struct Runtime {
    pub settings: EngineSettings,
    pub rng: StdRng,
    pub notifications: RuntimeNotifications,
    pub listeners: Listeners,
    pub cas: Option<Arc<dyn EvaluationService>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("settings", &self.settings)
            .field("notifications", &self.notifications.all().len())
            .field("listeners", &self.listeners)
            .field("cas", &self.cas.is_some())
            .finish()
    }
}

impl Runtime {
    pub fn new(settings: EngineSettings) -> Self {
        let rng = match settings.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(settings, rng)
    }

    pub fn with_rng(settings: EngineSettings, rng: StdRng) -> Self {
        Runtime {
            settings,
            rng,
            notifications: RuntimeNotifications::new(),
            listeners: Listeners::default(),
            cas: None,
        }
    }

    /// A runtime for a child session, seeded from this one so a seeded
    /// test run stays reproducible.
    pub fn child(&mut self) -> Runtime {
        let rng = StdRng::seed_from_u64(self.rng.gen());
        let mut child = Self::with_rng(self.settings.clone(), rng);
        child.listeners = self.listeners.clone();
        child.cas = self.cas.clone();
        child
    }

    pub fn add_listener(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.add(listener);
    }

    /// Borrow the runtime as an evaluation context over `scope`.
    pub fn context<'a>(&'a mut self, scope: &'a mut dyn VariableScope) -> EvalContext<'a> {
        EvalContext::new(scope, &mut self.rng, &mut self.notifications)
            .with_cas(self.cas.as_deref(), self.settings.cas_failure_policy)
    }
}
