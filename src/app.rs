/*
 * `EmbedHost` is the entry point a host application (or plugin) holds for the
 * lifetime of its session. It owns the shared platform services, hands out
 * unique `WindowId`s and keeps the singleton registry, so callers can simply
 * ask for "the outliner window" and get either the live one back or a fresh
 * replacement.
 *
 * The host is single-threaded and must be used from the UI thread that owns
 * the native windows.
 */
use crate::close_escalation::CloseReport;
use crate::error::{PlatformError, Result as PlatformResult};
use crate::registry::SingletonRegistry;
use crate::types::{CloseEscalationConfig, EventTimerConfig, WindowConfig, WindowId};
use crate::window_instance::{WindowInstance, WindowServices};

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

pub struct EmbedHost {
    services: WindowServices,
    timer_config: EventTimerConfig,
    escalation_config: CloseEscalationConfig,
    registry: SingletonRegistry<WindowInstance>,
    next_window_id: Cell<usize>,
    // Non-singleton windows created through `create`, tracked weakly.
    unkeyed: RefCell<Vec<Weak<WindowInstance>>>,
}

impl EmbedHost {
    pub fn new(services: WindowServices) -> Self {
        log::debug!("EmbedHost: Created.");
        Self {
            services,
            timer_config: EventTimerConfig::default(),
            escalation_config: CloseEscalationConfig::default(),
            registry: SingletonRegistry::new(),
            next_window_id: Cell::new(1),
            unkeyed: RefCell::new(Vec::new()),
        }
    }

    pub fn with_timer_config(mut self, timer_config: EventTimerConfig) -> Self {
        self.timer_config = timer_config;
        self
    }

    pub fn with_escalation_config(mut self, escalation_config: CloseEscalationConfig) -> Self {
        self.escalation_config = escalation_config;
        self
    }

    pub fn timer_config(&self) -> EventTimerConfig {
        self.timer_config
    }

    pub fn escalation_config(&self) -> CloseEscalationConfig {
        self.escalation_config
    }

    pub fn generate_unique_window_id(&self) -> WindowId {
        let id = self.next_window_id.get();
        self.next_window_id.set(id + 1);
        WindowId(id)
    }

    /*
     * Creates a window that is not tracked by key. Each call produces a new
     * instance; the caller decides how long it lives.
     */
    pub fn create(&self, config: &WindowConfig) -> PlatformResult<Rc<WindowInstance>> {
        let instance = self.build(config)?;
        let mut unkeyed = self.unkeyed.borrow_mut();
        unkeyed.retain(|weak| weak.strong_count() > 0);
        unkeyed.push(Rc::downgrade(&instance));
        Ok(instance)
    }

    /*
     * Returns the live window registered under `key`, creating it on first
     * use or after the previous one died. Creation failures are reported as
     * `FactoryFailure` and leave the key unregistered.
     */
    pub fn create_or_reuse(
        &self,
        key: &str,
        config: &WindowConfig,
    ) -> PlatformResult<Rc<WindowInstance>> {
        self.registry
            .get_or_create(key, || self.build(config))
            .map_err(|err| {
                log::error!("EmbedHost: Could not create window for '{key}': {err}");
                PlatformError::FactoryFailure(format!("'{key}': {err}"))
            })
    }

    pub fn find(&self, key: &str) -> Option<Rc<WindowInstance>> {
        self.registry.get(key)
    }

    pub fn registry(&self) -> &SingletonRegistry<WindowInstance> {
        &self.registry
    }

    // Closes every window this host still knows about. Returns how many closed.
    pub fn close_all(&self) -> usize {
        let keyed = self.registry.drain();
        let unkeyed: Vec<Rc<WindowInstance>> = self
            .unkeyed
            .borrow_mut()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        log::info!(
            "EmbedHost: Closing {} keyed and {} unkeyed windows.",
            keyed.len(),
            unkeyed.len()
        );

        keyed
            .into_iter()
            .map(|(_, instance)| instance)
            .chain(unkeyed)
            .filter_map(|instance| instance.close())
            .inspect(|report: &CloseReport| {
                log::debug!(
                    "EmbedHost: WinID {:?} closed via {:?}.",
                    report.window_id,
                    report.confirmed_by
                );
            })
            .count()
    }

    fn build(&self, config: &WindowConfig) -> PlatformResult<Rc<WindowInstance>> {
        let window_id = self.generate_unique_window_id();
        WindowInstance::create(
            window_id,
            config,
            self.services.clone(),
            self.timer_config,
            self.escalation_config,
        )
    }
}

impl Drop for EmbedHost {
    fn drop(&mut self) {
        let closed = self.close_all();
        log::debug!("EmbedHost: Dropped after closing {closed} windows.");
    }
}
