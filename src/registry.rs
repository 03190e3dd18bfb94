/*
 * Process-scoped map from a logical key to at most one live window. An entry
 * is trusted only after a fresh liveness check; a stale entry is closed
 * (best-effort) and evicted before the factory builds its replacement, so a
 * key never has two running windows at once.
 *
 * The registry is constructed once by the host and passed by reference to
 * whatever creates windows. It is single-threaded: every mutation happens on
 * the UI thread and no borrow is held while calling out to a window or a
 * factory, so re-entrant calls are safe.
 */
use crate::platform::run_contained;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// A window that can be held by a `SingletonRegistry`.
pub trait ManagedWindow {
    fn is_live(&self) -> bool;
    // Runs the window's close path. Must be idempotent.
    fn request_close(&self);
    // Called once after the registry has recorded the window under a key.
    fn attach_registry(&self, link: RegistryLink<Self>)
    where
        Self: Sized;
}

type Entries<W> = RefCell<HashMap<String, Rc<W>>>;

/*
 * Non-owning path from a registered window back to its registry entry. Lets a
 * window evict itself when it finishes closing without keeping the registry
 * alive.
 */
pub struct RegistryLink<W> {
    key: String,
    entries: Weak<Entries<W>>,
}

impl<W> RegistryLink<W> {
    pub fn key(&self) -> &str {
        &self.key
    }

    // Removes the entry only if it still refers to `instance`.
    pub fn evict(&self, instance: &W) -> bool {
        match self.entries.upgrade() {
            Some(entries) => remove_if_same(&entries, &self.key, instance),
            None => false,
        }
    }
}

impl<W> std::fmt::Debug for RegistryLink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryLink")
            .field("key", &self.key)
            .field("registry_alive", &(self.entries.strong_count() > 0))
            .finish()
    }
}

fn remove_if_same<W>(entries: &Entries<W>, key: &str, instance: &W) -> bool {
    let mut map = entries.borrow_mut();
    let is_same = map
        .get(key)
        .is_some_and(|stored| std::ptr::eq(Rc::as_ptr(stored), instance));
    if is_same {
        map.remove(key);
        log::debug!("SingletonRegistry: Removed '{key}'.");
    }
    is_same
}

pub struct SingletonRegistry<W: ManagedWindow> {
    entries: Rc<Entries<W>>,
}

impl<W: ManagedWindow> Default for SingletonRegistry<W> {
    fn default() -> Self {
        Self {
            entries: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

impl<W: ManagedWindow> SingletonRegistry<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /*
     * Returns the live window registered under `key`, or builds a new one with
     * `factory`. A stale entry is closed and evicted first; problems doing so
     * are logged and never block creation. Factory errors are returned to the
     * caller unchanged and leave the key unregistered.
     */
    pub fn get_or_create<F, E>(&self, key: &str, factory: F) -> Result<Rc<W>, E>
    where
        F: FnOnce() -> Result<Rc<W>, E>,
    {
        let existing = self.entries.borrow().get(key).cloned();
        if let Some(existing) = existing {
            if Self::check_live(key, &existing) {
                log::debug!("SingletonRegistry: Reusing live window for '{key}'.");
                return Ok(existing);
            }

            log::info!("SingletonRegistry: Window for '{key}' is no longer live; recycling.");
            if let Err(err) = run_contained("recycling close", || {
                existing.request_close();
                Ok(())
            }) {
                log::warn!("SingletonRegistry: Closing stale window for '{key}' failed: {err}");
            }
            remove_if_same(&self.entries, key, &existing);
        }

        log::debug!("SingletonRegistry: Creating window for '{key}'.");
        let instance = factory()?;
        instance.attach_registry(RegistryLink {
            key: key.to_string(),
            entries: Rc::downgrade(&self.entries),
        });

        let displaced = self
            .entries
            .borrow_mut()
            .insert(key.to_string(), Rc::clone(&instance));
        if let Some(displaced) = displaced
            && !Rc::ptr_eq(&displaced, &instance)
        {
            log::warn!(
                "SingletonRegistry: '{key}' was registered again while its factory ran; closing the displaced window."
            );
            displaced.request_close();
        }
        Ok(instance)
    }

    pub fn remove(&self, key: &str, instance: &W) -> bool {
        remove_if_same(&self.entries, key, instance)
    }

    pub fn get(&self, key: &str) -> Option<Rc<W>> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    // Empties the registry and hands the windows back to the caller.
    pub fn drain(&self) -> Vec<(String, Rc<W>)> {
        let mut drained: Vec<(String, Rc<W>)> = self.entries.borrow_mut().drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        drained
    }

    fn check_live(key: &str, window: &Rc<W>) -> bool {
        let mut live = false;
        if let Err(err) = run_contained("liveness check", || {
            live = window.is_live();
            Ok(())
        }) {
            log::warn!("SingletonRegistry: Liveness check for '{key}' failed: {err}");
            return false;
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;

    use std::cell::Cell;

    struct FakeWindow {
        id: u32,
        live: Cell<bool>,
        close_calls: Cell<u32>,
        panics_on_liveness: Cell<bool>,
        panics_on_close: Cell<bool>,
        link: RefCell<Option<RegistryLink<FakeWindow>>>,
    }

    impl FakeWindow {
        fn new(id: u32) -> Rc<Self> {
            Rc::new(Self {
                id,
                live: Cell::new(true),
                close_calls: Cell::new(0),
                panics_on_liveness: Cell::new(false),
                panics_on_close: Cell::new(false),
                link: RefCell::new(None),
            })
        }
    }

    impl ManagedWindow for FakeWindow {
        fn is_live(&self) -> bool {
            if self.panics_on_liveness.get() {
                panic!("liveness probe exploded");
            }
            self.live.get()
        }

        fn request_close(&self) {
            self.close_calls.set(self.close_calls.get() + 1);
            if self.panics_on_close.get() {
                panic!("recycling close exploded");
            }
            self.live.set(false);
            if let Some(link) = self.link.borrow_mut().take() {
                link.evict(self);
            }
        }

        fn attach_registry(&self, link: RegistryLink<Self>) {
            *self.link.borrow_mut() = Some(link);
        }
    }

    fn counting_factory(
        counter: &Rc<Cell<u32>>,
    ) -> impl FnOnce() -> Result<Rc<FakeWindow>, PlatformError> {
        let counter = Rc::clone(counter);
        move || {
            counter.set(counter.get() + 1);
            Ok(FakeWindow::new(counter.get()))
        }
    }

    #[test]
    fn live_entry_is_reused_and_factory_runs_once() {
        // Arrange
        let registry = SingletonRegistry::new();
        let created = Rc::new(Cell::new(0));
        // Act
        let first = registry
            .get_or_create("outliner", counting_factory(&created))
            .unwrap();
        let second = registry
            .get_or_create("outliner", counting_factory(&created))
            .unwrap();
        // Assert
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(created.get(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_entry_is_closed_evicted_and_replaced() {
        let registry = SingletonRegistry::new();
        let created = Rc::new(Cell::new(0));
        let first = registry
            .get_or_create("outliner", counting_factory(&created))
            .unwrap();
        first.live.set(false);

        let second = registry
            .get_or_create("outliner", counting_factory(&created))
            .unwrap();

        assert!(!Rc::ptr_eq(&first, &second));
        assert_eq!(first.close_calls.get(), 1);
        assert_eq!(created.get(), 2);
        assert!(Rc::ptr_eq(&registry.get("outliner").unwrap(), &second));
    }

    #[test]
    fn closed_instance_leaves_registry_and_next_call_creates_fresh_one() {
        let registry = SingletonRegistry::new();
        let created = Rc::new(Cell::new(0));
        let first = registry
            .get_or_create("outliner", counting_factory(&created))
            .unwrap();

        first.request_close();
        assert!(registry.is_empty());
        let second = registry
            .get_or_create("outliner", counting_factory(&created))
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.close_calls.get(), 1);
        assert_eq!(created.get(), 2);
    }

    #[test]
    fn factory_error_propagates_unchanged() {
        let registry: SingletonRegistry<FakeWindow> = SingletonRegistry::new();

        let result = registry.get_or_create("outliner", || {
            Err::<Rc<FakeWindow>, _>(PlatformError::InitializationFailed("no parent".into()))
        });

        assert_eq!(
            result.err(),
            Some(PlatformError::InitializationFailed("no parent".into()))
        );
        assert!(!registry.contains_key("outliner"));
    }

    #[test]
    fn panicking_liveness_check_counts_as_stale() {
        let registry = SingletonRegistry::new();
        let created = Rc::new(Cell::new(0));
        let first = registry
            .get_or_create("outliner", counting_factory(&created))
            .unwrap();
        first.panics_on_liveness.set(true);

        let second = registry
            .get_or_create("outliner", counting_factory(&created))
            .unwrap();

        assert_eq!(second.id, 2);
        assert_eq!(first.close_calls.get(), 1);
    }

    #[test]
    fn panicking_recycling_close_does_not_block_creation() {
        // Arrange
        let registry = SingletonRegistry::new();
        let created = Rc::new(Cell::new(0));
        let first = registry
            .get_or_create("outliner", counting_factory(&created))
            .unwrap();
        first.live.set(false);
        first.panics_on_close.set(true);
        // Act
        let second = registry
            .get_or_create("outliner", counting_factory(&created))
            .unwrap();
        // Assert
        assert_eq!(first.close_calls.get(), 1);
        assert_eq!(created.get(), 2);
        assert_eq!(second.id, 2);
        assert!(Rc::ptr_eq(&registry.get("outliner").unwrap(), &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_ignores_a_different_instance_under_the_same_key() {
        let registry = SingletonRegistry::new();
        let created = Rc::new(Cell::new(0));
        let registered = registry
            .get_or_create("outliner", counting_factory(&created))
            .unwrap();
        let impostor = FakeWindow::new(99);

        assert!(!registry.remove("outliner", &impostor));
        assert!(registry.remove("outliner", &registered));
        assert!(registry.is_empty());
    }

    #[test]
    fn link_outliving_registry_evicts_nothing() {
        let window = FakeWindow::new(1);
        {
            let registry = SingletonRegistry::new();
            let w = Rc::clone(&window);
            registry
                .get_or_create("outliner", move || Ok::<_, PlatformError>(w))
                .unwrap();
        }

        let link = window.link.borrow_mut().take().unwrap();
        assert_eq!(link.key(), "outliner");
        assert!(!link.evict(&window));
    }

    #[test]
    fn keys_are_independent() {
        let registry = SingletonRegistry::new();
        let created = Rc::new(Cell::new(0));
        let a = registry
            .get_or_create("outliner", counting_factory(&created))
            .unwrap();
        let b = registry
            .get_or_create("shelf", counting_factory(&created))
            .unwrap();

        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(registry.keys(), vec!["outliner".to_string(), "shelf".to_string()]);
        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }
}
