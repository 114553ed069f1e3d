//! Location registry: maps location names to hooks and drives their
//! per-context tasks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, debug_span, error, info, warn};

use gab_types::{ContextKey, Step};

use crate::task::{HookTask, ResumableTask};
use crate::{Driver, HookError, RegistryError};

/// Builds a fresh task body for one context. Receives the driver that
/// triggered the creation.
pub type TaskFactory<E> = Arc<dyn Fn(&dyn Driver) -> Box<dyn HookTask<E>> + Send + Sync>;

/// Shared handle to a live per-context task.
pub type TaskRef<E> = Arc<Mutex<ResumableTask<E>>>;

/// Declaration of a location.
#[derive(Debug, Clone, Serialize)]
pub struct LocationSpec {
    pub name: String,
    /// What the hooks receive and what consuming means here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    /// Default state scope for hooks that do not choose one.
    pub use_global_state: bool,
}

impl LocationSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc: None,
            use_global_state: false,
        }
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn global_state(mut self) -> Self {
        self.use_global_state = true;
        self
    }
}

/// Declaration of a hook, handed to [`Locations::register`].
pub struct HookSpec<E> {
    pub name: String,
    /// Source file of the plugin that contributed the hook.
    pub file: PathBuf,
    pub description: Option<String>,
    /// `None` inherits the location's default.
    pub use_global_state: Option<bool>,
    factory: TaskFactory<E>,
}

impl<E> HookSpec<E> {
    pub fn new<F>(name: impl Into<String>, file: impl Into<PathBuf>, factory: F) -> Self
    where
        F: Fn(&dyn Driver) -> Box<dyn HookTask<E>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            file: file.into(),
            description: None,
            use_global_state: None,
            factory: Arc::new(factory),
        }
    }

    /// Share one task between all users.
    pub fn global(mut self) -> Self {
        self.use_global_state = Some(true);
        self
    }

    /// Keep one task per user, whatever the location default is.
    pub fn per_user(mut self) -> Self {
        self.use_global_state = Some(false);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl<E> std::fmt::Debug for HookSpec<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSpec")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("use_global_state", &self.use_global_state)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a registered hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookInfo {
    pub location: String,
    pub name: String,
    pub file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub use_global_state: bool,
    pub live_states: usize,
}

/// Result of dispatching one event through a location.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// At least one hook asked for the event to be consumed.
    pub consumed: bool,
    /// Hooks that were driven (had a task for this context).
    pub driven: usize,
    /// Hook failures; the failing tasks have been purged.
    pub failures: Vec<HookError>,
}

struct Hook<E> {
    name: String,
    file: PathBuf,
    description: Option<String>,
    use_global_state: bool,
    factory: TaskFactory<E>,
    // Owned by this hook alone so state never bleeds between hooks.
    states: Mutex<HashMap<ContextKey, TaskRef<E>>>,
}

impl<E> Hook<E> {
    fn context_for(&self, user: &str) -> ContextKey {
        ContextKey::resolve(user, self.use_global_state)
    }

    fn states(&self) -> MutexGuard<'_, HashMap<ContextKey, TaskRef<E>>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the state for `key`, but only if it is still `task`.
    fn purge(&self, key: &ContextKey, task: &TaskRef<E>) {
        let mut states = self.states();
        if states.get(key).is_some_and(|current| Arc::ptr_eq(current, task)) {
            states.remove(key);
        }
    }

    fn info(&self, location: &str) -> HookInfo {
        HookInfo {
            location: location.to_string(),
            name: self.name.clone(),
            file: self.file.clone(),
            description: self.description.clone(),
            use_global_state: self.use_global_state,
            live_states: self.states().len(),
        }
    }
}

struct Location<E> {
    spec: LocationSpec,
    hooks: IndexMap<String, Arc<Hook<E>>>,
}

/// Process-wide registry of locations and their hooks.
///
/// Built once at start-up and shared by reference with every call site.
/// Registration happens at plugin load/unload time; dispatch only reads the
/// location table and works on per-hook state.
pub struct Locations<E> {
    locations: RwLock<IndexMap<String, Location<E>>>,
}

fn is_live<E>(task: &TaskRef<E>) -> bool {
    match task.try_lock() {
        Ok(guard) => !guard.is_finished(),
        // Being driven right now, so certainly not finished.
        Err(TryLockError::WouldBlock) => true,
        Err(TryLockError::Poisoned(poisoned)) => !poisoned.into_inner().is_finished(),
    }
}

impl<E> Locations<E> {
    pub fn new() -> Self {
        Self {
            locations: RwLock::new(IndexMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, Location<E>>> {
        self.locations.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, Location<E>>> {
        self.locations.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn hook(&self, location: &str, hook: &str) -> Option<Arc<Hook<E>>> {
        self.read().get(location)?.hooks.get(hook).cloned()
    }

    // ──────────────────── Registration ────────────────────

    pub fn register_location(&self, spec: LocationSpec) -> Result<(), RegistryError> {
        let mut locations = self.write();
        if locations.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateLocation(spec.name));
        }
        debug!(location = %spec.name, "Location registered");
        locations.insert(
            spec.name.clone(),
            Location {
                spec,
                hooks: IndexMap::new(),
            },
        );
        Ok(())
    }

    /// Register a hook under `location`.
    ///
    /// Registering a name that already exists replaces that hook, and its
    /// per-context tasks start over.
    pub fn register(&self, location: &str, spec: HookSpec<E>) -> Result<(), RegistryError> {
        let mut locations = self.write();
        let entry = locations
            .get_mut(location)
            .ok_or_else(|| RegistryError::UnknownLocation(location.to_string()))?;

        let hook = Hook {
            use_global_state: spec
                .use_global_state
                .unwrap_or(entry.spec.use_global_state),
            name: spec.name,
            file: spec.file,
            description: spec.description,
            factory: spec.factory,
            states: Mutex::new(HashMap::new()),
        };
        info!(
            location,
            hook = %hook.name,
            file = %hook.file.display(),
            global = hook.use_global_state,
            "Hook registered"
        );
        if entry.hooks.insert(hook.name.clone(), Arc::new(hook)).is_some() {
            debug!(location, "Replaced an existing hook of the same name");
        }
        Ok(())
    }

    /// Remove a location. Fails while any hook is still registered there.
    /// Returns `Ok(false)` for an unknown location.
    pub fn remove_location(&self, name: &str) -> Result<bool, RegistryError> {
        let mut locations = self.write();
        let Some(location) = locations.get(name) else {
            return Ok(false);
        };
        if !location.hooks.is_empty() {
            return Err(RegistryError::LocationHasHooks {
                location: name.to_string(),
                hooks: location.hooks.len(),
            });
        }
        locations.shift_remove(name);
        debug!(location = name, "Location removed");
        Ok(true)
    }

    /// Remove a hook. Fails while it still has live per-context tasks; use
    /// [`Locations::retire_hook`] to cancel them first.
    /// Returns `Ok(false)` for an unknown hook.
    pub fn unregister(&self, location: &str, hook: &str) -> Result<bool, RegistryError> {
        let mut locations = self.write();
        let Some(entry) = locations.get_mut(location) else {
            return Ok(false);
        };
        let Some(registered) = entry.hooks.get(hook) else {
            return Ok(false);
        };
        let live = registered
            .states()
            .values()
            .filter(|task| is_live(task))
            .count();
        if live > 0 {
            return Err(RegistryError::HookHasLiveState {
                location: location.to_string(),
                hook: hook.to_string(),
                states: live,
            });
        }
        entry.hooks.shift_remove(hook);
        info!(location, hook, "Hook unregistered");
        Ok(true)
    }

    /// Cancel every per-context task of a hook, then remove it.
    pub fn retire_hook(&self, location: &str, hook: &str) -> bool {
        let mut locations = self.write();
        let Some(entry) = locations.get_mut(location) else {
            return false;
        };
        let Some(registered) = entry.hooks.shift_remove(hook) else {
            return false;
        };
        let cancelled = {
            let mut states = registered.states();
            let count = states.len();
            states.clear();
            count
        };
        info!(location, hook, cancelled, "Hook retired");
        true
    }

    /// Retire every hook contributed by the plugin file `path`.
    /// Returns how many hooks were removed.
    pub fn retire_file(&self, path: &Path) -> usize {
        let targets: Vec<(String, String)> = self
            .read()
            .iter()
            .flat_map(|(location, entry)| {
                entry
                    .hooks
                    .values()
                    .filter(|hook| hook.file == path)
                    .map(|hook| (location.clone(), hook.name.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        targets
            .iter()
            .filter(|(location, hook)| self.retire_hook(location, hook))
            .count()
    }

    // ──────────────────── Per-context state ────────────────────

    /// Return the live task of `hook` for `user`, creating and priming a new
    /// one if there is none or the previous one finished.
    ///
    /// `Ok(None)` means the hook is unknown, or a new task finished while
    /// being primed.
    pub fn get_or_init_state(
        &self,
        location: &str,
        hook: &str,
        user: &str,
        driver: &dyn Driver,
    ) -> Result<Option<TaskRef<E>>, HookError> {
        let Some(registered) = self.hook(location, hook) else {
            return Ok(None);
        };
        let key = registered.context_for(user);

        if let Some(task) = registered.states().get(&key).filter(|task| is_live(task)) {
            return Ok(Some(task.clone()));
        }

        // Built and primed without holding the state map, so the task may
        // call back into the registry.
        let mut task = ResumableTask::new((registered.factory)(driver));
        let primed = task.advance().map_err(|source| HookError {
            location: location.to_string(),
            hook: hook.to_string(),
            context: key.clone(),
            source,
        })?;
        if primed.is_complete() {
            debug!(location, hook, context = %key, "Task finished while priming");
            registered.states().remove(&key);
            return Ok(None);
        }

        debug!(location, hook, context = %key, "Task created");
        let task = Arc::new(Mutex::new(task));
        registered.states().insert(key, task.clone());
        Ok(Some(task))
    }

    /// Force-purge the task of `hook` for `user`. Returns whether anything
    /// was removed.
    pub fn clean(&self, location: &str, hook: &str, user: &str) -> bool {
        let Some(registered) = self.hook(location, hook) else {
            return false;
        };
        let key = registered.context_for(user);
        registered.states().remove(&key).is_some()
    }

    /// Purge the per-user tasks of `user` across every hook, e.g. on logout.
    /// Global tasks are left alone. Returns how many tasks were dropped.
    pub fn clean_user(&self, user: &str) -> usize {
        let key = ContextKey::user(user);
        let hooks: Vec<Arc<Hook<E>>> = self
            .read()
            .values()
            .flat_map(|entry| entry.hooks.values().cloned().collect::<Vec<_>>())
            .collect();
        hooks
            .iter()
            .filter(|hook| !hook.use_global_state && hook.states().remove(&key).is_some())
            .count()
    }

    /// Number of live tasks a hook holds.
    pub fn live_states(&self, location: &str, hook: &str) -> usize {
        self.hook(location, hook)
            .map(|registered| {
                registered
                    .states()
                    .values()
                    .filter(|task| is_live(task))
                    .count()
            })
            .unwrap_or(0)
    }

    // ──────────────────── Dispatch ────────────────────

    /// Drive every hook of `location` with `event` for the driver's current
    /// user. Returns `true` if any hook asked to consume the event.
    pub fn evaluate(&self, location: &str, driver: &dyn Driver, event: &E) -> bool {
        self.evaluate_detailed(location, driver, event).consumed
    }

    /// Like [`Locations::evaluate`], also reporting how many hooks ran and
    /// which ones failed.
    ///
    /// The hook list is snapshotted when the call starts. A hook removed
    /// while the pass is running is skipped; a hook added is not visited.
    pub fn evaluate_detailed(&self, location: &str, driver: &dyn Driver, event: &E) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let hook_names: Vec<String> = match self.read().get(location) {
            Some(entry) => entry.hooks.keys().cloned().collect(),
            None => return dispatch,
        };
        let user = driver.active_user();
        let _span = debug_span!("evaluate", location, user).entered();

        for name in hook_names {
            let task = match self.get_or_init_state(location, &name, user, driver) {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(err) => {
                    error!(error = %err, "Hook task failed to start");
                    dispatch.failures.push(err);
                    continue;
                }
            };
            let Some(registered) = self.hook(location, &name) else {
                continue;
            };
            let key = registered.context_for(user);

            let outcome = {
                let mut guard = match task.try_lock() {
                    Ok(guard) => guard,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                    Err(TryLockError::WouldBlock) => {
                        warn!(hook = %name, context = %key, "Task is already running, skipping re-entrant dispatch");
                        continue;
                    }
                };
                dispatch.driven += 1;
                drive(&mut guard, event)
            };

            match outcome {
                Ok((consumed, finished)) => {
                    dispatch.consumed |= consumed;
                    if finished {
                        debug!(hook = %name, context = %key, "Task completed, purging state");
                        registered.purge(&key, &task);
                    }
                }
                Err(source) => {
                    registered.purge(&key, &task);
                    let err = HookError {
                        location: location.to_string(),
                        hook: name,
                        context: key,
                        source,
                    };
                    error!(error = %err, "Hook task failed, state purged");
                    dispatch.failures.push(err);
                }
            }
        }

        dispatch
    }

    // ──────────────────── Introspection ────────────────────

    pub fn contains_location(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn contains_hook(&self, location: &str, hook: &str) -> bool {
        self.hook(location, hook).is_some()
    }

    pub fn location_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn location(&self, name: &str) -> Option<LocationSpec> {
        self.read().get(name).map(|entry| entry.spec.clone())
    }

    /// Hooks of a location in registration order.
    pub fn hooks(&self, location: &str) -> Vec<HookInfo> {
        self.read()
            .get(location)
            .map(|entry| entry.hooks.values().map(|hook| hook.info(location)).collect())
            .unwrap_or_default()
    }

    /// Hooks of `location` contributed by the plugin file `path`.
    pub fn get_hooks_for(&self, location: &str, path: &Path) -> Vec<HookInfo> {
        self.hooks(location)
            .into_iter()
            .filter(|hook| hook.file == path)
            .collect()
    }

    /// Hooks contributed by `path` across every location.
    pub fn hooks_from_file(&self, path: &Path) -> Vec<HookInfo> {
        self.location_names()
            .iter()
            .flat_map(|location| self.get_hooks_for(location, path))
            .collect()
    }
}

impl<E> Default for Locations<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Deliver the event, then advance past the verdict.
/// Returns `(consumed, finished)`.
fn drive<E>(task: &mut ResumableTask<E>, event: &E) -> anyhow::Result<(bool, bool)> {
    let verdict = match task.send(event)? {
        Step::Yield(verdict) => verdict,
        Step::Complete => return Ok((false, true)),
    };
    let finished = task.advance()?.is_complete();
    Ok((verdict.is_consume(), finished))
}
