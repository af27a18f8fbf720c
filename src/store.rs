use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use crate::debounce::Debouncer;
use crate::discovery::{Discovery, TreeKey};
use crate::field::{Field, FieldMap, FieldPatch};
use crate::validator::ValidatorMap;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FormError {
    StatePoisoned(&'static str),
    UnknownField(String),
}

impl Display for FormError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::StatePoisoned(context) => {
                write!(f, "form state lock poisoned while {context}")
            }
            FormError::UnknownField(key) => {
                write!(f, "no field with key '{key}' in the current field tree")
            }
        }
    }
}

impl std::error::Error for FormError {}

pub type FormResult<T> = Result<T, FormError>;

/// The authoritative form state: the fields mapping plus the identity token
/// of the discovery run it came from. Cheap to clone; the fields map is
/// shared until the next dispatch replaces it.
#[derive(Clone, Debug)]
pub struct FormState {
    pub fields: Arc<FieldMap>,
    pub key: TreeKey,
}

impl FormState {
    pub fn field(&self, key: &str) -> Option<&Arc<Field>> {
        self.fields.get(key)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FormOptions {
    /// Debounce interval for async validation when a field declares none.
    pub default_debounce: Duration,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            default_debounce: Duration::from_millis(300),
        }
    }
}

/// A batch of per-field patches applied by an un-keyed dispatch.
#[derive(Clone, Debug, Default)]
pub struct FormPatch {
    entries: BTreeMap<String, FieldPatch>,
}

impl FormPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, patch: FieldPatch) -> Self {
        self.entries.insert(key.into(), patch);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, patch: FieldPatch) {
        self.entries.insert(key.into(), patch);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&String, &FieldPatch)> {
        self.entries.iter()
    }
}

type Listener = Arc<dyn Fn(&FormState) + Send + Sync>;

pub(crate) struct StoreInner {
    state: RwLock<FormState>,
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    validators: ValidatorMap,
    debouncer: Debouncer,
    options: FormOptions,
}

/// The form store: holds the fields mapping, applies the dispatch/merge
/// protocol, and notifies subscribers synchronously in subscription order.
/// Clones share the same underlying store.
#[derive(Clone)]
pub struct FormStore {
    pub(crate) inner: Arc<StoreInner>,
}

impl FormStore {
    pub fn new(discovery: Discovery, validators: ValidatorMap) -> Self {
        Self::with_options(discovery, validators, FormOptions::default(), Debouncer::new())
    }

    /// Full constructor; the debouncer is injected so a composing session can
    /// own (and share) the keyed timer registry.
    pub fn with_options(
        discovery: Discovery,
        validators: ValidatorMap,
        options: FormOptions,
        debouncer: Debouncer,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(FormState {
                    fields: Arc::new(discovery.fields),
                    key: discovery.key,
                }),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                validators,
                debouncer,
                options,
            }),
        }
    }

    /// A snapshot of the current state. The fields map inside is shared, so
    /// this is cheap and safe to hold across dispatches.
    pub fn state(&self) -> FormResult<FormState> {
        Ok(read_lock(&self.inner.state, "reading form state")?.clone())
    }

    pub fn tree_key(&self) -> FormResult<TreeKey> {
        Ok(read_lock(&self.inner.state, "reading the tree key")?.key.clone())
    }

    /// Replace the state wholesale, then notify every subscriber.
    pub fn replace_state(&self, next: FormState) -> FormResult<()> {
        {
            let mut state = write_lock(&self.inner.state, "replacing form state")?;
            *state = next;
        }
        self.notify()
    }

    /// Apply a pure updater to the previous state, then notify every
    /// subscriber.
    pub fn update_state(
        &self,
        updater: impl FnOnce(&FormState) -> FormState,
    ) -> FormResult<()> {
        {
            let mut state = write_lock(&self.inner.state, "updating form state")?;
            let next = updater(&state);
            *state = next;
        }
        self.notify()
    }

    /// Shallow-merge a patch into exactly one field. The patched key gets a
    /// fresh entry; every other field keeps its identity, which is what the
    /// selector memoization relies on.
    pub fn dispatch_field(&self, key: &str, patch: FieldPatch) -> FormResult<()> {
        {
            let mut state = write_lock(&self.inner.state, "dispatching a field change")?;
            let Some(current) = state.fields.get(key) else {
                return Err(FormError::UnknownField(key.to_string()));
            };
            let mut updated = (**current).clone();
            patch.apply(&mut updated);

            let mut fields = (*state.fields).clone();
            fields.insert(key.to_string(), Arc::new(updated));
            state.fields = Arc::new(fields);
        }
        self.notify()
    }

    /// Un-keyed dispatch: merge a batch of per-field patches into the top
    /// level. Keys missing from the current tree are skipped (advisory
    /// warning in development builds).
    pub fn dispatch(&self, patch: FormPatch) -> FormResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        {
            let mut state = write_lock(&self.inner.state, "dispatching a form patch")?;
            let mut fields = (*state.fields).clone();
            for (key, field_patch) in patch.entries() {
                match fields.get(key) {
                    Some(current) => {
                        let mut updated = (**current).clone();
                        field_patch.apply(&mut updated);
                        fields.insert(key.clone(), Arc::new(updated));
                    }
                    None => {
                        if cfg!(debug_assertions) {
                            log::warn!("form patch addresses unknown field '{key}'; skipping it");
                        }
                    }
                }
            }
            state.fields = Arc::new(fields);
        }
        self.notify()
    }

    /// Subscribe to state changes. Listeners run synchronously, in
    /// subscription order, after every applied mutation.
    pub fn subscribe(
        &self,
        listener: impl Fn(&FormState) + Send + Sync + 'static,
    ) -> FormResult<Subscription> {
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        write_lock(&self.inner.listeners, "subscribing to the store")?
            .push((id, Arc::new(listener)));
        Ok(Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Adopt a rediscovered field tree. Fields whose `form_key` and `kind`
    /// survive the transition keep their validated state (value, dirtiness,
    /// validity, instance id); re-typed and vanished fields are discarded.
    /// Subscribers belong to the previous provisioning and are cleared; the
    /// composing layer re-subscribes against the fresh tree identity.
    pub fn adopt(&self, discovery: Discovery) -> FormResult<TreeKey> {
        let key = discovery.key.clone();
        {
            let mut state = write_lock(&self.inner.state, "adopting a rediscovered tree")?;
            let mut fields = discovery.fields;
            for (form_key, next) in fields.iter_mut() {
                if let Some(previous) = state.fields.get(form_key) {
                    if previous.kind == next.kind {
                        let mut merged = (**next).clone();
                        merged.value = previous.value.clone();
                        merged.dirty = previous.dirty;
                        merged.touched = previous.touched;
                        merged.error = previous.error;
                        merged.error_text = previous.error_text.clone();
                        merged.gid = previous.gid.clone();
                        *next = Arc::new(merged);
                    }
                }
            }
            state.fields = Arc::new(fields);
            state.key = discovery.key;
        }
        match self.inner.listeners.write() {
            Ok(mut listeners) => listeners.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        Ok(key)
    }

    /// Run the mount hook once: it receives the live snapshot and may return
    /// a batch of per-field overrides.
    pub fn init_with<F>(&self, hook: F) -> FormResult<()>
    where
        F: FnOnce(&FormState) -> Option<FormPatch>,
    {
        let snapshot = self.state()?;
        match hook(&snapshot) {
            Some(patch) => self.dispatch(patch),
            None => Ok(()),
        }
    }

    /// As [`FormStore::init_with`], for hooks that resolve asynchronously.
    pub async fn init_with_async<F, Fut>(&self, hook: F) -> FormResult<()>
    where
        F: FnOnce(FormState) -> Fut,
        Fut: Future<Output = Option<FormPatch>>,
    {
        let snapshot = self.state()?;
        match hook(snapshot).await {
            Some(patch) => self.dispatch(patch),
            None => Ok(()),
        }
    }

    /// A handle bundling the per-field operations for one key.
    pub fn field(&self, key: &str) -> FormResult<FieldHandle> {
        let state = read_lock(&self.inner.state, "resolving a field handle")?;
        if !state.fields.contains_key(key) {
            return Err(FormError::UnknownField(key.to_string()));
        }
        Ok(FieldHandle {
            store: self.clone(),
            key: key.to_string(),
        })
    }

    /// The keyed debounce registry this store was built with.
    pub fn debouncer(&self) -> &Debouncer {
        &self.inner.debouncer
    }

    pub(crate) fn validators(&self) -> &ValidatorMap {
        &self.inner.validators
    }

    pub(crate) fn options(&self) -> FormOptions {
        self.inner.options
    }

    fn notify(&self) -> FormResult<()> {
        let snapshot = self.state()?;
        let listeners = read_lock(&self.inner.listeners, "reading subscribers")?.clone();
        for (_, listener) in listeners {
            listener(&snapshot);
        }
        Ok(())
    }
}

/// Handle returned by [`FormStore::subscribe`]; dropping it without calling
/// [`Subscription::unsubscribe`] leaves the listener installed.
pub struct Subscription {
    id: u64,
    inner: Weak<StoreInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut listeners = match inner.listeners.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// The per-field operational interface. Obtained from the store, never
/// attached to field data after the fact.
#[derive(Clone)]
pub struct FieldHandle {
    pub(crate) store: FormStore,
    pub(crate) key: String,
}

impl FieldHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The field's current state.
    pub fn snapshot(&self) -> FormResult<Arc<Field>> {
        let state = self.store.state()?;
        state
            .fields
            .get(&self.key)
            .cloned()
            .ok_or_else(|| FormError::UnknownField(self.key.clone()))
    }

    /// Merge a partial update into this field and notify subscribers. This is
    /// the script path: it marks nothing dirty on its own.
    pub fn dispatch_changes(&self, patch: FieldPatch) -> FormResult<()> {
        self.store.dispatch_field(&self.key, patch)
    }
}

/// Provisioning scope for a store. Consumers reach the store through the
/// context; reading it before a field tree has been discovered and provided
/// is a usage error and panics with a diagnostic.
#[derive(Default)]
pub struct FormContext {
    store: RwLock<Option<FormStore>>,
}

impl FormContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(&self, store: FormStore) {
        let mut slot = match self.store.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(store);
    }

    pub fn is_provisioned(&self) -> bool {
        let slot = match self.store.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.is_some()
    }

    /// The provisioned store.
    ///
    /// # Panics
    ///
    /// Panics when no store has been provided yet; provisioning must be
    /// structurally guaranteed before use.
    pub fn store(&self) -> FormStore {
        let slot = match self.store.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slot.as_ref() {
            Some(store) => store.clone(),
            None => panic!(
                "form store accessed before a field tree was discovered; \
                 provide() must run before any consumer reads the context"
            ),
        }
    }
}

pub(crate) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(crate) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
