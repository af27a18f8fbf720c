use std::sync::Arc;
use std::time::Duration;

use futures_timer::Delay;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::field::{Field, FieldMap, FieldPatch, FieldValue};
use crate::store::{FieldHandle, FormError, FormResult, FormStore};
use crate::validator::{AsyncHandler, ViolationKey};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").unwrap());

static TEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9 ().-]{3,}$").unwrap());

/// Capability interface over "a control that can report its own constraint
/// violation". A field backed by a real input widget supplies one; headless
/// fields leave it out and the engine resolves violations itself.
pub trait ValidityProbe: Send + Sync {
    /// The violation the backing control currently reports, if any.
    fn violation(&self) -> Option<ViolationKey>;

    /// Receives the engine's message so the control can surface it; an empty
    /// message clears a previously forwarded one.
    fn notify(&self, message: &str) {
        let _ = message;
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum AsyncMode {
    Schedule,
    Skip,
}

impl FormStore {
    /// Set a field's value from an interaction (marks it dirty), validate it,
    /// and dispatch the outcome. When the resolved validator has async
    /// handlers the returned [`PendingValidation`] must be driven to
    /// completion by the composing layer.
    pub fn update_field(
        &self,
        key: &str,
        value: FieldValue,
    ) -> FormResult<Option<PendingValidation>> {
        self.update_field_inner(key, value, None)
    }

    /// As [`FormStore::update_field`], for a field backed by a native
    /// control.
    pub fn update_field_with_probe(
        &self,
        key: &str,
        value: FieldValue,
        probe: Arc<dyn ValidityProbe>,
    ) -> FormResult<Option<PendingValidation>> {
        self.update_field_inner(key, value, Some(probe))
    }

    /// Re-validate a field at its current value (the blur path).
    pub fn validate_field(&self, key: &str) -> FormResult<Option<PendingValidation>> {
        let field = self.current_field(key)?;
        self.finish_validation(field, None, AsyncMode::Schedule)
    }

    pub fn validate_field_with_probe(
        &self,
        key: &str,
        probe: Arc<dyn ValidityProbe>,
    ) -> FormResult<Option<PendingValidation>> {
        let field = self.current_field(key)?;
        self.finish_validation(field, Some(probe), AsyncMode::Schedule)
    }

    /// Manual constraint evaluation for one field: runs the synchronous
    /// pipeline, dispatches the outcome, and reports validity. Async handlers
    /// are not scheduled here; use [`FormStore::validate_field`] for the full
    /// pipeline.
    pub fn check_field(&self, key: &str) -> FormResult<bool> {
        let field = self.current_field(key)?;
        self.finish_validation(field, None, AsyncMode::Skip)?;
        Ok(!self.current_field(key)?.error)
    }

    /// Manual constraint evaluation across every field; true when no field is
    /// left in error.
    pub fn check_validity(&self) -> FormResult<bool> {
        let keys: Vec<String> = self.state()?.fields.keys().cloned().collect();
        for key in &keys {
            self.check_field(key)?;
        }
        Ok(self.state()?.fields.values().all(|field| !field.error))
    }

    /// One validation pass over every field carrying a non-empty initial
    /// value, run once at mount.
    pub fn validate_initial(&self) -> FormResult<Vec<PendingValidation>> {
        let keys: Vec<String> = self
            .state()?
            .fields
            .iter()
            .filter(|(_, field)| !field.value.is_empty())
            .map(|(key, _)| key.clone())
            .collect();

        let mut pending = Vec::new();
        for key in &keys {
            if let Some(validation) = self.validate_field(key)? {
                pending.push(validation);
            }
        }
        Ok(pending)
    }

    fn update_field_inner(
        &self,
        key: &str,
        value: FieldValue,
        probe: Option<Arc<dyn ValidityProbe>>,
    ) -> FormResult<Option<PendingValidation>> {
        let mut field = self.current_field(key)?;
        field.value = value;
        field.dirty = true;
        self.finish_validation(field, probe, AsyncMode::Schedule)
    }

    fn current_field(&self, key: &str) -> FormResult<Field> {
        let state = self.state()?;
        state
            .fields
            .get(key)
            .map(|field| (**field).clone())
            .ok_or_else(|| FormError::UnknownField(key.to_string()))
    }

    fn finish_validation(
        &self,
        mut field: Field,
        probe: Option<Arc<dyn ValidityProbe>>,
        mode: AsyncMode,
    ) -> FormResult<Option<PendingValidation>> {
        let pending = self.validate_in_place(&mut field, probe, mode)?;
        let patch = FieldPatch::new()
            .value(field.value.clone())
            .dirty(field.dirty)
            .touched(field.touched)
            .error(field.error)
            .error_text(field.error_text.clone());
        self.dispatch_field(&field.form_key, patch)?;
        Ok(pending)
    }

    /// The validation pipeline proper: violation-key resolution, then
    /// constraint handlers, then custom sync handlers, then (optionally) the
    /// scheduled async follow-up. Mutates the working copy in place.
    fn validate_in_place(
        &self,
        field: &mut Field,
        probe: Option<Arc<dyn ValidityProbe>>,
        mode: AsyncMode,
    ) -> FormResult<Option<PendingValidation>> {
        let fields = self.state()?.fields;

        let Some(validator) = self.validators().resolve(field).cloned() else {
            // No resolvable validator: always valid.
            field.touched = true;
            return Ok(None);
        };

        // A declared pattern or any custom handler supersedes type-format
        // checking.
        let exclude_type_mismatch = field.pattern.is_some() || validator.has_custom_validation();

        let resolved = match &probe {
            Some(probe) => {
                probe.notify("");
                probe
                    .violation()
                    .filter(|key| !(exclude_type_mismatch && *key == ViolationKey::TypeMismatch))
            }
            None => resolve_violation(field, exclude_type_mismatch),
        };

        // A clean pass over a field already in error keeps the previous
        // custom failure alive through the synthetic key.
        let resolved = match resolved {
            None if field.error => Some(ViolationKey::CustomError),
            other => other,
        };

        if let Some(key) = resolved {
            if cfg!(debug_assertions)
                && key != ViolationKey::CustomError
                && !validator.has_constraint(key)
            {
                log::warn!(
                    "field '{}' violates '{key}' but its validator has no matching message handler",
                    field.form_key
                );
            }

            for rule in validator.constraint_rules() {
                if rule.key == key {
                    let message = rule.message.resolve(field);
                    field.error = true;
                    field.error_text = message;
                    field.touched = true;
                    self.forward_failure(field, &probe);
                    return Ok(None);
                }
            }
        }

        for handler in validator.handlers() {
            let result = handler(field, &fields);
            if let Some(message) = result.failure_message(&field.value) {
                field.error = true;
                field.error_text = message;
                field.touched = true;
                self.forward_failure(field, &probe);
                return Ok(None);
            }
        }

        field.error = false;
        field.error_text.clear();
        field.touched = true;

        if mode == AsyncMode::Skip || validator.async_handlers().is_empty() {
            return Ok(None);
        }

        // Pending placeholder until the debounced async run lands.
        field.error = true;
        Ok(Some(PendingValidation {
            store: self.clone(),
            key: field.form_key.clone(),
            token: field.debounce_token(),
            delay: field.debounce.unwrap_or(self.options().default_debounce),
            handlers: validator.async_handlers().to_vec(),
            field: field.clone(),
            fields,
            probe,
        }))
    }

    fn forward_failure(&self, field: &Field, probe: &Option<Arc<dyn ValidityProbe>>) {
        if let Some(probe) = probe {
            if field.error && !field.error_text.is_empty() {
                probe.notify(&field.error_text);
            }
        }
    }
}

impl FieldHandle {
    /// Set this field's value from an interaction and validate it.
    pub fn update(&self, value: impl Into<FieldValue>) -> FormResult<Option<PendingValidation>> {
        self.store.update_field(&self.key, value.into())
    }

    pub fn update_with_probe(
        &self,
        value: impl Into<FieldValue>,
        probe: Arc<dyn ValidityProbe>,
    ) -> FormResult<Option<PendingValidation>> {
        self.store
            .update_field_with_probe(&self.key, value.into(), probe)
    }

    /// Re-validate at the current value.
    pub fn validate(&self) -> FormResult<Option<PendingValidation>> {
        self.store.validate_field(&self.key)
    }

    pub fn validate_with_probe(
        &self,
        probe: Arc<dyn ValidityProbe>,
    ) -> FormResult<Option<PendingValidation>> {
        self.store.validate_field_with_probe(&self.key, probe)
    }

    /// Manual constraint evaluation; true when the field is not in error
    /// afterwards.
    pub fn check_validity(&self) -> FormResult<bool> {
        self.store.check_field(&self.key)
    }
}

/// A scheduled async validation run. The sync pass has already dispatched the
/// pending `error = true` placeholder; driving this future to completion
/// waits out the debounce window, runs the async handlers sequentially, and
/// dispatches the final outcome unless a newer pass superseded it.
pub struct PendingValidation {
    store: FormStore,
    key: String,
    token: String,
    delay: Duration,
    handlers: Vec<AsyncHandler>,
    field: Field,
    fields: Arc<FieldMap>,
    probe: Option<Arc<dyn ValidityProbe>>,
}

impl PendingValidation {
    pub fn field_key(&self) -> &str {
        &self.key
    }

    pub async fn run(self) -> FormResult<()> {
        let debouncer = self.store.debouncer().clone();
        let generation = debouncer.begin(&self.token);
        Delay::new(self.delay).await;
        if !debouncer.is_current(&self.token, generation) {
            return Ok(());
        }

        let mut error = false;
        let mut error_text = String::new();
        for handler in &self.handlers {
            match handler(self.field.clone(), self.fields.clone()).await {
                Ok(result) => {
                    if let Some(message) = result.failure_message(&self.field.value) {
                        error = true;
                        error_text = message;
                        break;
                    }
                }
                Err(cause) => {
                    log::warn!("async validator for field '{}' failed: {cause}", self.key);
                    error = true;
                    error_text = "validation failed".to_string();
                    break;
                }
            }
        }

        // A newer pass may have started while the handlers ran; its outcome
        // is authoritative, this one is discarded.
        if !debouncer.is_current(&self.token, generation) {
            return Ok(());
        }

        let patch = FieldPatch::new().error(error).error_text(error_text.clone());
        match self.store.dispatch_field(&self.key, patch) {
            // The field vanished with a tree change; nothing left to report.
            Err(FormError::UnknownField(_)) => return Ok(()),
            other => other?,
        }

        if let Some(probe) = &self.probe {
            probe.notify(&error_text);
        }
        Ok(())
    }
}

fn resolve_violation(field: &Field, exclude_type_mismatch: bool) -> Option<ViolationKey> {
    if field.required && field.value.is_empty() {
        return Some(ViolationKey::ValueMissing);
    }
    if !exclude_type_mismatch && type_mismatch(field) {
        return Some(ViolationKey::TypeMismatch);
    }

    let length = field.value.to_display().chars().count();
    if let Some(min_length) = field.min_length {
        if length < min_length {
            return Some(ViolationKey::TooShort);
        }
    }
    if let Some(max_length) = field.max_length {
        if length > max_length {
            return Some(ViolationKey::TooLong);
        }
    }

    if let (Some(pattern), Some(text)) = (&field.pattern, field.value.as_text()) {
        if !pattern.is_match(text) {
            return Some(ViolationKey::PatternMismatch);
        }
    }

    if field.kind.supports_range() {
        if let Some(value) = field.value.as_number() {
            if let Some(min) = field.min {
                if value < min {
                    return Some(ViolationKey::RangeUnderflow);
                }
            }
            if let Some(max) = field.max {
                if value > max {
                    return Some(ViolationKey::RangeOverflow);
                }
            }
        }
    }

    None
}

fn type_mismatch(field: &Field) -> bool {
    let Some(text) = field.value.as_text() else {
        return false;
    };
    if text.is_empty() {
        return false;
    }
    match field.kind {
        crate::field::FieldKind::Email => !EMAIL_RE.is_match(text),
        crate::field::FieldKind::Url => !URL_RE.is_match(text),
        crate::field::FieldKind::Tel => !TEL_RE.is_match(text),
        _ => false,
    }
}
