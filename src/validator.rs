use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use regex::Regex;

use crate::field::{Field, FieldMap, FieldValue};

/// Standardized classification of why a value fails a declarative
/// constraint. `CustomError` is the synthetic key that routes a pre-existing
/// custom failure back through the constraint pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ViolationKey {
    ValueMissing,
    TypeMismatch,
    TooShort,
    TooLong,
    PatternMismatch,
    RangeUnderflow,
    RangeOverflow,
    StepMismatch,
    BadInput,
    CustomError,
}

impl ViolationKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKey::ValueMissing => "valueMissing",
            ViolationKey::TypeMismatch => "typeMismatch",
            ViolationKey::TooShort => "tooShort",
            ViolationKey::TooLong => "tooLong",
            ViolationKey::PatternMismatch => "patternMismatch",
            ViolationKey::RangeUnderflow => "rangeUnderflow",
            ViolationKey::RangeOverflow => "rangeOverflow",
            ViolationKey::StepMismatch => "stepMismatch",
            ViolationKey::BadInput => "badInput",
            ViolationKey::CustomError => "customError",
        }
    }
}

impl Display for ViolationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a constraint handler's message comes from: a fixed string or a
/// function of the failing field.
#[derive(Clone)]
pub enum MessageSource {
    Text(String),
    Derived(Arc<dyn Fn(&Field) -> String + Send + Sync>),
}

impl MessageSource {
    pub fn derived(f: impl Fn(&Field) -> String + Send + Sync + 'static) -> Self {
        MessageSource::Derived(Arc::new(f))
    }

    pub(crate) fn resolve(&self, field: &Field) -> String {
        match self {
            MessageSource::Text(text) => text.clone(),
            MessageSource::Derived(derive) => derive(field),
        }
    }
}

impl From<&str> for MessageSource {
    fn from(text: &str) -> Self {
        MessageSource::Text(text.to_string())
    }
}

impl From<String> for MessageSource {
    fn from(text: String) -> Self {
        MessageSource::Text(text)
    }
}

/// Outcome of one custom handler. A failing handler supplies the message the
/// field will carry; a pattern result fails when the stringified text value
/// does not match (non-text values never fail a pattern result).
#[derive(Clone)]
pub enum CheckResult {
    Pass,
    Fail(String),
    Pattern { regex: Regex, message: String },
}

impl CheckResult {
    pub fn fail(message: impl Into<String>) -> Self {
        CheckResult::Fail(message.into())
    }

    pub fn pattern(regex: Regex, message: impl Into<String>) -> Self {
        CheckResult::Pattern {
            regex,
            message: message.into(),
        }
    }

    /// Evaluates the result against the value: `Some(message)` on failure.
    pub(crate) fn failure_message(&self, value: &FieldValue) -> Option<String> {
        match self {
            CheckResult::Pass => None,
            CheckResult::Fail(message) => Some(message.clone()),
            CheckResult::Pattern { regex, message } => match value.as_text() {
                Some(text) if !regex.is_match(text) => Some(message.clone()),
                _ => None,
            },
        }
    }
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type BoxCheckFuture = Pin<Box<dyn Future<Output = Result<CheckResult, BoxError>> + Send>>;

pub(crate) type CustomHandler = Arc<dyn Fn(&Field, &FieldMap) -> CheckResult + Send + Sync>;
pub(crate) type AsyncHandler = Arc<dyn Fn(Field, Arc<FieldMap>) -> BoxCheckFuture + Send + Sync>;

#[derive(Clone)]
pub(crate) struct ConstraintRule {
    pub(crate) key: ViolationKey,
    pub(crate) message: MessageSource,
}

/// An ordered, composable rule set: constraint handlers keyed to violation
/// kinds, then custom synchronous handlers, then custom asynchronous ones.
/// Builders consume and return the validator, so deriving from a base never
/// mutates shared handler lists.
///
/// ```ignore
/// let base = Validator::new().with_required_message("this field is required");
/// let username = Validator::from(&base).with_min_length_message("too short");
/// ```
#[derive(Clone, Default)]
pub struct Validator {
    constraint_rules: Vec<ConstraintRule>,
    handlers: Vec<CustomHandler>,
    async_handlers: Vec<AsyncHandler>,
    registered: BTreeSet<ViolationKey>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new validator whose rules start as a copy of `base`; rules added
    /// afterwards are evaluated after the base's.
    pub fn from(base: &Validator) -> Self {
        base.clone()
    }

    /// Register a `valueMissing` handler (pairs with `required`).
    pub fn with_required_message(self, message: impl Into<MessageSource>) -> Self {
        self.with_violation_message(ViolationKey::ValueMissing, message)
    }

    /// Register a `tooShort` handler (pairs with `min_length`).
    pub fn with_min_length_message(self, message: impl Into<MessageSource>) -> Self {
        self.with_violation_message(ViolationKey::TooShort, message)
    }

    /// Register a `tooLong` handler (pairs with `max_length`).
    pub fn with_max_length_message(self, message: impl Into<MessageSource>) -> Self {
        self.with_violation_message(ViolationKey::TooLong, message)
    }

    /// Register a `patternMismatch` handler (pairs with `pattern`).
    pub fn with_pattern_mismatch_message(self, message: impl Into<MessageSource>) -> Self {
        self.with_violation_message(ViolationKey::PatternMismatch, message)
    }

    /// Register a `typeMismatch` handler (email/url/tel format checks).
    pub fn with_type_mismatch_message(self, message: impl Into<MessageSource>) -> Self {
        self.with_violation_message(ViolationKey::TypeMismatch, message)
    }

    /// Register a `rangeUnderflow` handler (pairs with `min`).
    pub fn with_range_underflow_message(self, message: impl Into<MessageSource>) -> Self {
        self.with_violation_message(ViolationKey::RangeUnderflow, message)
    }

    /// Register a `rangeOverflow` handler (pairs with `max`).
    pub fn with_range_overflow_message(self, message: impl Into<MessageSource>) -> Self {
        self.with_violation_message(ViolationKey::RangeOverflow, message)
    }

    /// Register a `stepMismatch` handler (pairs with `step`; reported by
    /// native-backed controls only).
    pub fn with_step_mismatch_message(self, message: impl Into<MessageSource>) -> Self {
        self.with_violation_message(ViolationKey::StepMismatch, message)
    }

    /// Register a `badInput` handler (reported by native-backed controls
    /// only).
    pub fn with_bad_input_message(self, message: impl Into<MessageSource>) -> Self {
        self.with_violation_message(ViolationKey::BadInput, message)
    }

    /// Register a handler for an arbitrary violation kind, `customError`
    /// included.
    pub fn with_violation_message(
        mut self,
        key: ViolationKey,
        message: impl Into<MessageSource>,
    ) -> Self {
        if cfg!(debug_assertions) && self.registered.contains(&key) {
            log::warn!("duplicate constraint handler for '{key}'; both will be kept, first match wins");
        }
        self.registered.insert(key);
        self.constraint_rules.push(ConstraintRule {
            key,
            message: message.into(),
        });
        self
    }

    /// Register a custom synchronous handler, run in registration order after
    /// the constraint handlers.
    pub fn with_custom(
        mut self,
        handler: impl Fn(&Field, &FieldMap) -> CheckResult + Send + Sync + 'static,
    ) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Register a custom asynchronous handler, run sequentially after the
    /// debounce window. A handler error degrades to a generic validation
    /// failure instead of crashing the update loop.
    pub fn with_custom_async<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Field, Arc<FieldMap>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CheckResult, BoxError>> + Send + 'static,
    {
        let wrapped: AsyncHandler =
            Arc::new(move |field, fields| Box::pin(handler(field, fields)));
        self.async_handlers.push(wrapped);
        self
    }

    pub fn has_constraint(&self, key: ViolationKey) -> bool {
        self.registered.contains(&key)
    }

    /// True when any custom handler (sync or async) is registered; such a
    /// validator supersedes type-format checking.
    pub fn has_custom_validation(&self) -> bool {
        !self.handlers.is_empty() || !self.async_handlers.is_empty()
    }

    pub(crate) fn constraint_rules(&self) -> &[ConstraintRule] {
        &self.constraint_rules
    }

    pub(crate) fn handlers(&self) -> &[CustomHandler] {
        &self.handlers
    }

    pub(crate) fn async_handlers(&self) -> &[AsyncHandler] {
        &self.async_handlers
    }
}

/// The validators mapping consulted per field: the field's
/// `validator_lookup_key` first, then the `"*"` wildcard.
#[derive(Clone, Default)]
pub struct ValidatorMap {
    entries: BTreeMap<String, Validator>,
}

impl ValidatorMap {
    pub const WILDCARD: &'static str = "*";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, validator: Validator) -> Self {
        self.entries.insert(key.into(), validator);
        self
    }

    /// Install the fallback validator applied to fields without their own.
    pub fn with_wildcard(self, validator: Validator) -> Self {
        self.with(Self::WILDCARD, validator)
    }

    pub fn resolve(&self, field: &Field) -> Option<&Validator> {
        self.entries
            .get(field.validator_lookup_key())
            .or_else(|| self.entries.get(Self::WILDCARD))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldKind;

    fn probe_field(key: &str) -> Field {
        Field {
            form_key: key.into(),
            validator_key: None,
            kind: FieldKind::Text,
            value: FieldValue::Text(String::new()),
            required: false,
            min: None,
            max: None,
            step: None,
            min_length: None,
            max_length: None,
            pattern: None,
            debounce: None,
            dirty: false,
            touched: false,
            error: false,
            error_text: String::new(),
            gid: "g".into(),
        }
    }

    #[test]
    fn deriving_from_a_base_copies_rules_without_sharing() {
        let base = Validator::new().with_required_message("required");
        let derived = Validator::from(&base).with_min_length_message("short");

        assert!(base.has_constraint(ViolationKey::ValueMissing));
        assert!(!base.has_constraint(ViolationKey::TooShort));
        assert!(derived.has_constraint(ViolationKey::ValueMissing));
        assert!(derived.has_constraint(ViolationKey::TooShort));
        assert_eq!(derived.constraint_rules()[0].key, ViolationKey::ValueMissing);
    }

    #[test]
    fn pattern_results_only_fail_text_values() {
        let digits = Regex::new(r"^\d+$").unwrap();
        let result = CheckResult::pattern(digits, "digits only");

        assert_eq!(
            result.failure_message(&FieldValue::Text("12a".into())),
            Some("digits only".into())
        );
        assert_eq!(result.failure_message(&FieldValue::Text("12".into())), None);
        assert_eq!(result.failure_message(&FieldValue::Bool(true)), None);
    }

    #[test]
    fn resolution_prefers_the_lookup_key_over_the_wildcard() {
        let validators = ValidatorMap::new()
            .with("email", Validator::new().with_required_message("own"))
            .with_wildcard(Validator::new().with_required_message("fallback"));

        let mut field = probe_field("email");
        assert!(validators.resolve(&field).is_some());

        field.form_key = "other".into();
        let fallback = validators.resolve(&field);
        assert!(fallback.is_some());

        field.validator_key = Some("email".into());
        assert!(validators.resolve(&field).is_some());
    }
}
