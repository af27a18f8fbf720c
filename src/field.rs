use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Serialize, Serializer};

/// The live fields mapping of one form instance. Entries are `Arc`-shared so
/// a keyed dispatch replaces exactly one pointer and leaves every other
/// field's identity intact.
pub type FieldMap = BTreeMap<String, Arc<Field>>;

/// A form value: text, a decimal number, or a flag.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(Decimal),
    Bool(bool),
}

impl FieldValue {
    /// Empty in the value-missing sense: `""`, `false`, or `0`.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(text) => text.is_empty(),
            FieldValue::Number(number) => number.is_zero(),
            FieldValue::Bool(flag) => !flag,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Numeric view used by range comparisons: numbers directly, text parsed
    /// when it happens to be numeric, flags never.
    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            FieldValue::Number(number) => Some(*number),
            FieldValue::Text(text) => text.trim().parse().ok(),
            FieldValue::Bool(_) => None,
        }
    }

    /// Stringified form used by length checks and the encoded projections.
    pub fn to_display(&self) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Number(number) => number.to_string(),
            FieldValue::Bool(flag) => flag.to_string(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(Decimal::from(value))
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FieldValue::Text(text) => serializer.serialize_str(text),
            FieldValue::Bool(flag) => serializer.serialize_bool(*flag),
            FieldValue::Number(number) => match number.to_f64() {
                Some(float) => serializer.serialize_f64(float),
                None => serializer.serialize_str(&number.to_string()),
            },
        }
    }
}

/// Semantic input kind. Determines the default value and which declarative
/// constraint checks apply; immutable for the lifetime of a field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldKind {
    Text,
    Password,
    Search,
    Email,
    Url,
    Tel,
    Number,
    Checkbox,
    Date,
    Time,
    Other(String),
}

impl FieldKind {
    pub fn parse(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "text" => FieldKind::Text,
            "password" => FieldKind::Password,
            "search" => FieldKind::Search,
            "email" => FieldKind::Email,
            "url" => FieldKind::Url,
            "tel" => FieldKind::Tel,
            "number" => FieldKind::Number,
            "checkbox" => FieldKind::Checkbox,
            "date" => FieldKind::Date,
            "time" => FieldKind::Time,
            other => FieldKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Password => "password",
            FieldKind::Search => "search",
            FieldKind::Email => "email",
            FieldKind::Url => "url",
            FieldKind::Tel => "tel",
            FieldKind::Number => "number",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Date => "date",
            FieldKind::Time => "time",
            FieldKind::Other(other) => other,
        }
    }

    /// Unknown kinds fall back to the text default.
    pub fn default_value(&self) -> FieldValue {
        match self {
            FieldKind::Checkbox => FieldValue::Bool(false),
            FieldKind::Number => FieldValue::Number(Decimal::ZERO),
            _ => FieldValue::Text(String::new()),
        }
    }

    /// `min`/`max`/`step` apply to numeric and date-like kinds only.
    pub fn supports_range(&self) -> bool {
        matches!(self, FieldKind::Number | FieldKind::Date | FieldKind::Time)
    }
}

/// One form input's state: declared configuration plus the mutable
/// interaction outcome (`value`, `dirty`, `touched`, `error`, `error_text`).
#[derive(Clone, Debug)]
pub struct Field {
    pub form_key: String,
    pub validator_key: Option<String>,
    pub kind: FieldKind,
    pub value: FieldValue,
    pub required: bool,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    pub step: Option<Decimal>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
    pub debounce: Option<Duration>,
    pub dirty: bool,
    pub touched: bool,
    pub error: bool,
    pub error_text: String,
    pub gid: String,
}

impl Field {
    /// The key the validator mapping is consulted with before the wildcard.
    pub fn validator_lookup_key(&self) -> &str {
        self.validator_key.as_deref().unwrap_or(&self.form_key)
    }

    pub(crate) fn debounce_token(&self) -> String {
        format!("{}-async", self.gid)
    }
}

/// A shallow partial update for one field, applied by the dispatch/merge
/// protocol: only the set members overwrite. Configuration (`kind`,
/// constraints) is not patchable; fields are rebuilt by discovery instead.
#[derive(Clone, Debug, Default)]
pub struct FieldPatch {
    pub value: Option<FieldValue>,
    pub dirty: Option<bool>,
    pub touched: Option<bool>,
    pub error: Option<bool>,
    pub error_text: Option<String>,
}

impl FieldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, value: impl Into<FieldValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn dirty(mut self, dirty: bool) -> Self {
        self.dirty = Some(dirty);
        self
    }

    pub fn touched(mut self, touched: bool) -> Self {
        self.touched = Some(touched);
        self
    }

    pub fn error(mut self, error: bool) -> Self {
        self.error = Some(error);
        self
    }

    pub fn error_text(mut self, error_text: impl Into<String>) -> Self {
        self.error_text = Some(error_text.into());
        self
    }

    pub(crate) fn apply(&self, field: &mut Field) {
        if let Some(value) = &self.value {
            field.value = value.clone();
        }
        if let Some(dirty) = self.dirty {
            field.dirty = dirty;
        }
        if let Some(touched) = self.touched {
            field.touched = touched;
        }
        if let Some(error) = self.error {
            field.error = error;
        }
        if let Some(error_text) = &self.error_text {
            field.error_text = error_text.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_emptiness_follows_the_falsy_rule() {
        assert!(FieldValue::Text(String::new()).is_empty());
        assert!(FieldValue::Bool(false).is_empty());
        assert!(FieldValue::Number(Decimal::ZERO).is_empty());
        assert!(!FieldValue::Text("0".into()).is_empty());
        assert!(!FieldValue::Number(Decimal::ONE).is_empty());
    }

    #[test]
    fn numeric_view_parses_numeric_text() {
        assert_eq!(
            FieldValue::Text("42".into()).as_number(),
            Some(Decimal::from(42))
        );
        assert_eq!(FieldValue::Text("2024-01-01".into()).as_number(), None);
        assert_eq!(FieldValue::Bool(true).as_number(), None);
    }

    #[test]
    fn unknown_kinds_keep_their_name_and_default_to_text() {
        let kind = FieldKind::parse("color");
        assert_eq!(kind.as_str(), "color");
        assert_eq!(kind.default_value(), FieldValue::Text(String::new()));
        assert!(!kind.supports_range());
    }

    #[test]
    fn patch_applies_only_set_members() {
        let mut field = Field {
            form_key: "city".into(),
            validator_key: None,
            kind: FieldKind::Text,
            value: FieldValue::Text("paris".into()),
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
            gid: "g1".into(),
        };

        FieldPatch::new().error(true).error_text("taken").apply(&mut field);
        assert_eq!(field.value, FieldValue::Text("paris".into()));
        assert!(field.error);
        assert_eq!(field.error_text, "taken");
        assert!(!field.dirty);
    }
}
