use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use rust_decimal::Decimal;

use crate::field::{Field, FieldKind, FieldMap, FieldValue};
use crate::id;

/// Opaque identity token of one discovery run. Two runs over the same tree
/// still mint distinct keys; the composing layer compares tokens to tell "a
/// structurally new form" from "the same form re-rendering".
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TreeKey(String);

impl TreeKey {
    pub(crate) fn mint() -> Self {
        TreeKey(id::unique_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One node of the declarative field-descriptor tree: a field when it names
/// a `form_key`, a transparent container otherwise. Built with consuming
/// setters.
///
/// ```ignore
/// let tree = [FieldSpec::group().child(
///     FieldSpec::field("email").kind(FieldKind::Email).required(true),
/// )];
/// let discovery = discover(&tree);
/// ```
#[derive(Clone, Debug, Default)]
pub struct FieldSpec {
    form_key: Option<String>,
    kind: Option<FieldKind>,
    value: Option<FieldValue>,
    default_value: Option<FieldValue>,
    checked: Option<bool>,
    default_checked: Option<bool>,
    required: bool,
    min: Option<Decimal>,
    max: Option<Decimal>,
    step: Option<Decimal>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<String>,
    validator_key: Option<String>,
    debounce: Option<Duration>,
    children: Vec<FieldSpec>,
}

impl FieldSpec {
    /// A container node: traversed for nested fields, never a field itself.
    pub fn group() -> Self {
        Self::default()
    }

    /// A field node. Field nodes are traversal leaves.
    pub fn field(form_key: impl Into<String>) -> Self {
        Self {
            form_key: Some(form_key.into()),
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: FieldKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn value(mut self, value: impl Into<FieldValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = Some(checked);
        self
    }

    pub fn default_checked(mut self, checked: bool) -> Self {
        self.default_checked = Some(checked);
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn min(mut self, min: Decimal) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: Decimal) -> Self {
        self.max = Some(max);
        self
    }

    pub fn step(mut self, step: Decimal) -> Self {
        self.step = Some(step);
        self
    }

    pub fn min_length(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn validator_key(mut self, key: impl Into<String>) -> Self {
        self.validator_key = Some(key.into());
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }

    pub fn child(mut self, child: FieldSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.children.extend(children);
        self
    }

    fn into_field(self) -> Option<Field> {
        let form_key = self.form_key?;
        let kind = self.kind.unwrap_or(FieldKind::Text);

        // Presence-based default resolution: explicit value, then the
        // declared defaults, then the kind default.
        let value = self
            .value
            .or(self.default_value)
            .or(self.checked.map(FieldValue::Bool))
            .or(self.default_checked.map(FieldValue::Bool))
            .unwrap_or_else(|| kind.default_value());

        let pattern = self.pattern.and_then(|raw| match Regex::new(&raw) {
            Ok(regex) => Some(regex),
            Err(error) => {
                if cfg!(debug_assertions) {
                    log::warn!("field '{form_key}' declares an invalid pattern ({error}); ignoring it");
                }
                None
            }
        });

        Some(Field {
            form_key,
            validator_key: self.validator_key,
            kind,
            value,
            required: self.required,
            min: self.min,
            max: self.max,
            step: self.step,
            min_length: self.min_length,
            max_length: self.max_length,
            pattern,
            debounce: self.debounce,
            dirty: false,
            touched: false,
            error: false,
            error_text: String::new(),
            gid: id::unique_id(),
        })
    }
}

/// The flattened output of one discovery run.
#[derive(Clone, Debug)]
pub struct Discovery {
    pub fields: FieldMap,
    pub key: TreeKey,
}

/// Walks the descriptor tree depth-first, left-to-right, and flattens it into
/// `form_key → initial field`. Only nodes naming a `form_key` become fields;
/// every other node is traversed transparently. A duplicate key keeps the
/// first definition and warns in development builds.
pub fn discover(roots: &[FieldSpec]) -> Discovery {
    let mut fields = BTreeMap::new();
    for root in roots {
        walk(root, &mut fields);
    }
    Discovery {
        fields,
        key: TreeKey::mint(),
    }
}

fn walk(spec: &FieldSpec, fields: &mut FieldMap) {
    if spec.form_key.is_some() {
        let Some(field) = spec.clone().into_field() else {
            return;
        };
        if fields.contains_key(&field.form_key) {
            if cfg!(debug_assertions) {
                log::warn!(
                    "field with key '{}' has already been defined; keeping the first definition",
                    field.form_key
                );
            }
            return;
        }
        fields.insert(field.form_key.clone(), Arc::new(field));
        return;
    }

    for child in &spec.children {
        walk(child, fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_containers_flatten_depth_first() {
        let tree = [FieldSpec::group()
            .child(FieldSpec::group().child(FieldSpec::field("first")))
            .child(FieldSpec::field("second"))];

        let discovery = discover(&tree);
        assert_eq!(discovery.fields.len(), 2);
        assert!(discovery.fields.contains_key("first"));
        assert!(discovery.fields.contains_key("second"));
    }

    #[test]
    fn duplicate_keys_keep_the_first_definition() {
        let tree = [
            FieldSpec::field("email").required(true),
            FieldSpec::field("email").required(false),
        ];

        let discovery = discover(&tree);
        assert_eq!(discovery.fields.len(), 1);
        assert!(discovery.fields["email"].required);
    }

    #[test]
    fn default_values_resolve_by_presence() {
        let tree = [
            FieldSpec::field("explicit").value("given"),
            FieldSpec::field("fallback").default_value("fallback"),
            FieldSpec::field("flag").kind(FieldKind::Checkbox).default_checked(true),
            FieldSpec::field("plain").kind(FieldKind::Number),
        ];

        let discovery = discover(&tree);
        assert_eq!(discovery.fields["explicit"].value, FieldValue::Text("given".into()));
        assert_eq!(discovery.fields["fallback"].value, FieldValue::Text("fallback".into()));
        assert_eq!(discovery.fields["flag"].value, FieldValue::Bool(true));
        assert_eq!(discovery.fields["plain"].value, FieldValue::Number(Decimal::ZERO));
    }

    #[test]
    fn field_nodes_are_traversal_leaves() {
        let tree = [FieldSpec::field("outer").child(FieldSpec::field("inner"))];

        let discovery = discover(&tree);
        assert_eq!(discovery.fields.len(), 1);
        assert!(discovery.fields.contains_key("outer"));
    }

    #[test]
    fn invalid_patterns_are_dropped() {
        let tree = [FieldSpec::field("code").pattern("([")];
        let discovery = discover(&tree);
        assert!(discovery.fields["code"].pattern.is_none());
    }

    #[test]
    fn every_run_mints_a_fresh_tree_key() {
        let tree = [FieldSpec::field("a")];
        assert_ne!(discover(&tree).key, discover(&tree).key);
    }
}
