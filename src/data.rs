use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::field::FieldValue;
use crate::store::FormState;

/// A plain record of field values keyed by `form_key`.
pub type RawData = BTreeMap<String, FieldValue>;

pub type TransformFn = Arc<dyn Fn(&FieldValue) -> FieldValue + Send + Sync>;

/// Options shared by the projections: an allow-list, a deny-list, and
/// per-key value transforms. Transforms are applied last and read the live
/// field value, so a transformed key appears even when the allow-list left
/// it out.
#[derive(Clone, Default)]
pub struct ProjectionOptions {
    include: Option<Vec<String>>,
    exclude: Vec<String>,
    transforms: BTreeMap<String, TransformFn>,
}

impl ProjectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.include = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclude.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn transform(
        mut self,
        key: impl Into<String>,
        transform: impl Fn(&FieldValue) -> FieldValue + Send + Sync + 'static,
    ) -> Self {
        self.transforms.insert(key.into(), Arc::new(transform));
        self
    }
}

impl FormState {
    /// True when no field is in error. Derived on every call, never stored.
    pub fn is_valid(&self) -> bool {
        self.fields.values().all(|field| !field.error)
    }

    pub fn is_invalid(&self) -> bool {
        !self.is_valid()
    }

    /// Project the field values into a plain record.
    pub fn to_raw_data(&self, options: &ProjectionOptions) -> RawData {
        let mut data = RawData::new();

        match &options.include {
            Some(include) => {
                for key in include {
                    if let Some(field) = self.fields.get(key) {
                        data.insert(key.clone(), field.value.clone());
                    }
                }
            }
            None => {
                for (key, field) in self.fields.iter() {
                    data.insert(key.clone(), field.value.clone());
                }
            }
        }

        for key in &options.exclude {
            data.remove(key);
        }

        for (key, transform) in &options.transforms {
            if let Some(field) = self.fields.get(key) {
                data.insert(key.clone(), transform(&field.value));
            }
        }

        data
    }

    /// Project the field values into a query-string-encodable form
    /// (`a=1&b=true`, percent-encoded).
    pub fn to_query_string(&self, options: &ProjectionOptions) -> String {
        self.to_raw_data(options)
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(&value.to_display())
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Project the field values into a transfer-encodable JSON object.
    pub fn to_json(&self, options: &ProjectionOptions) -> Value {
        let mut object = serde_json::Map::new();
        for (key, value) in self.to_raw_data(options) {
            object.insert(key, serde_json::to_value(&value).unwrap_or(Value::Null));
        }
        Value::Object(object)
    }
}
