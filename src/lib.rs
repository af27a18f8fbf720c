pub mod data;
pub mod debounce;
pub mod discovery;
pub mod engine;
pub mod field;
pub mod id;
pub mod selector;
pub mod store;
pub mod validator;

pub use data::{ProjectionOptions, RawData, TransformFn};
pub use debounce::{DebounceOutcome, Debouncer};
pub use discovery::{Discovery, FieldSpec, TreeKey, discover};
pub use engine::{PendingValidation, ValidityProbe};
pub use field::{Field, FieldKind, FieldMap, FieldPatch, FieldValue};
pub use selector::{
    Selector, SelectorInputs, StableEq, create_selector, make_select_fields, select_any_invalid,
};
pub use store::{
    FieldHandle, FormContext, FormError, FormOptions, FormPatch, FormResult, FormState, FormStore,
    Subscription,
};
pub use validator::{
    BoxCheckFuture, BoxError, CheckResult, MessageSource, Validator, ValidatorMap, ViolationKey,
};
