use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use rust_decimal::Decimal;

use crate::field::{Field, FieldMap, FieldValue};
use crate::store::FormState;

/// The identity comparison selector inputs are memoized under: pointer
/// identity for shared values, value equality for plain ones.
pub trait StableEq {
    fn stable_eq(&self, other: &Self) -> bool;
}

impl<T: ?Sized> StableEq for Arc<T> {
    fn stable_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: StableEq> StableEq for Option<T> {
    fn stable_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(left), Some(right)) => left.stable_eq(right),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: StableEq> StableEq for Vec<T> {
    fn stable_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(left, right)| left.stable_eq(right))
    }
}

macro_rules! impl_stable_eq_by_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl StableEq for $ty {
                fn stable_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )+
    };
}

impl_stable_eq_by_value!(
    bool,
    usize,
    u64,
    i64,
    String,
    Decimal,
    FieldValue,
    crate::discovery::TreeKey,
);

macro_rules! impl_stable_eq_tuple {
    ($(($T:ident, $idx:tt)),+) => {
        impl<$($T: StableEq),+> StableEq for ($($T,)+) {
            fn stable_eq(&self, other: &Self) -> bool {
                $( self.$idx.stable_eq(&other.$idx) )&&+
            }
        }
    };
}

impl_stable_eq_tuple!((A, 0));
impl_stable_eq_tuple!((A, 0), (B, 1));
impl_stable_eq_tuple!((A, 0), (B, 1), (C, 2));
impl_stable_eq_tuple!((A, 0), (B, 1), (C, 2), (D, 3));

/// The declared inputs of a memoized selector: a tuple of extractor
/// functions (heterogeneous) or a `Vec` of them (homogeneous).
pub trait SelectorInputs<State> {
    type Values: StableEq;

    fn evaluate(&self, state: &State) -> Self::Values;
}

macro_rules! impl_selector_inputs {
    ($(($F:ident, $V:ident, $idx:tt)),+) => {
        impl<State, $($F, $V),+> SelectorInputs<State> for ($($F,)+)
        where
            $($F: Fn(&State) -> $V, $V: StableEq),+
        {
            type Values = ($($V,)+);

            fn evaluate(&self, state: &State) -> Self::Values {
                ($((self.$idx)(state),)+)
            }
        }
    };
}

impl_selector_inputs!((F1, V1, 0));
impl_selector_inputs!((F1, V1, 0), (F2, V2, 1));
impl_selector_inputs!((F1, V1, 0), (F2, V2, 1), (F3, V3, 2));
impl_selector_inputs!((F1, V1, 0), (F2, V2, 1), (F3, V3, 2), (F4, V4, 3));

impl<State, F, V> SelectorInputs<State> for Vec<F>
where
    F: Fn(&State) -> V,
    V: StableEq,
{
    type Values = Vec<V>;

    fn evaluate(&self, state: &State) -> Self::Values {
        self.iter().map(|input| input(state)).collect()
    }
}

/// A memoized selector: evaluates its inputs against the state, compares
/// them element-wise against the previous call, and recomputes the combiner
/// only when an input changed. Pure aside from the one-slot cache; a
/// selector built for one store sees a cache miss on first use against a
/// structurally different one.
pub struct Selector<State, I, C, Output>
where
    I: SelectorInputs<State>,
{
    inputs: I,
    combiner: C,
    cache: Mutex<Option<(I::Values, Output)>>,
    _state: PhantomData<fn(&State)>,
}

pub fn create_selector<State, I, C, Output>(inputs: I, combiner: C) -> Selector<State, I, C, Output>
where
    I: SelectorInputs<State>,
    C: Fn(&I::Values) -> Output,
    Output: Clone,
{
    Selector {
        inputs,
        combiner,
        cache: Mutex::new(None),
        _state: PhantomData,
    }
}

impl<State, I, C, Output> Selector<State, I, C, Output>
where
    I: SelectorInputs<State>,
    C: Fn(&I::Values) -> Output,
    Output: Clone,
{
    pub fn select(&self, state: &State) -> Output {
        let values = self.inputs.evaluate(state);
        let mut cache = self.cache_slot();
        if let Some((last, output)) = cache.as_ref() {
            if values.stable_eq(last) {
                return output.clone();
            }
        }
        let output = (self.combiner)(&values);
        *cache = Some((values, output.clone()));
        output
    }

    fn cache_slot(&self) -> MutexGuard<'_, Option<(I::Values, Output)>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

type FieldsInput = fn(&FormState) -> Arc<FieldMap>;

fn fields_of(state: &FormState) -> Arc<FieldMap> {
    state.fields.clone()
}

fn any_invalid(values: &(Arc<FieldMap>,)) -> bool {
    values.0.values().any(|field| field.error)
}

/// "Is any field invalid", recomputed only when the fields map itself was
/// replaced by a dispatch.
pub fn select_any_invalid() -> Selector<FormState, (FieldsInput,), fn(&(Arc<FieldMap>,)) -> bool, bool>
{
    create_selector(
        (fields_of as FieldsInput,),
        any_invalid as fn(&(Arc<FieldMap>,)) -> bool,
    )
}

/// The joined values of a dependency set of fields, `None` when it comes up
/// empty. Inputs are the per-key field entries, so dispatches to unrelated
/// fields hit the cache.
pub fn make_select_fields(
    keys: impl IntoIterator<Item = impl Into<String>>,
) -> Selector<
    FormState,
    Vec<impl Fn(&FormState) -> Option<Arc<Field>>>,
    impl Fn(&Vec<Option<Arc<Field>>>) -> Option<String>,
    Option<String>,
> {
    let inputs: Vec<_> = keys
        .into_iter()
        .map(|key| {
            let key: String = key.into();
            move |state: &FormState| state.fields.get(&key).cloned()
        })
        .collect();

    create_selector(inputs, |values: &Vec<Option<Arc<Field>>>| {
        let selected = values
            .iter()
            .flatten()
            .map(|field| field.value.to_display())
            .collect::<Vec<_>>()
            .join(", ");
        if selected.is_empty() { None } else { Some(selected) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[allow(dead_code)]
    #[derive(Clone)]
    struct Plain {
        shared: Arc<Vec<u32>>,
        flag: bool,
    }

    #[test]
    fn unchanged_inputs_return_the_cached_output() {
        let computed = Arc::new(AtomicUsize::new(0));
        let counter = computed.clone();
        let selector = create_selector(
            (|state: &Plain| state.shared.clone(),),
            move |(shared,): &(Arc<Vec<u32>>,)| {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(shared.iter().sum::<u32>())
            },
        );

        let state = Plain {
            shared: Arc::new(vec![1, 2, 3]),
            flag: false,
        };
        let first = selector.select(&state);
        let second = selector.select(&state);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(computed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn changed_inputs_recompute() {
        let selector = create_selector(
            (|state: &Plain| state.shared.clone(),),
            |(shared,): &(Arc<Vec<u32>>,)| shared.len(),
        );

        let mut state = Plain {
            shared: Arc::new(vec![1]),
            flag: false,
        };
        assert_eq!(selector.select(&state), 1);
        state.shared = Arc::new(vec![1, 2]);
        assert_eq!(selector.select(&state), 2);
    }

    #[test]
    fn inputs_outside_the_declared_set_do_not_recompute() {
        let computed = Arc::new(AtomicUsize::new(0));
        let counter = computed.clone();
        let selector = create_selector(
            (|state: &Plain| state.shared.clone(),),
            move |_: &(Arc<Vec<u32>>,)| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        let mut state = Plain {
            shared: Arc::new(vec![1]),
            flag: false,
        };
        selector.select(&state);
        state.flag = true;
        selector.select(&state);
        assert_eq!(computed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn vec_inputs_compare_element_wise() {
        fn shared_of(state: &Plain) -> Arc<Vec<u32>> {
            state.shared.clone()
        }

        let selector = create_selector(
            vec![shared_of as fn(&Plain) -> Arc<Vec<u32>>, shared_of],
            |values: &Vec<Arc<Vec<u32>>>| values.len(),
        );
        let state = Plain {
            shared: Arc::new(vec![]),
            flag: false,
        };
        assert_eq!(selector.select(&state), 2);
    }
}
