//! Conversions between native arrays and wrappers.
//!
//! Both directions are idempotent, leave anything that is not an array
//! untouched and, when `nested`, rebuild lists, tuples and dicts around the
//! converted leaves. Records are only descended into with `include_derived`.
//! Containers always convert through their own leaves.

use crate::array::{Array, Variable};
use crate::backend::{BackendHandle, backend_of};
use crate::context::{self, Context};
use crate::value::{Kwargs, Value};

enum Frame {
    Visit(Value),
    List(usize),
    Tuple(usize),
    Dict(Vec<String>),
    Record(String, Vec<String>),
}

/// Apply `f` to every leaf of `x`, rebuilding sequences and mappings around
/// the results.
///
/// The walk uses an explicit work stack, so arbitrarily deep nesting does not
/// grow the call stack.
pub fn nested_map(x: Value, include_derived: bool, f: &mut dyn FnMut(Value) -> Value) -> Value {
    let mut work = vec![Frame::Visit(x)];
    let mut done: Vec<Value> = Vec::new();

    while let Some(frame) = work.pop() {
        match frame {
            Frame::Visit(Value::List(items)) => {
                work.push(Frame::List(items.len()));
                work.extend(items.into_iter().rev().map(Frame::Visit));
            }
            Frame::Visit(Value::Tuple(items)) => {
                work.push(Frame::Tuple(items.len()));
                work.extend(items.into_iter().rev().map(Frame::Visit));
            }
            Frame::Visit(Value::Dict(map)) => {
                let keys = map.keys().cloned().collect();
                work.push(Frame::Dict(keys));
                work.extend(map.into_values().rev().map(Frame::Visit));
            }
            Frame::Visit(Value::Record(record)) if include_derived => {
                let keys = record.fields.keys().cloned().collect();
                work.push(Frame::Record(record.name, keys));
                work.extend(record.fields.into_values().rev().map(Frame::Visit));
            }
            Frame::Visit(leaf) => done.push(f(leaf)),
            Frame::List(n) => {
                let items = done.split_off(done.len() - n);
                done.push(Value::List(items));
            }
            Frame::Tuple(n) => {
                let items = done.split_off(done.len() - n);
                done.push(Value::Tuple(items));
            }
            Frame::Dict(keys) => {
                let values = done.split_off(done.len() - keys.len());
                done.push(Value::Dict(keys.into_iter().zip(values).collect()));
            }
            Frame::Record(name, keys) => {
                let values = done.split_off(done.len() - keys.len());
                done.push(Value::Record(crate::value::Record {
                    name,
                    fields: keys.into_iter().zip(values).collect(),
                }));
            }
        }
    }
    done.pop().unwrap_or_default()
}

fn leaf_to_native(x: Value) -> Value {
    match x {
        Value::Array(a) => Value::Native(a.into_native()),
        Value::Variable(v) => Value::Native(v.into_native()),
        Value::Container(c) => Value::Container(c.to_native()),
        other => other,
    }
}

/// Replace wrappers with the native arrays they hold.
pub fn to_native(x: Value, nested: bool, include_derived: bool) -> Value {
    if nested {
        nested_map(x, include_derived, &mut leaf_to_native)
    } else {
        leaf_to_native(x)
    }
}

/// Wraps native arrays of known backends.
pub(crate) struct Wrapping<'a> {
    fallback: Option<&'a BackendHandle>,
    include_derived: bool,
    wrapped_any: bool,
}

impl<'a> Wrapping<'a> {
    pub(crate) fn new(fallback: Option<&'a BackendHandle>, include_derived: bool) -> Self {
        Self {
            fallback,
            include_derived,
            wrapped_any: false,
        }
    }

    pub(crate) fn wrapped_any(&self) -> bool {
        self.wrapped_any
    }

    pub(crate) fn convert(&mut self, x: Value, nested: bool) -> Value {
        if nested {
            let include_derived = self.include_derived;
            nested_map(x, include_derived, &mut |leaf| self.leaf(leaf))
        } else {
            self.leaf(x)
        }
    }

    fn leaf(&mut self, x: Value) -> Value {
        match x {
            Value::Native(n) => {
                let owner = backend_of(&n).or_else(|| self.fallback.cloned());
                match owner {
                    Some(backend) if backend.is_native(&n) => {
                        self.wrapped_any = true;
                        let array = Array::from_backend(n, &backend);
                        if backend.is_variable(array.data(), true) {
                            Value::Variable(Variable::from_array(array))
                        } else {
                            Value::Array(array)
                        }
                    }
                    _ => Value::Native(n),
                }
            }
            Value::Container(c) => Value::Container(c.map_values(&mut |v| self.convert(v, true))),
            other => other,
        }
    }
}

/// Wrap native arrays of known backends; wrappers and everything else pass through.
///
/// Wrapping anything turns wrapped mode on for the current context, unless
/// implicit enabling is switched off.
pub fn to_wrapper(x: Value, nested: bool, include_derived: bool) -> Value {
    let fallback = crate::backend::current_backend();
    let mut wrapping = Wrapping::new(fallback.as_ref(), include_derived);
    let out = wrapping.convert(x, nested);
    if wrapping.wrapped_any() {
        context::note_wrapper_constructed();
    }
    out
}

/// [`to_wrapper`] resolved against `ctx`, without touching ambient state.
pub(crate) fn to_wrapper_in(ctx: &Context, x: Value, nested: bool) -> Value {
    Wrapping::new(ctx.current_backend(), false).convert(x, nested)
}

/// Convert every positional and keyword argument, at every nesting level, to native.
pub fn args_to_native(args: Vec<Value>, kwargs: Kwargs, include_derived: bool) -> (Vec<Value>, Kwargs) {
    let args = args.into_iter().map(|a| to_native(a, true, include_derived)).collect();
    let kwargs = kwargs
        .into_iter()
        .map(|(k, v)| (k, to_native(v, true, include_derived)))
        .collect();
    (args, kwargs)
}

/// Convert every positional and keyword argument, at every nesting level, to wrappers.
pub fn args_to_wrapper(args: Vec<Value>, kwargs: Kwargs, include_derived: bool) -> (Vec<Value>, Kwargs) {
    let args = args.into_iter().map(|a| to_wrapper(a, true, include_derived)).collect();
    let kwargs = kwargs
        .into_iter()
        .map(|(k, v)| (k, to_wrapper(v, true, include_derived)))
        .collect();
    (args, kwargs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::{NdVariable, ndarray_from};
    use crate::context::{enter, wrapped_mode};
    use crate::value::{NativeArray, Record};
    use ndarray::{ArrayD, IxDyn};

    fn nd(data: &[f64]) -> Value {
        Value::Native(ndarray_from(data, &[data.len()]))
    }

    #[test]
    fn test_to_wrapper_top_level_only() {
        enter(Context::new(), || {
            let wrapped = to_wrapper(nd(&[1.0]), false, false);
            assert!(matches!(wrapped, Value::Array(_)));

            let list = Value::List(vec![nd(&[1.0])]);
            let untouched = to_wrapper(list.clone(), false, false);
            assert!(matches!(&untouched, Value::List(items) if matches!(items[0], Value::Native(_))));
        });
    }

    #[test]
    fn test_nested_round_trip() {
        enter(Context::new(), || {
            let x = Value::List(vec![
                nd(&[1.0, 2.0]),
                Value::Tuple(vec![Value::Int(3), nd(&[4.0])]),
                Value::Dict([("k".to_string(), nd(&[5.0]))].into_iter().collect()),
            ]);
            let wrapped = to_wrapper(x.clone(), true, false);
            match &wrapped {
                Value::List(items) => {
                    assert!(matches!(items[0], Value::Array(_)));
                    assert!(matches!(&items[1], Value::Tuple(t) if t[0] == Value::Int(3) && matches!(t[1], Value::Array(_))));
                    assert!(matches!(&items[2], Value::Dict(d) if matches!(d["k"], Value::Array(_))));
                }
                other => panic!("unexpected {other:?}"),
            }
            assert_eq!(to_native(wrapped, true, false), x);
        });
    }

    #[test]
    fn test_idempotent() {
        enter(Context::new(), || {
            let x = Value::List(vec![nd(&[1.0]), Value::from("s")]);
            let once = to_wrapper(x.clone(), true, false);
            let twice = to_wrapper(once.clone(), true, false);
            assert_eq!(once, twice);
            assert!(matches!(&twice, Value::List(items) if matches!(items[0], Value::Array(_))));

            let native = to_native(x.clone(), true, false);
            assert_eq!(to_native(native.clone(), true, false), native);
        });
    }

    #[test]
    fn test_records_need_include_derived() {
        enter(Context::new(), || {
            let record = Value::Record(Record::new("Pair").field("a", nd(&[1.0])));
            let skipped = to_wrapper(record.clone(), true, false);
            assert_eq!(skipped, record);

            let visited = to_wrapper(record, true, true);
            assert!(matches!(&visited, Value::Record(r) if matches!(r.fields["a"], Value::Array(_))));
        });
    }

    #[test]
    fn test_exclusive_variables_become_variable_wrappers() {
        enter(Context::new(), || {
            let data = ArrayD::from_shape_vec(IxDyn(&[1]), vec![1.0]).unwrap();
            let var = Value::Native(NativeArray::new(NdVariable::new(data)));
            assert!(matches!(to_wrapper(var, false, false), Value::Variable(_)));
        });
    }

    #[test]
    fn test_wrapping_enables_wrapped_mode() {
        enter(Context::new(), || {
            to_wrapper(Value::Int(1), true, false);
            assert!(!wrapped_mode());
            to_wrapper(nd(&[1.0]), true, false);
            assert!(wrapped_mode());
        });
    }

    #[test]
    fn test_args_conversion() {
        enter(Context::new(), || {
            let mut kwargs = Kwargs::new();
            kwargs.insert("y".into(), Value::List(vec![nd(&[2.0])]));
            let (args, kwargs) = args_to_wrapper(vec![nd(&[1.0])], kwargs, false);
            assert!(matches!(args[0], Value::Array(_)));
            assert!(matches!(&kwargs["y"], Value::List(l) if matches!(l[0], Value::Array(_))));

            let (args, kwargs) = args_to_native(args, kwargs, false);
            assert!(matches!(args[0], Value::Native(_)));
            assert!(matches!(&kwargs["y"], Value::List(l) if matches!(l[0], Value::Native(_))));
        });
    }

    #[test]
    fn test_deep_nesting_does_not_overflow() {
        let mut x = nd(&[1.0]);
        for _ in 0..100_000 {
            x = Value::List(vec![x]);
        }
        let mut leaves = 0;
        let out = nested_map(x, false, &mut |leaf| {
            leaves += 1;
            leaf
        });
        assert_eq!(leaves, 1);
        // unwind iteratively; dropping deep trees recursively would overflow
        let mut cursor = out;
        while let Value::List(mut items) = cursor {
            cursor = items.pop().unwrap_or_default();
        }
        assert!(matches!(cursor, Value::Native(_)));
    }
}
