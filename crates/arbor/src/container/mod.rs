//! # Containers
//!
//! A [`Container`] is a tree of string-keyed nodes whose leaves are arbitrary
//! [`Value`]s. Nodes are addressed by key-chains (`"y/z"`), and whole-tree
//! transformations are expressed as maps over the leaves:
//!
//! - [`Container::map`] applies a function to selected leaves.
//! - [`Container::multi_map`] walks several containers in lock-step.
//! - [`Container::restructure`] moves subtrees to new key-chains.
//! - [`Container::prune_key_chains`] keeps or drops listed key-chains.
//!
//! Every transformation returns a new container; the input is never modified.
//! Equality ignores key order.
//!
//! Dict values are normalized into containers on the way in, so nested
//! mappings are always containers. Keys must be non-empty and must not
//! contain `/`.

mod key_chain;
mod map;

use std::fmt;

use indexmap::IndexMap;

use crate::backend::BackendHandle;
use crate::convert::{Wrapping, to_native};
use crate::dispatch::{Args, dispatch};
use crate::error::{Error, Result};
use crate::value::Value;

pub use key_chain::{KeyChainFilter, MapOptions, SEPARATOR, join, split};
pub use map::Restructure;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Container {
    entries: IndexMap<String, Value>,
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains(SEPARATOR) {
        return Err(Error::invalid(format!("container keys must be non-empty and free of `{SEPARATOR}`, got `{key}`")));
    }
    Ok(())
}

fn normalize(value: Value) -> Result<Value> {
    match value {
        Value::Dict(map) => Ok(Value::Container(Container::new(map)?)),
        other => Ok(other),
    }
}

impl Container {
    /// Build a container, turning nested dicts into containers.
    pub fn new(entries: IndexMap<String, Value>) -> Result<Self> {
        let mut container = Self::default();
        for (key, value) in entries {
            container.insert(key, value)?;
        }
        Ok(container)
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut container = Self::default();
        for (key, value) in pairs {
            container.insert(key, value)?;
        }
        Ok(container)
    }

    /// Build a container from a JSON object.
    ///
    /// Rectangular arrays of numbers become native arrays of `backend` when
    /// one is given, and lists otherwise.
    pub fn from_json(json: &serde_json::Value, backend: Option<&BackendHandle>) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => {
                let mut container = Self::default();
                for (key, value) in map {
                    container.insert(key.clone(), json_to_value(value, backend)?)?;
                }
                Ok(container)
            }
            other => Err(Error::invalid(format!("expected a JSON object, got {other}"))),
        }
    }

    /// Add or replace the entry under `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Option<Value>> {
        let key = key.into();
        check_key(&key)?;
        Ok(self.entries.insert(key, normalize(value.into())?))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The node at `key_chain`.
    pub fn at_key_chain(&self, key_chain: &str) -> Result<&Value> {
        let keys = split(key_chain);
        let Some((last, parents)) = keys.split_last() else {
            return Err(Error::KeyChainNotFound(key_chain.to_string()));
        };
        let mut node = self;
        for key in parents {
            node = match node.entries.get(*key) {
                Some(Value::Container(child)) => child,
                _ => return Err(Error::KeyChainNotFound(key_chain.to_string())),
            };
        }
        node.entries
            .get(*last)
            .ok_or_else(|| Error::KeyChainNotFound(key_chain.to_string()))
    }

    pub fn has_key_chain(&self, key_chain: &str) -> bool {
        self.at_key_chain(key_chain).is_ok()
    }

    /// A copy with `value` stored at `key_chain`, creating intermediate nodes.
    pub fn set_at_key_chain(&self, key_chain: &str, value: impl Into<Value>) -> Result<Container> {
        let mut out = self.clone();
        out.set_at_key_chain_mut(key_chain, value)?;
        Ok(out)
    }

    /// Store `value` at `key_chain`, creating intermediate nodes.
    ///
    /// Fails with [`Error::KeyChainConflict`] when a leaf sits where an
    /// intermediate node is needed.
    pub fn set_at_key_chain_mut(&mut self, key_chain: &str, value: impl Into<Value>) -> Result<()> {
        let keys = split(key_chain);
        let Some((last, parents)) = keys.split_last() else {
            return Err(Error::invalid("empty key-chain"));
        };
        let mut node = self;
        let mut walked = String::new();
        for key in parents {
            check_key(key)?;
            walked = join(&walked, key);
            let entry = node
                .entries
                .entry((*key).to_string())
                .or_insert_with(|| Value::Container(Container::default()));
            node = match entry {
                Value::Container(child) => child,
                _ => return Err(Error::KeyChainConflict(walked)),
            };
        }
        node.insert(*last, value)?;
        Ok(())
    }

    /// Replace the node at `key_chain`, which must already exist.
    pub fn overwrite_at_key_chain_mut(&mut self, key_chain: &str, value: impl Into<Value>) -> Result<Value> {
        let previous = self.at_key_chain(key_chain)?.clone();
        self.set_at_key_chain_mut(key_chain, value)?;
        Ok(previous)
    }

    /// A copy without `key_chain`; parents left empty are removed too.
    pub fn remove_key_chain(&self, key_chain: &str) -> Result<Container> {
        let mut out = self.clone();
        out.remove_key_chain_mut(key_chain)?;
        Ok(out)
    }

    /// Remove and return the node at `key_chain`; parents left empty are removed too.
    pub fn remove_key_chain_mut(&mut self, key_chain: &str) -> Result<Value> {
        let keys = split(key_chain);
        if keys.is_empty() {
            return Err(Error::KeyChainNotFound(key_chain.to_string()));
        }
        self.remove_path(&keys)
            .ok_or_else(|| Error::KeyChainNotFound(key_chain.to_string()))
    }

    fn remove_path(&mut self, keys: &[&str]) -> Option<Value> {
        match keys {
            [] => None,
            [key] => self.entries.shift_remove(*key),
            [key, rest @ ..] => {
                let Some(Value::Container(child)) = self.entries.get_mut(*key) else {
                    return None;
                };
                let removed = child.remove_path(rest)?;
                if child.is_empty() {
                    self.entries.shift_remove(*key);
                }
                Some(removed)
            }
        }
    }

    /// A container holding only the listed key-chains; each must exist.
    pub fn at_key_chains<S: AsRef<str>>(&self, key_chains: &[S]) -> Result<Container> {
        let mut out = Container::default();
        for key_chain in key_chains {
            let key_chain = key_chain.as_ref();
            out.set_at_key_chain_mut(key_chain, self.at_key_chain(key_chain)?.clone())?;
        }
        Ok(out)
    }

    /// Key-chains of every leaf, depth first in insertion order.
    pub fn all_key_chains(&self) -> Vec<String> {
        self.leaves().map(|(key_chain, _)| key_chain).collect()
    }

    /// Every leaf with its key-chain, depth first in insertion order.
    ///
    /// Empty sub-containers have no leaves.
    pub fn leaves(&self) -> impl Iterator<Item = (String, &Value)> {
        let mut out = Vec::new();
        self.collect_leaves("", &mut out);
        out.into_iter()
    }

    fn collect_leaves<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Value)>) {
        for (key, value) in &self.entries {
            let key_chain = join(prefix, key);
            match value {
                Value::Container(child) => child.collect_leaves(&key_chain, out),
                leaf => out.push((key_chain, leaf)),
            }
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves().count()
    }

    /// The same tree with each array leaf replaced by its shape and every other leaf by `None`.
    pub fn shapes(&self) -> Container {
        self.map_values(&mut |leaf| match leaf.as_native() {
            Some(native) => Value::from(native.shape()),
            None => Value::None,
        })
    }

    /// A single-level container keyed by each leaf's key-chain, joined with `separator`.
    pub fn flatten_key_chains(&self, separator: &str) -> Result<Container> {
        let mut out = Container::default();
        for (key_chain, leaf) in self.leaves() {
            out.insert(split(&key_chain).join(separator), leaf.clone())?;
        }
        Ok(out)
    }

    pub fn to_flat_list(&self) -> Vec<Value> {
        self.leaves().map(|(_, leaf)| leaf.clone()).collect()
    }

    /// A container shaped like `self` with leaves taken from `values` in order.
    pub fn from_flat_list(&self, values: Vec<Value>) -> Result<Container> {
        let expected = self.num_leaves();
        if values.len() != expected {
            return Err(Error::StructureMismatch(format!(
                "container has {expected} leaves but {} values were given",
                values.len()
            )));
        }
        let mut values = values.into_iter();
        Ok(self.map_values(&mut |_| values.next().unwrap_or_default()))
    }

    /// Whether all containers have the same nodes, ignoring key order and leaf values.
    pub fn identical_structure(containers: &[&Container]) -> bool {
        let Some((first, rest)) = containers.split_first() else {
            return true;
        };
        rest.iter().all(|other| first.same_structure(other))
    }

    fn same_structure(&self, other: &Container) -> bool {
        self.len() == other.len()
            && self.entries.iter().all(|(key, value)| match (value, other.entries.get(key)) {
                (Value::Container(a), Some(Value::Container(b))) => a.same_structure(b),
                (Value::Container(_), _) | (_, Some(Value::Container(_))) | (_, None) => false,
                _ => true,
            })
    }

    /// Rebuild the tree with `f` applied to every leaf; sub-containers are kept, even empty ones.
    pub(crate) fn map_values(&self, f: &mut dyn FnMut(Value) -> Value) -> Container {
        let entries = self
            .entries
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::Container(child) => Value::Container(child.map_values(f)),
                    leaf => f(leaf.clone()),
                };
                (key.clone(), value)
            })
            .collect();
        Container { entries }
    }

    /// Every leaf converted to native, at every nesting level.
    pub fn to_native(&self) -> Container {
        self.map_values(&mut |leaf| to_native(leaf, true, false))
    }

    /// Every leaf converted to a wrapper, at every nesting level.
    pub fn to_wrapper(&self) -> Container {
        let fallback = crate::backend::current_backend();
        let mut wrapping = Wrapping::new(fallback.as_ref(), false);
        let out = self.map_values(&mut |leaf| wrapping.convert(leaf, true));
        if wrapping.wrapped_any() {
            crate::context::note_wrapper_constructed();
        }
        out
    }

    /// Copy `result`'s leaves into `out`, when given, and return `result`.
    pub fn handle_inplace(result: Container, out: Option<&mut Container>) -> Result<Container> {
        if let Some(out) = out {
            for (key_chain, leaf) in result.leaves() {
                out.set_at_key_chain_mut(&key_chain, leaf.clone())?;
            }
        }
        Ok(result)
    }

    /// Dispatch `op` leaf-wise with `self` as the first argument.
    ///
    /// Container `others` are walked alongside `self`; anything else is
    /// passed to every call unchanged.
    pub fn apply_op(&self, op: &str, others: &[Value], opts: &MapOptions) -> Result<Container> {
        let mut inputs = Vec::with_capacity(others.len() + 1);
        inputs.push(Value::Container(self.clone()));
        inputs.extend(others.iter().cloned());
        Container::multi_map(
            &inputs,
            |leaves, _| {
                let args = leaves.iter().cloned().fold(Args::new(), |args, leaf| args.arg(leaf));
                dispatch(op, args)
            },
            opts,
        )
    }

    pub fn add(&self, other: impl Into<Value>) -> Result<Container> {
        self.apply_op("add", &[other.into()], &MapOptions::default())
    }

    pub fn subtract(&self, other: impl Into<Value>) -> Result<Container> {
        self.apply_op("subtract", &[other.into()], &MapOptions::default())
    }

    pub fn multiply(&self, other: impl Into<Value>) -> Result<Container> {
        self.apply_op("multiply", &[other.into()], &MapOptions::default())
    }

    pub fn divide(&self, other: impl Into<Value>) -> Result<Container> {
        self.apply_op("divide", &[other.into()], &MapOptions::default())
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("{}");
        }
        let pad = "    ".repeat(depth + 1);
        f.write_str("{\n")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            write!(f, "{pad}{key}: ")?;
            match value {
                Value::Container(child) => child.fmt_indented(f, depth + 1)?,
                leaf => write!(f, "{leaf}")?,
            }
            f.write_str(if i + 1 < self.entries.len() { ",\n" } else { "\n" })?;
        }
        write!(f, "{}}}", "    ".repeat(depth))
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

fn json_to_value(json: &serde_json::Value, backend: Option<&BackendHandle>) -> Result<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => match (backend, numeric_block(json)) {
            (Some(backend), Some((shape, data))) => {
                let native = backend
                    .from_f64(&data, &shape)
                    .map_err(|err| Error::backend("from_json", backend.name(), err, crate::context::trace_mode()))?;
                Value::Native(native)
            }
            _ => Value::List(
                items
                    .iter()
                    .map(|item| json_to_value(item, backend))
                    .collect::<Result<_>>()?,
            ),
        },
        serde_json::Value::Object(_) => Value::Container(Container::from_json(json, backend)?),
    })
}

// Shape and row-major data of a rectangular nest of JSON numbers
fn numeric_block(json: &serde_json::Value) -> Option<(Vec<usize>, Vec<f64>)> {
    match json {
        serde_json::Value::Number(n) => Some((Vec::new(), vec![n.as_f64()?])),
        serde_json::Value::Array(items) => {
            let mut inner: Option<Vec<usize>> = None;
            let mut data = Vec::new();
            for item in items {
                let (shape, values) = numeric_block(item)?;
                match &inner {
                    Some(expected) if *expected != shape => return None,
                    Some(_) => {}
                    None => inner = Some(shape),
                }
                data.extend(values);
            }
            let mut shape = vec![items.len()];
            shape.extend(inner.unwrap_or_default());
            Some((shape, data))
        }
        _ => None,
    }
}
