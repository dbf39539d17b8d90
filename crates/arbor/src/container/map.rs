use std::fmt;
use std::sync::Arc;

use super::key_chain::{KeyChainFilter, MapOptions, join};
use super::Container;
use crate::error::{Error, Result};
use crate::value::Value;

type LeafFn<'f> = dyn FnMut(&Value, &str) -> Result<Value> + 'f;
type MultiLeafFn<'f> = dyn FnMut(&[Value], &str) -> Result<Value> + 'f;

/// Where [`Container::restructure`] moves a key-chain.
#[derive(Clone)]
pub enum Restructure {
    To(String),
    /// Move and transform the moved value.
    With {
        key_chain: String,
        transform: Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>,
    },
}

impl Restructure {
    pub fn with<F>(key_chain: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Restructure::With {
            key_chain: key_chain.into(),
            transform: Arc::new(transform),
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Restructure::To(key_chain) | Restructure::With { key_chain, .. } => key_chain,
        }
    }

    fn apply(&self, value: Value) -> Result<Value> {
        match self {
            Restructure::To(_) => Ok(value),
            Restructure::With { transform, .. } => transform(&value),
        }
    }
}

impl fmt::Debug for Restructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Restructure::To(key_chain) => f.debug_tuple("To").field(key_chain).finish(),
            Restructure::With { key_chain, .. } => f.debug_struct("With").field("key_chain", key_chain).finish_non_exhaustive(),
        }
    }
}

impl From<&str> for Restructure {
    fn from(key_chain: &str) -> Self {
        Restructure::To(key_chain.to_string())
    }
}

impl From<String> for Restructure {
    fn from(key_chain: String) -> Self {
        Restructure::To(key_chain)
    }
}

// One input's position during a lock-step walk
#[derive(Clone, Copy)]
enum Node<'a> {
    Tree(&'a Container),
    Broadcast(&'a Value),
    Missing,
}

impl<'a> Node<'a> {
    fn child(self, key: &str) -> Node<'a> {
        match self {
            Node::Tree(tree) => match tree.get(key) {
                Some(Value::Container(sub)) => Node::Tree(sub),
                Some(leaf) => Node::Broadcast(leaf),
                None => Node::Missing,
            },
            other => other,
        }
    }
}

impl Container {
    /// Apply `f` to the leaves selected by `opts`, returning a new container.
    ///
    /// Without pruning the result has exactly the key-chains of `self`.
    /// Leaves are visited depth first in key order, and `f` receives each
    /// leaf with its key-chain.
    pub fn map<F>(&self, mut f: F, opts: &MapOptions) -> Result<Container>
    where
        F: FnMut(&Value, &str) -> Result<Value>,
    {
        self.map_tree(&mut f, opts, "")
    }

    fn map_tree(&self, f: &mut LeafFn<'_>, opts: &MapOptions, prefix: &str) -> Result<Container> {
        let mut out = Container::default();
        for (key, value) in &self.entries {
            if let Some(mapped) = map_node(value, &join(prefix, key), f, opts)? {
                out.entries.insert(key.clone(), mapped);
            }
        }
        Ok(out)
    }

    /// Walk the containers among `inputs` in lock-step and call `f` with the
    /// leaves found at each key-chain, in input order.
    ///
    /// The first container in `inputs` decides which key-chains are visited.
    /// Inputs that are not containers are passed whole at every key-chain.
    /// A selected key-chain missing from another container fails with
    /// [`Error::KeyChainNotFound`].
    pub fn multi_map<F>(inputs: &[Value], mut f: F, opts: &MapOptions) -> Result<Container>
    where
        F: FnMut(&[Value], &str) -> Result<Value>,
    {
        let lead = inputs
            .iter()
            .position(|input| matches!(input, Value::Container(_)))
            .ok_or_else(|| Error::invalid("multi_map needs at least one container input"))?;
        let nodes: Vec<Node<'_>> = inputs
            .iter()
            .map(|input| match input {
                Value::Container(tree) => Node::Tree(tree),
                other => Node::Broadcast(other),
            })
            .collect();
        multi_map_tree(&nodes, lead, &mut f, opts, "")
    }

    /// Keep only the listed key-chains, or with `to_apply == false` drop them.
    ///
    /// Subtrees left empty are removed.
    pub fn prune_key_chains<I, S>(&self, key_chains: I, to_apply: bool) -> Container
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filter = KeyChainFilter::new(key_chains);
        self.retain(&|key_chain| filter.matches(key_chain) == to_apply, "")
    }

    fn retain(&self, keep: &dyn Fn(&str) -> bool, prefix: &str) -> Container {
        let mut out = Container::default();
        for (key, value) in &self.entries {
            let key_chain = join(prefix, key);
            match value {
                Value::Container(child) if !child.is_empty() => {
                    let kept = child.retain(keep, &key_chain);
                    if !kept.is_empty() {
                        out.entries.insert(key.clone(), Value::Container(kept));
                    }
                }
                other if keep(&key_chain) => {
                    out.entries.insert(key.clone(), other.clone());
                }
                _ => {}
            }
        }
        out
    }

    /// Move key-chains to new positions.
    ///
    /// With `keep_orig` every unmoved node stays where it is; otherwise only
    /// the moved nodes appear in the result. Without `replace`, moving onto
    /// an existing key-chain fails with [`Error::KeyChainConflict`], as does a
    /// source lying inside another source.
    pub fn restructure<I, K, R>(&self, mapping: I, keep_orig: bool, replace: bool) -> Result<Container>
    where
        I: IntoIterator<Item = (K, R)>,
        K: AsRef<str>,
        R: Into<Restructure>,
    {
        let mut moves: Vec<(String, Restructure, Value)> = Vec::new();
        for (source, target) in mapping {
            let source = source.as_ref();
            moves.push((source.to_string(), target.into(), self.at_key_chain(source)?.clone()));
        }
        for (source, _, _) in &moves {
            let nested = moves
                .iter()
                .any(|(outer, _, _)| source.strip_prefix(outer.as_str()).is_some_and(|rest| rest.starts_with('/')));
            if nested {
                return Err(Error::KeyChainConflict(source.clone()));
            }
        }

        let mut out = if keep_orig { self.clone() } else { Container::default() };
        if keep_orig {
            for (source, _, _) in &moves {
                if out.has_key_chain(source) {
                    out.remove_key_chain_mut(source)?;
                }
            }
        }

        for (source, target, value) in moves {
            let key_chain = target.target();
            if !replace && out.has_key_chain(key_chain) {
                return Err(Error::KeyChainConflict(key_chain.to_string()));
            }
            tracing::trace!(from = %source, to = key_chain, "restructure");
            let value = target.apply(value)?;
            out.set_at_key_chain_mut(key_chain, value)?;
        }
        Ok(out)
    }
}

fn map_node(value: &Value, key_chain: &str, f: &mut LeafFn<'_>, opts: &MapOptions) -> Result<Option<Value>> {
    match value {
        Value::Container(child) => {
            let mapped = child.map_tree(f, opts, key_chain)?;
            if opts.prune_unapplied && mapped.is_empty() && !child.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Value::Container(mapped)))
            }
        }
        Value::List(items) if opts.map_sequences => {
            Ok(map_sequence(items, key_chain, f, opts)?.map(Value::List))
        }
        Value::Tuple(items) if opts.map_sequences => {
            Ok(map_sequence(items, key_chain, f, opts)?.map(Value::Tuple))
        }
        leaf if opts.applies(key_chain) => Ok(Some(f(leaf, key_chain)?)),
        _ if opts.prune_unapplied => Ok(None),
        leaf => Ok(Some(leaf.clone())),
    }
}

// Pruned elements are dropped, so later indices shift down
fn map_sequence(items: &[Value], key_chain: &str, f: &mut LeafFn<'_>, opts: &MapOptions) -> Result<Option<Vec<Value>>> {
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if let Some(mapped) = map_node(item, &join(key_chain, &i.to_string()), f, opts)? {
            out.push(mapped);
        }
    }
    if opts.prune_unapplied && out.is_empty() && !items.is_empty() {
        Ok(None)
    } else {
        Ok(Some(out))
    }
}

fn multi_map_tree(
    nodes: &[Node<'_>],
    lead: usize,
    f: &mut MultiLeafFn<'_>,
    opts: &MapOptions,
    prefix: &str,
) -> Result<Container> {
    let Node::Tree(leader) = nodes[lead] else {
        return Err(Error::StructureMismatch(format!("no container at `{prefix}`")));
    };
    let mut out = Container::default();
    for (key, value) in &leader.entries {
        let key_chain = join(prefix, key);
        let children: Vec<Node<'_>> = nodes.iter().map(|node| node.child(key)).collect();
        match value {
            Value::Container(child) => {
                let mapped = multi_map_tree(&children, lead, f, opts, &key_chain)?;
                if opts.prune_unapplied && mapped.is_empty() && !child.is_empty() {
                    continue;
                }
                out.entries.insert(key.clone(), Value::Container(mapped));
            }
            _ if opts.applies(&key_chain) => {
                let leaves = children
                    .iter()
                    .map(|node| match node {
                        Node::Broadcast(v) => Ok((*v).clone()),
                        Node::Missing => Err(Error::KeyChainNotFound(key_chain.clone())),
                        Node::Tree(_) => Err(Error::StructureMismatch(format!(
                            "`{key_chain}` is a leaf in one container and a subtree in another"
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                out.entries.insert(key.clone(), f(&leaves, &key_chain)?);
            }
            _ if opts.prune_unapplied => {}
            leaf => {
                out.entries.insert(key.clone(), leaf.clone());
            }
        }
    }
    Ok(out)
}
