//! Path-indexed listener lookup
//!
//! Listeners register under a path of up to three id segments, any of which
//! may be a wildcard. Dispatch walks the tree once per event instead of
//! scanning every registered listener. Nodes live in an arena and are
//! pruned as soon as they hold neither listeners nor children.

use crate::listeners::ListenerId;
use crate::value::Id;
use indexmap::IndexSet;
use std::collections::BTreeMap;

/// Registration key for one path segment; `None` is the wildcard
pub(crate) type PathKey = Option<Id>;

/// One segment of a dispatched path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathSegment<'a> {
    /// A concrete id: visits listeners registered for it and for the wildcard
    Id(&'a str),
    /// Every id: visits all listeners at this depth
    All,
    /// No id: visits only wildcard listeners
    Missing,
}

impl<'a> From<&'a str> for PathSegment<'a> {
    fn from(id: &'a str) -> Self {
        PathSegment::Id(id)
    }
}

impl<'a> From<Option<&'a str>> for PathSegment<'a> {
    fn from(id: Option<&'a str>) -> Self {
        id.map_or(PathSegment::Missing, PathSegment::Id)
    }
}

type NodeIndex = usize;

#[derive(Debug, Default)]
struct Node {
    parent: Option<(NodeIndex, PathKey)>,
    children: BTreeMap<PathKey, NodeIndex>,
    listeners: IndexSet<ListenerId>,
}

#[derive(Debug)]
pub(crate) struct PathIndex {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeIndex>,
    len: usize,
}

const ROOT: NodeIndex = 0;

impl Default for PathIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PathIndex {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![Some(Node::default())],
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of registered listeners
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    fn node_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_some()).count()
    }

    fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, index: NodeIndex) -> Option<&mut Node> {
        self.nodes.get_mut(index).and_then(Option::as_mut)
    }

    fn alloc(&mut self, node: Node) -> NodeIndex {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                index
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    pub(crate) fn insert(&mut self, path: &[PathKey], id: ListenerId) {
        let mut current = ROOT;
        for key in path {
            let existing = self
                .node(current)
                .and_then(|node| node.children.get(key).copied());
            current = match existing {
                Some(child) => child,
                None => {
                    let child = self.alloc(Node {
                        parent: Some((current, key.clone())),
                        ..Node::default()
                    });
                    if let Some(node) = self.node_mut(current) {
                        node.children.insert(key.clone(), child);
                    }
                    child
                }
            };
        }
        if let Some(node) = self.node_mut(current) {
            if node.listeners.insert(id) {
                self.len += 1;
            }
        }
    }

    pub(crate) fn remove(&mut self, path: &[PathKey], id: ListenerId) -> bool {
        let mut current = ROOT;
        for key in path {
            match self.node(current).and_then(|node| node.children.get(key)) {
                Some(child) => current = *child,
                None => return false,
            }
        }
        let removed = self
            .node_mut(current)
            .is_some_and(|node| node.listeners.shift_remove(&id));
        if removed {
            self.len -= 1;
            self.prune(current);
        }
        removed
    }

    fn prune(&mut self, mut index: NodeIndex) {
        while index != ROOT {
            let parent = match self.node(index) {
                Some(node) if node.listeners.is_empty() && node.children.is_empty() => {
                    node.parent.clone()
                }
                _ => return,
            };
            self.nodes[index] = None;
            self.free.push(index);
            match parent {
                Some((parent, key)) => {
                    if let Some(node) = self.node_mut(parent) {
                        node.children.remove(&key);
                    }
                    index = parent;
                }
                None => return,
            }
        }
    }

    /// Listener ids matching a dispatched path, in registration order per node
    pub(crate) fn matching(&self, path: &[PathSegment<'_>]) -> Vec<ListenerId> {
        let mut found = Vec::new();
        if !self.is_empty() {
            self.collect(ROOT, path, &mut found);
        }
        found
    }

    fn collect(&self, index: NodeIndex, path: &[PathSegment<'_>], found: &mut Vec<ListenerId>) {
        let Some(node) = self.node(index) else {
            return;
        };
        let Some((segment, rest)) = path.split_first() else {
            found.extend(node.listeners.iter().copied());
            return;
        };
        match segment {
            PathSegment::Id(id) => {
                if let Some(child) = node.children.get(&Some((*id).to_string())) {
                    self.collect(*child, rest, found);
                }
                if let Some(child) = node.children.get(&None) {
                    self.collect(*child, rest, found);
                }
            }
            PathSegment::All => {
                for child in node.children.values() {
                    self.collect(*child, rest, found);
                }
            }
            PathSegment::Missing => {
                if let Some(child) = node.children.get(&None) {
                    self.collect(*child, rest, found);
                }
            }
        }
    }
}
