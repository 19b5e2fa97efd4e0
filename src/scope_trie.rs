//! Prefix tree over `/`-separated scope paths.
//!
//! Nodes live in an arena and refer to each other by index. Every trie node
//! remembers which entries (by index into the caller's slice) were inserted
//! through it, so that compression can rewrite their scopes in place.
use crate::node::{SCOPE_AGGREGATOR, SCOPE_SEPARATOR};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrieNodeId(pub(crate) usize);

const ROOT: TrieNodeId = TrieNodeId(0);

#[derive(Debug, Clone)]
pub struct TrieNode {
    pub key: String,
    pub children: Vec<TrieNodeId>,
    pub refs: Vec<usize>,
}

/// Something whose scope and parent strings are rewritten when the trie is compressed.
pub trait Scoped {
    fn scope_mut(&mut self) -> &mut String;
    fn parent_mut(&mut self) -> &mut String;
}

#[derive(Debug, Clone)]
pub struct ScopeTrie {
    nodes: Vec<TrieNode>,
}

impl Default for ScopeTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTrie {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode {
                key: String::new(),
                children: vec![],
                refs: vec![],
            }],
        }
    }

    pub fn root(&self) -> TrieNodeId {
        ROOT
    }

    pub fn get(&self, id: TrieNodeId) -> &TrieNode {
        &self.nodes[id.0]
    }

    /// Walks `path` from the root, creating missing nodes so that siblings
    /// stay sorted by key. Empty segments are skipped.
    pub fn insert(&mut self, entry: usize, path: &str) {
        let mut current = ROOT;
        for segment in path.split(SCOPE_SEPARATOR).filter(|s| !s.is_empty()) {
            let existing = self.nodes[current.0]
                .children
                .iter()
                .copied()
                .find(|child| self.nodes[child.0].key == segment);
            current = match existing {
                Some(child) => {
                    self.nodes[child.0].refs.push(entry);
                    child
                }
                None => {
                    let position = self.nodes[current.0]
                        .children
                        .iter()
                        .filter(|child| self.nodes[child.0].key.as_str() < segment)
                        .count();
                    let child = TrieNodeId(self.nodes.len());
                    self.nodes.push(TrieNode {
                        key: segment.to_string(),
                        children: vec![],
                        refs: vec![entry],
                    });
                    self.nodes[current.0].children.insert(position, child);
                    child
                }
            };
        }
    }

    fn post_order(&self) -> Vec<TrieNodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(ROOT, false)];
        while let Some((id, children_done)) = stack.pop() {
            if children_done {
                order.push(id);
                continue;
            }
            stack.push((id, true));
            for child in self.nodes[id.0].children.iter().rev() {
                stack.push((*child, false));
            }
        }
        order
    }

    /// Collapses single-child chains. A node with exactly one child that has
    /// children of its own absorbs that child as `key+childKey`; every entry
    /// inserted through the node gets the first `key/childKey` in its scope
    /// and parent replaced accordingly. Returns the number of merges.
    ///
    /// The root may collapse into its only child; that counts as a merge but
    /// rewrites nothing.
    pub fn compress<T: Scoped>(&mut self, entries: &mut [T]) -> usize {
        let mut merges = 0;
        for start in self.post_order() {
            let mut queue = VecDeque::from([start]);
            while let Some(top) = queue.pop_front() {
                let children = &self.nodes[top.0].children;
                if children.len() == 1 && !self.nodes[children[0].0].children.is_empty() {
                    let child = children[0];
                    let child_key = self.nodes[child.0].key.clone();
                    let grandchildren = self.nodes[child.0].children.clone();
                    let node = &mut self.nodes[top.0];
                    if top != ROOT {
                        let from = format!("{}{SCOPE_SEPARATOR}{child_key}", node.key);
                        let to = format!("{}{SCOPE_AGGREGATOR}{child_key}", node.key);
                        for entry in &node.refs {
                            if let Some(entry) = entries.get_mut(*entry) {
                                replace_first(entry.scope_mut(), &from, &to);
                                replace_first(entry.parent_mut(), &from, &to);
                            }
                        }
                        node.key = to;
                    }
                    node.children = grandchildren;
                    merges += 1;
                }
                queue.extend(self.nodes[top.0].children.iter().copied());
            }
        }
        merges
    }

    /// The first entry inserted through each node, for presenting the trie as a tree.
    pub fn first_ref(&self, id: TrieNodeId) -> Option<usize> {
        self.nodes[id.0].refs.first().copied()
    }
}

fn replace_first(target: &mut String, from: &str, to: &str) {
    if let Some(idx) = target.find(from) {
        target.replace_range(idx..idx + from.len(), to);
    }
}
