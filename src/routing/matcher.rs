//! Path prefix matching.
//!
//! # Responsibilities
//! - Store route prefixes in a segment-keyed trie
//! - Resolve a request path to the longest registered prefix
//!
//! # Design Decisions
//! - Matching is per path segment: `/api` matches `/api/x` but not `/apix`
//! - The walk records the deepest route node it passes, so the most specific
//!   prefix wins regardless of registration order
//! - Path matching is case-sensitive; empty segments are ignored

use std::collections::HashMap;

/// Split a path into its non-empty segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Canonical form of a route prefix: `/a/b`, or `/` for the root.
pub fn normalize_prefix(prefix: &str) -> String {
    let mut normalized = String::with_capacity(prefix.len() + 1);
    for segment in segments(prefix) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

#[derive(Debug)]
struct Node<T> {
    children: HashMap<String, Node<T>>,
    /// Set when a route ends at this node.
    value: Option<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            value: None,
        }
    }
}

/// A segment-keyed prefix trie.
#[derive(Debug)]
pub struct PrefixTrie<T> {
    root: Node<T>,
    len: usize,
}

impl<T> Default for PrefixTrie<T> {
    fn default() -> Self {
        Self {
            root: Node::default(),
            len: 0,
        }
    }
}

impl<T> PrefixTrie<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered prefixes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Register `value` under `prefix`, returning the value it replaced.
    pub fn insert(&mut self, prefix: &str, value: T) -> Option<T> {
        let mut node = &mut self.root;
        for segment in segments(prefix) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        let previous = node.value.replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Exact lookup of a registered prefix.
    pub fn get(&self, prefix: &str) -> Option<&T> {
        let mut node = &self.root;
        for segment in segments(prefix) {
            node = node.children.get(segment)?;
        }
        node.value.as_ref()
    }

    pub fn get_mut(&mut self, prefix: &str) -> Option<&mut T> {
        let mut node = &mut self.root;
        for segment in segments(prefix) {
            node = node.children.get_mut(segment)?;
        }
        node.value.as_mut()
    }

    /// Find the longest registered prefix of `path`.
    ///
    /// Returns the normalized matched prefix and its value.
    pub fn longest_match(&self, path: &str) -> Option<(String, &T)> {
        let mut node = &self.root;
        let mut depth = 0;
        let mut best = node.value.as_ref().map(|v| (0, v));

        for segment in segments(path) {
            match node.children.get(segment) {
                Some(next) => {
                    node = next;
                    depth += 1;
                    if let Some(value) = node.value.as_ref() {
                        best = Some((depth, value));
                    }
                }
                None => break,
            }
        }

        best.map(|(depth, value)| {
            let matched: Vec<&str> = segments(path).take(depth).collect();
            (format!("/{}", matched.join("/")), value)
        })
    }

    /// All registered prefixes with their values, sorted by prefix.
    pub fn entries(&self) -> Vec<(String, &T)> {
        let mut out = Vec::with_capacity(self.len);
        let mut stack: Vec<(String, &Node<T>)> = vec![(String::new(), &self.root)];

        while let Some((path, node)) = stack.pop() {
            if let Some(value) = node.value.as_ref() {
                let prefix = if path.is_empty() { "/".to_string() } else { path.clone() };
                out.push((prefix, value));
            }
            for (segment, child) in &node.children {
                stack.push((format!("{}/{}", path, segment), child));
            }
        }

        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
