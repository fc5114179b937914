//! Class tree — hierarchical tags selecting device sets.
//!
//! The tree is a nested name → children mapping. Resolving a class name
//! yields the chain of ancestors leading to it plus the name itself, so a
//! device tagged `ceiling` under `lights → indoor` belongs to all three.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Recursively nested class mapping, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassTree(IndexMap<String, ClassTree>);

impl ClassTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion of a child subtree.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, children: ClassTree) -> Self {
        self.0.insert(name.into(), children);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Chain of ancestors ending with `name`, from the first depth-first
    /// match. Empty when `name` is not in the tree.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Vec<String> {
        self.find_path(name, &[]).unwrap_or_default()
    }

    /// Concatenated chains for several names, in input order.
    #[must_use]
    pub fn resolve_all<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        names.into_iter().flat_map(|name| self.resolve(name)).collect()
    }

    /// Names that occur more than once on a single root-to-leaf path.
    /// Those paths are invalid: the repeated entry and its subtree are
    /// never searched.
    #[must_use]
    pub fn repeated_names(&self) -> Vec<String> {
        let mut repeated = Vec::new();
        self.collect_repeated(&mut Vec::new(), &mut repeated);
        repeated
    }

    fn collect_repeated<'a>(&'a self, ancestors: &mut Vec<&'a str>, repeated: &mut Vec<String>) {
        for (key, children) in &self.0 {
            if ancestors.contains(&key.as_str()) {
                if !repeated.contains(key) {
                    repeated.push(key.clone());
                }
                continue;
            }
            ancestors.push(key);
            children.collect_repeated(ancestors, repeated);
            ancestors.pop();
        }
    }

    fn find_path(&self, name: &str, ancestors: &[String]) -> Option<Vec<String>> {
        self.0.iter().find_map(|(key, children)| {
            if ancestors.contains(key) {
                return None;
            }
            let mut path = ancestors.to_vec();
            path.push(key.clone());
            if key == name {
                Some(path)
            } else {
                children.find_path(name, &path)
            }
        })
    }
}

/// One class name or several, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassRef {
    One(String),
    Many(Vec<String>),
}

impl Default for ClassRef {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl ClassRef {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        let names: &[String] = match self {
            Self::One(name) => std::slice::from_ref(name),
            Self::Many(names) => names,
        };
        names.iter().map(String::as_str)
    }
}
