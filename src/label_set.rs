use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeSet<String>);

impl LabelSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    pub fn insert<L: Into<String>>(&mut self, label: L) -> bool {
        self.0.insert(label.into())
    }

    pub fn remove(&mut self, label: &str) -> bool {
        self.0.remove(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn with(&self, label: &str) -> Self {
        let mut next = self.clone();
        next.insert(label);
        next
    }

    pub fn without(&self, label: &str) -> Self {
        let mut next = self.clone();
        next.remove(label);
        next
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }

    pub fn canonical_key(&self) -> Option<CanonicalKey> {
        if self.0.is_empty() {
            return None;
        }
        // Each label is length-prefixed, so label text cannot forge a boundary.
        let mut buf = Vec::new();
        for label in &self.0 {
            buf.extend_from_slice(&(label.len() as u32).to_le_bytes());
            buf.extend_from_slice(label.as_bytes());
        }
        Some(CanonicalKey(format!("{:016x}", xxh64(&buf, 0))))
    }
}

impl<S: Into<String>> FromIterator<S> for LabelSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, label) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ",")?;
            }
            write!(f, "{label}")?;
        }
        write!(f, "}}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
