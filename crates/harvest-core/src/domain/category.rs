use serde::{Deserialize, Serialize};
use std::fmt;

/// A requested resource type whose data a collector fetches
/// (e.g. `ec2`, `s3`, `iam`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Dedupe while keeping the first occurrence's position.
pub fn dedupe_ordered<'a, I>(categories: I) -> Vec<Category>
where
    I: IntoIterator<Item = &'a Category>,
{
    let mut seen = std::collections::HashSet::new();
    categories
        .into_iter()
        .filter(|c| seen.insert(*c))
        .cloned()
        .collect()
}
