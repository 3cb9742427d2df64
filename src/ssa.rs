//! Static single assignment indices.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Maps every variable to the index of its latest incarnation.
///
/// A variable that was never assigned reads at index `1`, so the first
/// assignment produces index `2`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SsaMap {
    vars: BTreeMap<String, u32>,
}

/// Index of variables that are not in the map.
pub const DEFAULT_INDEX: u32 = 1;

impl SsaMap {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn index(&self, name: &str) -> Option<u32> {
        self.vars.get(name).copied()
    }

    pub fn index_or_default(&self, name: &str) -> u32 {
        self.index(name).unwrap_or(DEFAULT_INDEX)
    }

    /// Index for a new assignment to `name`.
    pub fn fresh_index(&self, name: &str) -> u32 {
        self.index_or_default(name) + 1
    }

    pub fn all_variables(&self) -> impl Iterator<Item = &str> + '_ {
        self.vars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn builder(&self) -> SsaMapBuilder {
        SsaMapBuilder {
            vars: self.vars.clone(),
        }
    }

    /// Component-wise maximum of two maps.
    ///
    /// Also returns every variable whose index differs, as
    /// `(name, index in a, index in b)`.
    pub fn merge(a: &SsaMap, b: &SsaMap) -> (SsaMap, Vec<(String, Option<u32>, Option<u32>)>) {
        let mut vars = a.vars.clone();
        let mut differences = Vec::new();

        for (name, &ib) in &b.vars {
            let ia = a.index(name);
            if ia != Some(ib) {
                differences.push((name.clone(), ia, Some(ib)));
            }
            let entry = vars.entry(name.clone()).or_insert(ib);
            *entry = (*entry).max(ib);
        }
        for (name, &ia) in &a.vars {
            if !b.vars.contains_key(name) {
                differences.push((name.clone(), Some(ia), None));
            }
        }

        (SsaMap { vars }, differences)
    }
}

impl Display for SsaMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, index)) in self.vars.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}@{}", name, index)?;
        }
        write!(f, "}}")
    }
}

#[derive(Debug, Clone)]
pub struct SsaMapBuilder {
    vars: BTreeMap<String, u32>,
}

impl SsaMapBuilder {
    pub fn set(&mut self, name: impl Into<String>, index: u32) -> &mut Self {
        let name = name.into();
        debug_assert!(
            self.vars.get(&name).map_or(true, |&old| old <= index),
            "SSA index of `{}` must not decrease",
            name
        );
        self.vars.insert(name, index);
        self
    }

    pub fn index_or_default(&self, name: &str) -> u32 {
        self.vars.get(name).copied().unwrap_or(DEFAULT_INDEX)
    }

    pub fn build(&self) -> SsaMap {
        SsaMap {
            vars: self.vars.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_index() {
        let ssa = SsaMap::empty();
        assert_eq!(ssa.index("x"), None);
        assert_eq!(ssa.index_or_default("x"), 1);
        assert_eq!(ssa.fresh_index("x"), 2);
    }

    #[test]
    fn test_builder() {
        let ssa = SsaMap::empty().builder().set("x", 2).set("y", 3).build();
        assert_eq!(ssa.index("x"), Some(2));
        assert_eq!(ssa.fresh_index("y"), 4);
        assert_eq!(ssa.all_variables().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(ssa.to_string(), "{x@2, y@3}");
    }

    #[test]
    fn test_merge() {
        let a = SsaMap::empty().builder().set("x", 2).set("y", 5).build();
        let b = SsaMap::empty().builder().set("x", 4).set("z", 2).build();

        let (merged, mut differences) = SsaMap::merge(&a, &b);
        assert_eq!(merged.index("x"), Some(4));
        assert_eq!(merged.index("y"), Some(5));
        assert_eq!(merged.index("z"), Some(2));

        differences.sort();
        assert_eq!(
            differences,
            vec![
                ("x".to_string(), Some(2), Some(4)),
                ("y".to_string(), Some(5), None),
                ("z".to_string(), None, Some(2)),
            ]
        );
    }
}
