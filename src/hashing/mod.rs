// Hash algorithm registry
//
// Each algorithm is a `HashAlgorithm` trait object registered by name in an
// explicit table built once at startup. Components that need algorithms take
// a `&Registry`.

pub mod bits;
pub mod lle;
pub mod phash;
pub mod runner;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

use crate::db::schema::Hash;
use crate::error::{Result, VidHashError};
use crate::tools::ExternalTool;

/// Capability set of a fingerprinting algorithm.
pub trait HashAlgorithm: Send + Sync {
    /// Stable registry and storage name.
    fn name(&self) -> &str;

    /// Upper bound of the distance range. Bounds the threshold search and
    /// normalises reported thresholds.
    fn max_threshold(&self) -> u32;

    fn compute_distance(&self, a: &Hash, b: &Hash) -> Result<i64>;

    /// Compute the fingerprint value for one media file.
    fn hash_video(&self, path: &Path) -> Result<String>;

    /// External programs `hash_video` runs.
    fn tools(&self) -> &'static [ExternalTool] {
        &[]
    }
}

/// Which algorithms a run should consider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl Selection {
    pub fn allows(&self, name: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(names) => names.contains(name),
        }
    }
}

impl FromStr for Selection {
    type Err = VidHashError;

    /// `all` or a comma-separated list of algorithm names.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "all" {
            return Ok(Selection::All);
        }
        let names: BTreeSet<String> = s
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .collect();
        Ok(Selection::Only(names))
    }
}

/// Name-keyed table of algorithms. Iteration is sorted by name.
#[derive(Default)]
pub struct Registry {
    algorithms: BTreeMap<String, Box<dyn HashAlgorithm>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in algorithms: `phash-video` and every `lle-*` variant.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(phash::PHashVideo));
        for config in lle::VARIANTS.iter() {
            registry.register(Box::new(lle::FrameEmbedding::new(config.clone())));
        }
        registry
    }

    /// Add an algorithm, replacing any previous one with the same name.
    pub fn register(&mut self, algorithm: Box<dyn HashAlgorithm>) {
        let name = algorithm.name().to_string();
        if self.algorithms.insert(name.clone(), algorithm).is_some() {
            log::warn!("Replaced registered hash algorithm {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Result<&dyn HashAlgorithm> {
        self.algorithms
            .get(name)
            .map(|a| a.as_ref())
            .ok_or_else(|| VidHashError::UnknownAlgorithm(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.algorithms.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn HashAlgorithm> {
        self.algorithms.values().map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.algorithms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }

    /// Shard `part` (1-based) of `n_parts`: the selected algorithms sorted by
    /// name, keeping every one whose index is congruent to `part - 1`.
    pub fn partition(&self, part: usize, n_parts: usize, selection: &Selection) -> Result<Vec<&dyn HashAlgorithm>> {
        if n_parts == 0 || part == 0 || part > n_parts {
            return Err(VidHashError::Precondition(format!(
                "invalid partitioning: part {} of {}",
                part, n_parts
            )));
        }

        if let Selection::Only(names) = selection {
            for name in names.iter().filter(|n| !self.algorithms.contains_key(n.as_str())) {
                log::warn!("Ignoring unknown hash algorithm {}", name);
            }
        }

        Ok(self
            .iter()
            .filter(|a| selection.allows(a.name()))
            .enumerate()
            .filter(|(idx, _)| idx % n_parts == part - 1)
            .map(|(_, a)| a)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl HashAlgorithm for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        fn max_threshold(&self) -> u32 {
            10
        }
        fn compute_distance(&self, _a: &Hash, _b: &Hash) -> Result<i64> {
            Ok(0)
        }
        fn hash_video(&self, _path: &Path) -> Result<String> {
            Ok("0".into())
        }
    }

    fn registry(names: &[&'static str]) -> Registry {
        let mut r = Registry::new();
        for n in names {
            r.register(Box::new(Fixed(n)));
        }
        r
    }

    fn names<'a>(algs: &[&'a dyn HashAlgorithm]) -> Vec<&'a str> {
        algs.iter().map(|&a| a.name()).collect()
    }

    #[test]
    fn test_default_registry() {
        let r = Registry::with_defaults();
        assert_eq!(r.len(), 12);
        assert_eq!(r.get("phash-video").unwrap().max_threshold(), 64);
        assert_eq!(r.get("lle-mosaic").unwrap().max_threshold(), 480);
        assert!(matches!(r.get("nope"), Err(VidHashError::UnknownAlgorithm(_))));
    }

    #[test]
    fn test_partition_is_sorted_modulo() {
        let r = registry(&["e", "c", "a", "d", "b"]);
        assert_eq!(names(&r.partition(1, 2, &Selection::All).unwrap()), vec!["a", "c", "e"]);
        assert_eq!(names(&r.partition(2, 2, &Selection::All).unwrap()), vec!["b", "d"]);
        assert_eq!(names(&r.partition(1, 1, &Selection::All).unwrap()).len(), 5);
    }

    #[test]
    fn test_partition_applies_selection_first() {
        let r = registry(&["a", "b", "c", "d"]);
        let sel: Selection = "b, d,zzz".parse().unwrap();
        assert_eq!(names(&r.partition(1, 2, &sel).unwrap()), vec!["b"]);
        assert_eq!(names(&r.partition(2, 2, &sel).unwrap()), vec!["d"]);
    }

    #[test]
    fn test_partition_rejects_bad_part() {
        let r = registry(&["a"]);
        assert!(matches!(r.partition(3, 2, &Selection::All), Err(VidHashError::Precondition(_))));
        assert!(r.partition(0, 2, &Selection::All).is_err());
        assert!(r.partition(1, 0, &Selection::All).is_err());
    }

    #[test]
    fn test_selection_parse() {
        assert_eq!("all".parse::<Selection>().unwrap(), Selection::All);
        let sel: Selection = "x,y".parse().unwrap();
        assert!(sel.allows("x"));
        assert!(!sel.allows("z"));
    }
}
