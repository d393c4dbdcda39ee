// Algorithm shards across independent processes must agree

use std::collections::BTreeSet;

use vidhash_lib::hashing::{Registry, Selection};
use vidhash_lib::VidHashError;

fn shard_names(registry: &Registry, part: usize, n_parts: usize, selection: &Selection) -> Vec<String> {
    registry
        .partition(part, n_parts, selection)
        .unwrap()
        .iter()
        .map(|a| a.name().to_string())
        .collect()
}

#[test]
fn test_shards_are_disjoint_and_cover_everything() {
    let registry = Registry::with_defaults();
    let all: BTreeSet<String> = registry.names().into_iter().map(String::from).collect();

    for n_parts in 1..=5 {
        let mut seen = BTreeSet::new();
        for part in 1..=n_parts {
            for name in shard_names(&registry, part, n_parts, &Selection::All) {
                assert!(seen.insert(name.clone()), "{} appears in two shards of {}", name, n_parts);
            }
        }
        assert_eq!(seen, all);
    }
}

#[test]
fn test_shards_are_stable_across_registries() {
    // Two processes build their own registry; the split must not depend on it
    let first = Registry::with_defaults();
    let second = Registry::with_defaults();

    for part in 1..=3 {
        assert_eq!(
            shard_names(&first, part, 3, &Selection::All),
            shard_names(&second, part, 3, &Selection::All)
        );
    }
}

#[test]
fn test_shards_of_an_allow_list() {
    let registry = Registry::with_defaults();
    let selection: Selection = "phash-video,lle-mosaic,lle-dct-8x8,no-such-algorithm".parse().unwrap();

    assert_eq!(shard_names(&registry, 1, 2, &selection), vec!["lle-dct-8x8", "phash-video"]);
    assert_eq!(shard_names(&registry, 2, 2, &selection), vec!["lle-mosaic"]);
}

#[test]
fn test_shard_index_beyond_count_is_rejected() {
    let registry = Registry::with_defaults();
    assert!(matches!(
        registry.partition(4, 3, &Selection::All),
        Err(VidHashError::Precondition(_))
    ));
}
