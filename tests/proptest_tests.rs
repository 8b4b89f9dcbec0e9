//! Property-based tests for pattern handling using proptest.
//!
//! Lookups must never panic on arbitrary input, and the three lookup forms
//! must agree with each other.

mod common;

use common::{options, FakeEngine};
use proptest::collection::vec;
use proptest::prelude::*;

use distronode_test::host_manager::HostManager;
use distronode_test::inventory::pattern::{split_host_pattern, Subscript};
use distronode_test::version::AdapterStrategy;

// ============================================================================
// Strategies for generating test data
// ============================================================================

/// Strategy for generating valid host names
fn valid_hostname() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,15}")
        .unwrap()
        .prop_filter("group names", |s| s != "all" && s != "ungrouped")
}

/// Strategy for generating pattern-ish strings, including broken ones
fn pattern_string() -> impl Strategy<Value = String> {
    prop_oneof![
        valid_hostname(),
        prop::string::string_regex("[a-z*?]{1,8}").unwrap(),
        prop::string::string_regex("~[a-z.()\\[\\]+*]{0,8}").unwrap(),
        prop::string::string_regex("all\\[-?[0-9]{1,2}([:-][0-9]{0,2})?\\]").unwrap(),
        prop::string::string_regex("[a-z]{1,4}[:,][!&]?[a-z*]{1,4}").unwrap(),
        "\\PC{0,20}",
        Just(String::new()),
    ]
}

fn host_list_manager(hosts: &[String]) -> HostManager {
    let list = format!("{},", hosts.join(","));
    HostManager::with_strategy(
        options(&list),
        FakeEngine::new().into_arc(),
        AdapterStrategy::ManagedWithExtra,
    )
    .unwrap()
}

// ============================================================================
// Lookup properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lookups_agree(hosts in vec(valid_hostname(), 1..6), pattern in pattern_string()) {
        let manager = host_list_manager(&hosts);

        let contains = manager.contains(&pattern);
        let get = manager.get(&pattern);
        let attr = manager.attr(&pattern);

        prop_assert_eq!(contains, get.is_ok());
        prop_assert_eq!(contains, attr.is_ok());
        if let Err(err) = get {
            prop_assert!(err.is_not_found());
        }
    }

    #[test]
    fn every_listed_host_is_found(hosts in vec(valid_hostname(), 1..6)) {
        let manager = host_list_manager(&hosts);

        for host in &hosts {
            let dispatcher = manager.get(host).unwrap();
            prop_assert!(dispatcher.has_host(host));
        }
        prop_assert!(manager.keys().len() <= hosts.len());
        prop_assert!(manager.contains("all"));
    }
}

// ============================================================================
// Pattern grammar properties
// ============================================================================

proptest! {
    #[test]
    fn split_terms_are_trimmed_and_non_empty(pattern in "\\PC{0,40}") {
        for term in split_host_pattern(&pattern) {
            prop_assert!(!term.is_empty());
            prop_assert_eq!(term.trim(), term.as_str());
            prop_assert!(!term.contains(','));
        }
    }

    #[test]
    fn index_selects_at_most_one(len in 0usize..12, index in -20i64..20) {
        let items: Vec<usize> = (0..len).collect();
        match Subscript::Index(index).apply(&items) {
            Some(selected) => prop_assert_eq!(selected.len(), 1),
            None => prop_assert!(index >= len as i64 || index < -(len as i64)),
        }
    }

    #[test]
    fn range_is_a_contiguous_window(len in 0usize..12, start in 0i64..15, end in proptest::option::of(0i64..15)) {
        let items: Vec<usize> = (0..len).collect();
        let selected = Subscript::Range(start, end).apply(&items).unwrap();

        prop_assert!(selected.len() <= len);
        for pair in selected.windows(2) {
            prop_assert_eq!(pair[1], pair[0] + 1);
        }
        if let Some(first) = selected.first() {
            prop_assert_eq!(*first as i64, start);
        }
    }
}
