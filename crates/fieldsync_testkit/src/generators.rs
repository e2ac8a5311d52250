//! Property-based test generators using proptest.

use crate::fixtures::at;
use fieldsync_core::models::Phrase;
use fieldsync_core::{SyncStatus, Timestamp};
use proptest::prelude::*;

/// Strategy for generating record ids usable as local keys.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating a set of distinct record ids.
pub fn record_ids_strategy(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(record_id_strategy(), 1..=max.max(1))
        .prop_map(|ids| ids.into_iter().collect())
}

/// Strategy for generating valid phrases.
pub fn phrase_strategy() -> impl Strategy<Value = Phrase> {
    (
        prop::sample::select(vec!["roof", "walls", "damp", "services"]),
        prop::string::string_regex("[A-Z][a-z ]{2,20}").expect("Invalid regex"),
        prop::string::string_regex("[A-Z][a-z ,.]{5,60}").expect("Invalid regex"),
        0u32..50,
    )
        .prop_map(|(category, name, body, ordinal)| Phrase {
            category: category.to_string(),
            name,
            body,
            ordinal,
        })
}

/// Strategy for generating timestamps within a day of the fixture epoch.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (0i64..86_400).prop_map(at)
}

/// Strategy for generating any sync status.
pub fn status_strategy() -> impl Strategy<Value = SyncStatus> {
    prop::sample::select(SyncStatus::ALL.to_vec())
}
