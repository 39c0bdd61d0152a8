//! Fuzz target for SQL statement classification.
//!
//! This tests that classification never panics on arbitrary statement text
//! and stays deterministic, in both compatibility modes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replica_router::classifier::{SqlClassifier, StatementKind};

fuzz_target!(|data: (&str, bool)| {
    let (sql, compatibility_mode) = data;
    let classifier = SqlClassifier::new(["known_pure_fn"], compatibility_mode);

    // Should never panic
    let first = classifier.classify(sql);

    // Deterministic
    assert_eq!(first, classifier.classify(sql));

    // Blank input is always a read
    if sql.trim().is_empty() {
        assert_eq!(first, StatementKind::Read);
    }
});
