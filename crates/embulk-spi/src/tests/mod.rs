//! Crate-level behaviour tests.
