//! Test suites for engine bootstrap and transfer execution.

pub(crate) mod support;
