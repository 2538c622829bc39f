//! Adversarial and scenario test suite for the SPV engine.
//!
//! Integration tests live under `tests/`: property tests that feed the
//! chain, filter and merkle code randomized or hostile input, and
//! end-to-end scenarios covering reorganisation, locators and filter
//! self-update through the sync layer.

pub mod helpers;
