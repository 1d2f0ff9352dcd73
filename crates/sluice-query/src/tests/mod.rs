//! Tests for the sluice-query crate.
