//! Tests for the connection crate

mod backoff_tests;
mod reaper_tests;
