//! Integration test suites for the matching and risk engine.

mod common;

mod conditional_tests;
mod liquidation_tests;
mod matching_tests;
mod property_tests;
mod replay_tests;
