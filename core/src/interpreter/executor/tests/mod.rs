//! Tests for the executor
//!
//! Organized by feature area

mod for_tests;
mod helpers;
mod host_tests;
mod set_tests;
mod sub_tests;
