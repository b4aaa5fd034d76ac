//! Workspace-level scenarios.

mod common;
mod launch_test;
mod pause_test;
mod timing_test;
