//! Integration tests for the build runner

mod common;
mod test_fsm;
mod test_pipeline;
