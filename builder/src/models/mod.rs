//! Data models

pub mod build;
pub mod deployment;
