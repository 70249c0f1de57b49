//! Build Runner Library
//!
//! Builds a site checkout, streams the build logs to the message bus and
//! uploads the output folder to object storage.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod storage;
pub mod transport;
pub mod utils;
pub mod workers;

#[cfg(test)]
pub mod testutil;
