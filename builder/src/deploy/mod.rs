//! Build and deploy stages

pub mod content_type;
pub mod executor;
pub mod fsm;
pub mod uploader;
