//! Records, for every running pod, when the images of its containers were
//! built, and exports per namespace image age gauges.

pub mod cache;
pub mod controller;
pub mod controller_manager;
pub mod error;
pub mod filter;
pub mod inspector;
pub mod metrics;
pub mod opts;
pub mod platform;
pub mod report;
pub mod resolver;
pub mod serve;
pub mod store;
pub mod utils;

pub use error::{Error, Result};

/// Name used as field manager for the patches this controller makes.
pub const CONTROLLER_NAME: &str = "pod-image-aging";
