//! Logging setup for tipline services

pub mod logging;

pub use logging::init_logging;
