//! Infrastructure layer for Switchyard: configuration file loading.

pub mod config;

pub use config::load_config;
