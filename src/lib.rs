pub mod config;
pub mod error;
pub mod fs;
pub mod observer;
