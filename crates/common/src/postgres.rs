mod client;
mod config;
mod sensor_reading_repository;

pub use client::*;
pub use config::*;
pub use sensor_reading_repository::*;
