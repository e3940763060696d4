pub mod domain;
pub mod garde;
pub mod nats;
pub mod postgres;
pub mod telemetry;

pub use domain::*;
pub use nats::*;
pub use postgres::*;
