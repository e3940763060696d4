mod domain;
mod ingestion_worker;
mod mqtt;
mod nats;

pub use domain::*;
pub use ingestion_worker::*;
pub use mqtt::*;
pub use nats::*;
