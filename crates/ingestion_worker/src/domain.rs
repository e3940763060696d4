mod outbox_relay;
mod reading_ingestion_service;

pub use outbox_relay::*;
pub use reading_ingestion_service::*;
