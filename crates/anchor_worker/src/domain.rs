mod reading_processing_service;
mod submission_document;

pub use reading_processing_service::*;
pub use submission_document::*;
