mod processing_job_service;

pub use processing_job_service::*;
