mod processing_job_producer;

pub use processing_job_producer::*;
