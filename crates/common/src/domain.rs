mod collaborator;
#[cfg(any(test, feature = "testing"))]
mod in_memory;
mod processing_job;
mod result;
mod sensor_reading;
mod telemetry_document;

pub use collaborator::*;
#[cfg(any(test, feature = "testing"))]
pub use in_memory::*;
pub use processing_job::*;
pub use result::*;
pub use sensor_reading::*;
pub use telemetry_document::*;
