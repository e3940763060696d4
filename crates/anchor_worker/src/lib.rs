mod anchor_worker;
mod domain;
mod nats;
mod submission;

pub use anchor_worker::*;
pub use domain::*;
pub use nats::*;
pub use submission::*;
