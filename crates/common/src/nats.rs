mod client;
mod middleware;
mod queue_consumer;
mod trace_context;
mod traits;

pub use client::*;
pub use middleware::*;
pub use queue_consumer::*;
pub use trace_context::*;
pub use traits::*;
