mod hedera_relay;
mod http;
mod pinata;
mod placeholder;

pub use hedera_relay::*;
pub use pinata::*;
pub use placeholder::*;

#[cfg(test)]
mod test_server;
