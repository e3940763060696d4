mod connector;
mod rumqttc_connector;
mod subscriber;

pub use connector::*;
pub use rumqttc_connector::*;
pub use subscriber::*;
