//! WebSocket chat relay.
//!
//! Every connected client is bridged onto one pub/sub topic: what a client
//! sends is published to the topic, and everything published to the topic is
//! pushed to every client.  Several relay instances sharing a broker form a
//! single chat room.
//!
//! - [`protocol`]: the JSON wire format.
//! - [`service`]: broker backends, the per-connection bridge and the axum
//!   endpoint.

pub use chat_protocol as protocol;
pub use relay as service;
