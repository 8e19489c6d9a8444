//! Deriv module - Client implementation for the Deriv WebSocket API v3

pub mod messages;
pub mod session;
pub mod transport;

pub use session::{DerivSession, TickStream};
pub use transport::{DerivTransport, TransportOptions};
