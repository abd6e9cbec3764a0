//! Ports: the seams between the correlation core and the outside world.

pub mod transport;

pub use transport::{Transport, TransportEvent, TransportState};
