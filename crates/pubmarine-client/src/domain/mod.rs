//! Domain types for the client: envelope, correlation ids, configuration
//! and errors.

pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;

// Re-exports for convenience
pub use config::{ClientConfig, ConfigError, TelemetryConfig};
pub use correlation::EnvelopeId;
pub use envelope::Envelope;
pub use error::{
    CallError, ClientError, ClientResult, CodecError, RegistryError, TransportError,
};
