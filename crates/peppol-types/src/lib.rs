//! Common types module for the Peppol AS2 subsystem.
//!
//! This module defines the core data types and structures shared by the
//! sending and receiving pipelines. It provides a centralized location for
//! identifiers, transport profiles, certificate primitives, handler
//! interfaces and response types to ensure consistency across all
//! components.

/// Certificate primitives: subject CN extraction and Access Point checks.
pub mod certificate;
/// Dump hook interfaces for raw wire traffic.
pub mod dump;
/// Content-Transfer-Encoding values recognized on the AS2 body part.
pub mod encoding;
/// Resolved endpoint information from service metadata.
pub mod endpoint;
/// Message and certificate-check handler interfaces.
pub mod handlers;
/// Peppol participant, document-type and process identifiers.
pub mod identifier;
/// AS2 response and MDN types.
pub mod response;
/// Transport profiles and signing algorithms.
pub mod transport;
/// Validation result types and handler interfaces.
pub mod validation;

// Re-export all types for convenient access
pub use certificate::*;
pub use dump::*;
pub use encoding::*;
pub use endpoint::*;
pub use handlers::*;
pub use identifier::*;
pub use response::*;
pub use transport::*;
pub use validation::*;
