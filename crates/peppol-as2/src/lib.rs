//! AS2 transport module for the Peppol AS2 subsystem.
//!
//! This module carries a serialized Standard Business Document across the
//! wire: it MIME-packs the body, signs it with S/MIME, POSTs it to the
//! receiver Access Point and verifies the returned MDN against the receiver
//! certificate and the locally computed MIC. Failures past the send
//! boundary are captured as attributes of the returned response, never
//! raised, so the orchestrator can always inspect headers and MIC outcomes.

use async_trait::async_trait;
use peppol_types::As2Response;
use thiserror::Error;

/// MDN construction and parsing.
pub mod mdn;
/// Message-ID template expansion.
pub mod message_id;
/// AS2 settings assembled by the orchestrator.
pub mod settings;
/// S/MIME part construction, signing, verification and MIC computation.
pub mod smime;

/// Re-export implementations
pub mod implementations {
	pub mod http;
}

pub use implementations::http::{HttpAs2Transport, HttpTransportFactory};
pub use settings::{As2ReceiverSettings, As2SenderSettings, As2Settings};

/// Errors that can occur inside the AS2 transport stages.
#[derive(Debug, Error)]
pub enum As2Error {
	/// A MIME structure could not be built or parsed.
	#[error("MIME error: {0}")]
	Mime(String),
	/// The S/MIME signature could not be produced.
	#[error("signing failed: {0}")]
	Signing(String),
	/// A signature did not verify.
	#[error("signature verification failed: {0}")]
	SignatureVerification(String),
	/// Socket, TLS or HTTP-level failure.
	#[error("transport error: {0}")]
	Transport(String),
	/// The response carried no parseable MDN.
	#[error("MDN missing or unparseable: {0}")]
	MdnMissing(String),
	/// String attachment was requested but the payload is not UTF-8.
	#[error("payload is not valid UTF-8 but string attachment was requested")]
	PayloadNotUtf8,
}

/// The assembled AS2 request: the subject line and the serialized SBD body.
#[derive(Debug, Clone)]
pub struct As2Request {
	/// The `Subject` header of the outbound message.
	pub subject: String,
	/// The serialized Standard Business Document.
	pub payload: Vec<u8>,
}

/// Trait defining the interface for AS2 transport implementations.
///
/// An implementation performs one synchronous request/response round trip.
/// It always returns a response; per-stage failures are recorded on the
/// response's `exception` attribute.
#[async_trait]
pub trait As2TransportInterface: Send + Sync {
	/// Sends the request according to the settings and returns the response
	/// including the verified MDN, when one was received.
	async fn send(&self, settings: &As2Settings, request: &As2Request) -> As2Response;
}

/// Factory producing transport instances for the orchestrator.
pub trait TransportFactory: Send + Sync {
	/// Creates a fresh transport instance.
	fn create_transport(&self) -> Result<Box<dyn As2TransportInterface>, As2Error>;
}
