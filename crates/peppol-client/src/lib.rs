//! AS2 client orchestration for the Peppol AS2 subsystem.
//!
//! This module provides the send pipeline: a builder collects parameters,
//! fills the gaps from an SMP lookup, derives defaults, verifies
//! completeness, validates and wraps the business document, assembles the
//! AS2 settings and request, and performs the synchronous send. One builder
//! drives exactly one send; the terminal operations consume the builder, so
//! a completed send cannot be repeated or mutated afterwards.

use peppol_as2::As2Error;
use peppol_keystore::KeyStoreError;
use peppol_sbd::SbdError;
use peppol_types::CertificateError;
use peppol_validation::ValidationError;
use thiserror::Error;

mod builder;

pub use builder::{As2ClientBuilder, BusinessDocument, DEFAULT_AS2_SUBJECT};

/// Errors that can occur in the send pipeline before the transport is
/// entered. Transport-level failures are captured inside the returned
/// response instead.
#[derive(Debug, Error)]
pub enum ClientError {
	/// Content verification found one or more errors; the individual
	/// issues are retained for reporting.
	#[error("builder verification failed with {} error(s)", errors.len())]
	Incomplete {
		/// The recorded verification errors.
		errors: Vec<String>,
	},
	/// The receiver Access Point certificate was rejected.
	#[error("receiver certificate rejected: {0}")]
	Certificate(#[from] CertificateError),
	/// The business document is missing, not well-formed, or the envelope
	/// could not be built.
	#[error("business document error: {0}")]
	Sbd(#[from] SbdError),
	/// Payload validation failed fatally (unknown rule set, engine failure,
	/// or a rejecting result handler).
	#[error(transparent)]
	Validation(#[from] ValidationError),
	/// The key store could not be loaded.
	#[error(transparent)]
	KeyStore(#[from] KeyStoreError),
	/// The transport could not be created.
	#[error("transport setup failed: {0}")]
	Transport(#[from] As2Error),
}
