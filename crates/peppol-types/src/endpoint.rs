//! Resolved endpoint information.

use crate::transport::TransportProfile;
use serde::{Deserialize, Serialize};

/// A receiving Access Point endpoint resolved from signed service metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
	/// The endpoint URL the AS2 message is POSTed to.
	pub address: String,
	/// DER-encoded X.509 certificate of the receiving Access Point.
	pub certificate: Vec<u8>,
	/// The transport profile this endpoint was selected for.
	pub transport_profile: TransportProfile,
}

impl EndpointInfo {
	/// Creates endpoint information from its three resolved parts.
	pub fn new(
		address: impl Into<String>,
		certificate: Vec<u8>,
		transport_profile: TransportProfile,
	) -> Self {
		Self {
			address: address.into(),
			certificate,
			transport_profile,
		}
	}
}
