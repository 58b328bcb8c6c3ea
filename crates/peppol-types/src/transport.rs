//! Transport profiles and signing algorithms.
//!
//! Peppol endpoints advertise the wire protocol variants they support as
//! transport profile identifiers. Only the two AS2 generations are modeled
//! here; the profile chosen during SMP resolution drives the signing
//! algorithm of the outbound message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier selecting a concrete wire protocol variant for an
/// endpoint. Equality on the identifier string is the only operation the
/// resolver needs; the well-known AS2 profiles are provided as constructors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportProfile {
	id: String,
}

impl TransportProfile {
	/// Profile identifier of Peppol AS2 v1 (SHA-1 signing).
	pub const AS2_V1_ID: &'static str = "busdox-transport-as2-ver1p0";
	/// Profile identifier of Peppol AS2 v2 (SHA-256 signing).
	pub const AS2_V2_ID: &'static str = "busdox-transport-as2-ver2p0";

	/// Creates a profile from an arbitrary identifier string.
	pub fn new(id: impl Into<String>) -> Self {
		Self { id: id.into() }
	}

	/// The Peppol AS2 v1 profile.
	pub fn as2_v1() -> Self {
		Self::new(Self::AS2_V1_ID)
	}

	/// The Peppol AS2 v2 profile.
	pub fn as2_v2() -> Self {
		Self::new(Self::AS2_V2_ID)
	}

	/// The profile identifier string.
	pub fn id(&self) -> &str {
		&self.id
	}

	/// The signing algorithm mandated by this profile, if it is one of the
	/// known AS2 profiles.
	pub fn default_signing_algorithm(&self) -> Option<SigningAlgorithm> {
		match self.id.as_str() {
			Self::AS2_V1_ID => Some(SigningAlgorithm::Sha1),
			Self::AS2_V2_ID => Some(SigningAlgorithm::Sha256),
			_ => None,
		}
	}
}

impl fmt::Display for TransportProfile {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.id)
	}
}

/// The ordered default endpoint selection preference: AS2 v2 before v1.
pub fn default_transport_profiles() -> Vec<TransportProfile> {
	vec![TransportProfile::as2_v2(), TransportProfile::as2_v1()]
}

/// Digest algorithm used for S/MIME signing and MIC computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningAlgorithm {
	/// SHA-1, mandated by the AS2 v1 profile.
	Sha1,
	/// SHA-256, mandated by the AS2 v2 profile.
	Sha256,
}

impl SigningAlgorithm {
	/// The `micalg` identifier advertised in disposition options and in the
	/// `multipart/signed` content type.
	pub fn mic_alg_id(&self) -> &'static str {
		match self {
			SigningAlgorithm::Sha1 => "sha1",
			SigningAlgorithm::Sha256 => "sha-256",
		}
	}

	/// Parses a `micalg` identifier as found in MDN requests. Both the
	/// RFC 3851 and RFC 5751 spellings are accepted.
	pub fn from_mic_alg_id(id: &str) -> Option<Self> {
		match id.trim().to_ascii_lowercase().as_str() {
			"sha1" | "sha-1" => Some(SigningAlgorithm::Sha1),
			"sha256" | "sha-256" => Some(SigningAlgorithm::Sha256),
			_ => None,
		}
	}
}

impl fmt::Display for SigningAlgorithm {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.mic_alg_id())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_profile_signing_algorithms() {
		assert_eq!(
			TransportProfile::as2_v1().default_signing_algorithm(),
			Some(SigningAlgorithm::Sha1)
		);
		assert_eq!(
			TransportProfile::as2_v2().default_signing_algorithm(),
			Some(SigningAlgorithm::Sha256)
		);
		assert_eq!(
			TransportProfile::new("busdox-transport-start").default_signing_algorithm(),
			None
		);
	}

	#[test]
	fn test_default_preference_order() {
		let profiles = default_transport_profiles();
		assert_eq!(profiles[0], TransportProfile::as2_v2());
		assert_eq!(profiles[1], TransportProfile::as2_v1());
	}

	#[test]
	fn test_mic_alg_round_trip() {
		for alg in [SigningAlgorithm::Sha1, SigningAlgorithm::Sha256] {
			assert_eq!(SigningAlgorithm::from_mic_alg_id(alg.mic_alg_id()), Some(alg));
		}
		assert_eq!(SigningAlgorithm::from_mic_alg_id("md5"), None);
	}
}
