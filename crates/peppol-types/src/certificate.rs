//! Certificate primitives for Access Point trust decisions.
//!
//! The Access Point certificate learned from SMP metadata anchors all trust
//! decisions on the sending side: its subject common name is the receiver
//! AS2 id, and its validity window and issuer chain are checked before the
//! message is built.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use x509_parser::prelude::*;

/// Errors that can occur while parsing or evaluating certificates.
#[derive(Debug, Error)]
pub enum CertificateError {
	/// The DER bytes could not be parsed as an X.509 certificate.
	#[error("certificate parse error: {0}")]
	Parse(String),
	/// The certificate subject carries no common name attribute.
	#[error("certificate subject has no common name")]
	MissingCommonName,
	/// A check-result handler rejected the certificate.
	#[error("certificate rejected: {0}")]
	Rejected(String),
	/// A revocation probe failed to produce an answer.
	#[error("revocation check failed: {0}")]
	Revocation(String),
}

/// Extracts the common name attribute from the subject DN of a DER-encoded
/// certificate. The CN of a Peppol Access Point certificate doubles as the
/// AS2 identifier of that Access Point.
pub fn subject_common_name(der: &[u8]) -> Result<String, CertificateError> {
	let (_, cert) =
		parse_x509_certificate(der).map_err(|e| CertificateError::Parse(e.to_string()))?;
	let cn = cert
		.subject()
		.iter_common_name()
		.next()
		.ok_or(CertificateError::MissingCommonName)?;
	cn.as_str()
		.map(|s| s.to_string())
		.map_err(|e| CertificateError::Parse(e.to_string()))
}

/// Outcome of an Access Point certificate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
	/// Certificate is inside its validity window and chains to a trust root.
	Valid,
	/// The validity window has not started yet.
	NotYetValid,
	/// The validity window has passed.
	Expired,
	/// The issuer is unknown to the trust list, or the certificate is revoked.
	RevokedOrUnknownIssuer,
	/// The certificate could not be evaluated at all.
	Invalid(String),
}

impl CertificateStatus {
	/// Whether the outcome permits sending to the endpoint.
	pub fn is_valid(&self) -> bool {
		matches!(self, CertificateStatus::Valid)
	}
}

impl fmt::Display for CertificateStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CertificateStatus::Valid => f.write_str("valid"),
			CertificateStatus::NotYetValid => f.write_str("not yet valid"),
			CertificateStatus::Expired => f.write_str("expired"),
			CertificateStatus::RevokedOrUnknownIssuer => {
				f.write_str("revoked or unknown issuer")
			}
			CertificateStatus::Invalid(reason) => write!(f, "invalid: {}", reason),
		}
	}
}

/// Probe for certificate revocation (CRL or OCSP). Only consulted when a
/// policy carries one; the core ships no network-backed implementation.
pub trait RevocationProbe: Send + Sync {
	/// Returns whether the given DER-encoded certificate is revoked.
	fn is_revoked(&self, cert_der: &[u8]) -> Result<bool, CertificateError>;
}

/// Policy driving the Access Point certificate check: the Peppol trust
/// anchors the issuer chain must root in, and an optional revocation probe.
#[derive(Clone, Default)]
pub struct CertificateCheckPolicy {
	trust_anchors: Vec<Vec<u8>>,
	revocation: Option<Arc<dyn RevocationProbe>>,
}

impl CertificateCheckPolicy {
	/// Creates an empty policy: no trust anchors (issuer checking skipped)
	/// and no revocation probe.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a DER-encoded trust anchor certificate.
	pub fn with_trust_anchor(mut self, anchor_der: Vec<u8>) -> Self {
		self.trust_anchors.push(anchor_der);
		self
	}

	/// Installs a revocation probe consulted after the chain check.
	pub fn with_revocation_probe(mut self, probe: Arc<dyn RevocationProbe>) -> Self {
		self.revocation = Some(probe);
		self
	}

	/// The configured trust anchors.
	pub fn trust_anchors(&self) -> &[Vec<u8>] {
		&self.trust_anchors
	}
}

impl fmt::Debug for CertificateCheckPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CertificateCheckPolicy")
			.field("trust_anchors", &self.trust_anchors.len())
			.field("revocation", &self.revocation.is_some())
			.finish()
	}
}

/// Checks an Access Point certificate against the given instant and policy.
///
/// The validity window must bracket `now`; when trust anchors are
/// configured the issuer must match one of them and the signature must
/// verify against that anchor's public key; when the policy carries a
/// revocation probe it is consulted last.
pub fn check_access_point_certificate(
	der: &[u8],
	now: DateTime<Utc>,
	policy: &CertificateCheckPolicy,
) -> CertificateStatus {
	let (_, cert) = match parse_x509_certificate(der) {
		Ok(parsed) => parsed,
		Err(e) => return CertificateStatus::Invalid(e.to_string()),
	};

	let t = now.timestamp();
	if t < cert.validity().not_before.timestamp() {
		return CertificateStatus::NotYetValid;
	}
	if t > cert.validity().not_after.timestamp() {
		return CertificateStatus::Expired;
	}

	if !policy.trust_anchors.is_empty() {
		let mut chained = false;
		for anchor_der in &policy.trust_anchors {
			let (_, anchor) = match parse_x509_certificate(anchor_der) {
				Ok(parsed) => parsed,
				Err(e) => {
					tracing::warn!("Skipping unparsable trust anchor: {}", e);
					continue;
				}
			};
			if anchor.subject().as_raw() == cert.issuer().as_raw()
				&& cert.verify_signature(Some(anchor.public_key())).is_ok()
			{
				chained = true;
				break;
			}
		}
		if !chained {
			return CertificateStatus::RevokedOrUnknownIssuer;
		}
	} else {
		tracing::debug!("No trust anchors configured, skipping issuer chain check");
	}

	if let Some(probe) = &policy.revocation {
		match probe.is_revoked(der) {
			Ok(true) => return CertificateStatus::RevokedOrUnknownIssuer,
			Ok(false) => {}
			Err(e) => return CertificateStatus::Invalid(e.to_string()),
		}
	}

	CertificateStatus::Valid
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;
	use openssl::asn1::Asn1Time;
	use openssl::hash::MessageDigest;
	use openssl::pkey::{PKey, Private};
	use openssl::rsa::Rsa;
	use openssl::x509::{X509, X509NameBuilder};

	fn make_key() -> PKey<Private> {
		PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
	}

	fn make_cert(
		cn: &str,
		key: &PKey<Private>,
		signer: Option<(&X509, &PKey<Private>)>,
		not_before_unix: i64,
		not_after_unix: i64,
	) -> X509 {
		let mut name = X509NameBuilder::new().unwrap();
		name.append_entry_by_text("CN", cn).unwrap();
		let name = name.build();

		let mut builder = X509::builder().unwrap();
		builder.set_version(2).unwrap();
		builder.set_subject_name(&name).unwrap();
		builder.set_pubkey(key).unwrap();
		builder
			.set_not_before(&Asn1Time::from_unix(not_before_unix).unwrap())
			.unwrap();
		builder
			.set_not_after(&Asn1Time::from_unix(not_after_unix).unwrap())
			.unwrap();
		match signer {
			Some((issuer_cert, issuer_key)) => {
				builder
					.set_issuer_name(issuer_cert.subject_name())
					.unwrap();
				builder.sign(issuer_key, MessageDigest::sha256()).unwrap();
			}
			None => {
				builder.set_issuer_name(&name).unwrap();
				builder.sign(key, MessageDigest::sha256()).unwrap();
			}
		}
		builder.build()
	}

	fn window(now: DateTime<Utc>, from_days: i64, to_days: i64) -> (i64, i64) {
		(
			(now + Duration::days(from_days)).timestamp(),
			(now + Duration::days(to_days)).timestamp(),
		)
	}

	#[test]
	fn test_subject_common_name() {
		let key = make_key();
		let now = Utc::now();
		let (nb, na) = window(now, -1, 1);
		let cert = make_cert("POP000092", &key, None, nb, na);
		let cn = subject_common_name(&cert.to_der().unwrap()).unwrap();
		assert_eq!(cn, "POP000092");
	}

	#[test]
	fn test_subject_common_name_rejects_garbage() {
		assert!(matches!(
			subject_common_name(b"not a certificate"),
			Err(CertificateError::Parse(_))
		));
	}

	#[test]
	fn test_expired_certificate() {
		let key = make_key();
		let now = Utc::now();
		let (nb, na) = window(now, -10, -1);
		let cert = make_cert("AP", &key, None, nb, na);
		let status = check_access_point_certificate(
			&cert.to_der().unwrap(),
			now,
			&CertificateCheckPolicy::new(),
		);
		assert_eq!(status, CertificateStatus::Expired);
	}

	#[test]
	fn test_not_yet_valid_certificate() {
		let key = make_key();
		let now = Utc::now();
		let (nb, na) = window(now, 1, 10);
		let cert = make_cert("AP", &key, None, nb, na);
		let status = check_access_point_certificate(
			&cert.to_der().unwrap(),
			now,
			&CertificateCheckPolicy::new(),
		);
		assert_eq!(status, CertificateStatus::NotYetValid);
	}

	#[test]
	fn test_chain_to_configured_anchor() {
		let now = Utc::now();
		let (nb, na) = window(now, -1, 365);

		let root_key = make_key();
		let root = make_cert("Peppol Test Root", &root_key, None, nb, na);

		let ap_key = make_key();
		let ap = make_cert("POP000001", &ap_key, Some((&root, &root_key)), nb, na);

		let policy = CertificateCheckPolicy::new().with_trust_anchor(root.to_der().unwrap());
		let status =
			check_access_point_certificate(&ap.to_der().unwrap(), now, &policy);
		assert_eq!(status, CertificateStatus::Valid);
	}

	#[test]
	fn test_unknown_issuer() {
		let now = Utc::now();
		let (nb, na) = window(now, -1, 365);

		let root_key = make_key();
		let root = make_cert("Peppol Test Root", &root_key, None, nb, na);
		let other_key = make_key();
		let other_root = make_cert("Some Other CA", &other_key, None, nb, na);

		let ap_key = make_key();
		let ap = make_cert("POP000001", &ap_key, Some((&root, &root_key)), nb, na);

		let policy =
			CertificateCheckPolicy::new().with_trust_anchor(other_root.to_der().unwrap());
		let status =
			check_access_point_certificate(&ap.to_der().unwrap(), now, &policy);
		assert_eq!(status, CertificateStatus::RevokedOrUnknownIssuer);
	}

	#[test]
	fn test_revocation_probe_consulted() {
		struct AlwaysRevoked;
		impl RevocationProbe for AlwaysRevoked {
			fn is_revoked(&self, _cert_der: &[u8]) -> Result<bool, CertificateError> {
				Ok(true)
			}
		}

		let key = make_key();
		let now = Utc::now();
		let (nb, na) = window(now, -1, 1);
		let cert = make_cert("AP", &key, None, nb, na);

		let policy =
			CertificateCheckPolicy::new().with_revocation_probe(Arc::new(AlwaysRevoked));
		let status = check_access_point_certificate(
			&cert.to_der().unwrap(),
			now,
			&policy,
		);
		assert_eq!(status, CertificateStatus::RevokedOrUnknownIssuer);
	}
}
