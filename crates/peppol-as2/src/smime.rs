//! S/MIME part construction, signing, verification and MIC computation.
//!
//! The outbound message is `multipart/signed` with exactly one body part
//! containing the SBD XML and a detached PKCS#7 signature part. The MIC is
//! computed over the canonical body part bytes (headers included), which is
//! also exactly what the signature covers.

use crate::{As2Error, As2Settings};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKeyRef, Private};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509, X509Ref};
use peppol_types::{ContentTransferEncoding, SigningAlgorithm};
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256};

impl From<openssl::error::ErrorStack> for As2Error {
	fn from(e: openssl::error::ErrorStack) -> Self {
		As2Error::Signing(e.to_string())
	}
}

/// A MIME body part: headers plus (already transfer-encoded) body.
#[derive(Debug, Clone)]
pub struct MimePart {
	/// Part headers in order.
	pub headers: Vec<(String, String)>,
	/// Part body bytes.
	pub body: Vec<u8>,
}

impl MimePart {
	/// The canonical wire bytes of the part: CRLF header lines, blank line,
	/// body. Signing and MIC computation both run over these bytes.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(self.body.len() + 128);
		for (name, value) in &self.headers {
			out.extend_from_slice(name.as_bytes());
			out.extend_from_slice(b": ");
			out.extend_from_slice(value.as_bytes());
			out.extend_from_slice(b"\r\n");
		}
		out.extend_from_slice(b"\r\n");
		out.extend_from_slice(&self.body);
		out
	}
}

/// Builds the AS2 body part from the serialized SBD.
///
/// With `use_data_handler` off the payload is attached as a UTF-8 string,
/// so non-UTF-8 bytes are rejected up front; the content type is set
/// explicitly either way so the MIME layer cannot fall back to
/// `text/plain`.
pub fn build_content_part(settings: &As2Settings, payload: &[u8]) -> Result<MimePart, As2Error> {
	if !settings.use_data_handler && std::str::from_utf8(payload).is_err() {
		return Err(As2Error::PayloadNotUtf8);
	}
	let body = encode_body(payload, settings.content_transfer_encoding);
	Ok(MimePart {
		headers: vec![
			("Content-Type".to_string(), settings.mime_type.clone()),
			(
				"Content-Transfer-Encoding".to_string(),
				settings
					.content_transfer_encoding
					.as_header_value()
					.to_string(),
			),
		],
		body,
	})
}

fn encode_body(payload: &[u8], encoding: ContentTransferEncoding) -> Vec<u8> {
	match encoding {
		ContentTransferEncoding::Base64 => wrap_lines(&BASE64.encode(payload), 76).into_bytes(),
		ContentTransferEncoding::QuotedPrintable => quoted_printable_encode(payload),
		ContentTransferEncoding::SevenBit
		| ContentTransferEncoding::EightBit
		| ContentTransferEncoding::Binary => payload.to_vec(),
	}
}

fn wrap_lines(input: &str, width: usize) -> String {
	let mut out = String::with_capacity(input.len() + input.len() / width * 2 + 2);
	let bytes = input.as_bytes();
	let mut i = 0;
	while i < bytes.len() {
		let end = (i + width).min(bytes.len());
		out.push_str(&input[i..end]);
		out.push_str("\r\n");
		i = end;
	}
	out
}

fn quoted_printable_encode(payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(payload.len() * 2);
	let mut line_len = 0usize;
	for &b in payload {
		let encoded_len = if b == b'=' || b >= 0x80 || (b < 0x20 && b != b'\r' && b != b'\n') {
			3
		} else {
			1
		};
		if b == b'\n' {
			out.extend_from_slice(b"\r\n");
			line_len = 0;
			continue;
		}
		if b == b'\r' {
			continue;
		}
		if line_len + encoded_len > 75 {
			out.extend_from_slice(b"=\r\n");
			line_len = 0;
		}
		if encoded_len == 3 {
			out.extend_from_slice(format!("={:02X}", b).as_bytes());
		} else {
			out.push(b);
		}
		line_len += encoded_len;
	}
	out
}

/// Computes the base64 MIC digest over the given bytes.
pub fn compute_mic(data: &[u8], algorithm: SigningAlgorithm) -> String {
	let digest = match algorithm {
		SigningAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
		SigningAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
	};
	BASE64.encode(digest)
}

/// Produces the detached PKCS#7 signature over the canonical part bytes.
pub fn sign_detached(
	data: &[u8],
	key: &PKeyRef<Private>,
	cert: &X509Ref,
) -> Result<Vec<u8>, As2Error> {
	let certs = Stack::new()?;
	let pkcs7 = Pkcs7::sign(
		cert,
		key,
		&certs,
		data,
		Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY,
	)
	.map_err(|e| As2Error::Signing(e.to_string()))?;
	pkcs7.to_der().map_err(|e| As2Error::Signing(e.to_string()))
}

/// A complete `multipart/signed` envelope: the top-level content type
/// (carrying protocol, micalg and boundary) and the multipart body.
#[derive(Debug, Clone)]
pub struct SignedMultipart {
	/// The `Content-Type` header value of the envelope.
	pub content_type: String,
	/// The multipart body bytes.
	pub body: Vec<u8>,
}

/// Assembles the `multipart/signed` envelope from the content part and its
/// detached signature.
pub fn build_signed_multipart(
	part: &MimePart,
	signature_der: &[u8],
	algorithm: SigningAlgorithm,
) -> SignedMultipart {
	let mut seed = [0u8; 16];
	rand::thread_rng().fill(&mut seed);
	let boundary = format!("----=_Part_{}", hex::encode(seed));

	let mut body = Vec::new();
	body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
	body.extend_from_slice(&part.to_bytes());
	body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
	body.extend_from_slice(
		b"Content-Type: application/pkcs7-signature; name=\"smime.p7s\"\r\n\
		Content-Transfer-Encoding: base64\r\n\
		Content-Disposition: attachment; filename=\"smime.p7s\"\r\n\r\n",
	);
	body.extend_from_slice(wrap_lines(&BASE64.encode(signature_der), 64).as_bytes());
	body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

	let content_type = format!(
		"multipart/signed; protocol=\"application/pkcs7-signature\"; micalg=\"{}\"; boundary=\"{}\"",
		algorithm.mic_alg_id(),
		boundary
	);
	SignedMultipart { content_type, body }
}

/// Assembles a full MIME message from top-level headers and a body, for
/// feeding received HTTP requests and responses into the MIME parser.
pub fn assemble_message(headers: &[(String, String)], body: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(body.len() + 256);
	for (name, value) in headers {
		out.extend_from_slice(name.as_bytes());
		out.extend_from_slice(b": ");
		out.extend_from_slice(value.as_bytes());
		out.extend_from_slice(b"\r\n");
	}
	out.extend_from_slice(b"\r\n");
	out.extend_from_slice(body);
	out
}

/// Extracts a parameter from a structured header value such as
/// `multipart/signed; micalg="sha-256"; boundary="x"`.
pub fn content_type_param(value: &str, name: &str) -> Option<String> {
	for segment in value.split(';').skip(1) {
		if let Some((key, val)) = segment.split_once('=') {
			if key.trim().eq_ignore_ascii_case(name) {
				return Some(val.trim().trim_matches('"').to_string());
			}
		}
	}
	None
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
	if from > haystack.len() {
		return None;
	}
	haystack[from..]
		.windows(needle.len())
		.position(|w| w == needle)
		.map(|p| from + p)
}

/// Splits a multipart body into its parts. The line break after each
/// boundary line and the one preceding the next boundary belong to the
/// delimiter and are stripped; everything between is preserved exactly.
pub fn split_multipart(body: &[u8], boundary: &str) -> Result<Vec<Vec<u8>>, As2Error> {
	let delim = format!("--{}", boundary).into_bytes();
	let mut parts = Vec::new();
	let mut pos = find(body, &delim, 0)
		.ok_or_else(|| As2Error::Mime("multipart boundary not found in body".to_string()))?;

	loop {
		let mut start = pos + delim.len();
		if body[start..].starts_with(b"--") {
			break;
		}
		if body[start..].starts_with(b"\r\n") {
			start += 2;
		} else if body[start..].starts_with(b"\n") {
			start += 1;
		}
		let next = find(body, &delim, start)
			.ok_or_else(|| As2Error::Mime("unterminated multipart body".to_string()))?;
		let mut end = next;
		if end >= 2 && &body[end - 2..end] == b"\r\n" {
			end -= 2;
		} else if end >= 1 && body[end - 1] == b'\n' {
			end -= 1;
		}
		parts.push(body[start..end].to_vec());
		pos = next;
	}
	Ok(parts)
}

/// A verified `multipart/signed` message: the exact content part bytes the
/// signature covered and the signer certificate.
pub struct VerifiedMessage {
	/// The content part (headers plus body), byte-exact.
	pub content: Vec<u8>,
	/// The certificate the signature verified against.
	pub signer: X509,
}

/// Verifies a full `multipart/signed` MIME message.
///
/// With a pinned certificate the signature must verify against exactly that
/// certificate and no chain building happens. Without one the signer
/// certificate embedded in the message is used and its chain is verified
/// against the trust anchors; with no anchors configured the chain check is
/// skipped and only the signature itself is validated.
pub fn verify_signed_message(
	message: &[u8],
	pinned: Option<&X509>,
	trust_anchors: &[X509],
) -> Result<VerifiedMessage, As2Error> {
	let parsed = mailparse::parse_mail(message).map_err(|e| As2Error::Mime(e.to_string()))?;
	if !parsed.ctype.mimetype.eq_ignore_ascii_case("multipart/signed") {
		return Err(As2Error::SignatureVerification(format!(
			"message is '{}', not multipart/signed",
			parsed.ctype.mimetype
		)));
	}
	let boundary = parsed
		.ctype
		.params
		.get("boundary")
		.cloned()
		.ok_or_else(|| As2Error::Mime("multipart/signed without boundary".to_string()))?;
	let body = parsed
		.get_body_raw()
		.map_err(|e| As2Error::Mime(e.to_string()))?;

	let parts = split_multipart(&body, &boundary)?;
	if parts.len() < 2 {
		return Err(As2Error::Mime(
			"multipart/signed needs a content part and a signature part".to_string(),
		));
	}
	let content = parts[0].clone();

	let signature_part =
		mailparse::parse_mail(&parts[1]).map_err(|e| As2Error::Mime(e.to_string()))?;
	let signature_der = signature_part
		.get_body_raw()
		.map_err(|e| As2Error::Mime(e.to_string()))?;
	let pkcs7 = Pkcs7::from_der(&signature_der)
		.map_err(|e| As2Error::SignatureVerification(e.to_string()))?;

	let mut certs = Stack::new()?;
	let mut flags = Pkcs7Flags::BINARY;
	let mut store_builder = X509StoreBuilder::new()?;
	match pinned {
		Some(cert) => {
			certs.push(cert.clone())?;
			flags |= Pkcs7Flags::NOINTERN | Pkcs7Flags::NOVERIFY;
		}
		None => {
			if trust_anchors.is_empty() {
				tracing::debug!("No trust anchors configured, skipping signer chain check");
				flags |= Pkcs7Flags::NOVERIFY;
			} else {
				for anchor in trust_anchors {
					store_builder.add_cert(anchor.clone())?;
				}
			}
		}
	}
	let store = store_builder.build();

	pkcs7
		.verify(&certs, &store, Some(&content), None, flags)
		.map_err(|e| As2Error::SignatureVerification(e.to_string()))?;

	let signer = match pinned {
		Some(cert) => cert.clone(),
		None => pkcs7
			.signed()
			.and_then(|signed| signed.certificates())
			.and_then(|embedded| pkcs7.signers(embedded, Pkcs7Flags::empty()).ok())
			.and_then(|signers| signers.get(0).map(|c| c.to_owned()))
			.ok_or_else(|| {
				As2Error::SignatureVerification(
					"signer certificate not found in message".to_string(),
				)
			})?,
	};

	Ok(VerifiedMessage { content, signer })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::settings::{As2ReceiverSettings, As2SenderSettings, DEFAULT_DISPOSITION_NOTIFICATION_TO};
	use crate::message_id::DEFAULT_MESSAGE_ID_TEMPLATE;
	use openssl::asn1::Asn1Time;
	use openssl::hash::MessageDigest;
	use openssl::pkey::PKey;
	use openssl::rsa::Rsa;
	use openssl::x509::X509NameBuilder;
	use peppol_keystore::{KeyStore, KeyStoreSource};
	use std::sync::Arc;
	use std::time::Duration;

	fn make_identity(cn: &str) -> (PKey<Private>, X509) {
		let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
		let mut name = X509NameBuilder::new().unwrap();
		name.append_entry_by_text("CN", cn).unwrap();
		let name = name.build();
		let mut builder = X509::builder().unwrap();
		builder.set_version(2).unwrap();
		builder.set_subject_name(&name).unwrap();
		builder.set_issuer_name(&name).unwrap();
		builder.set_pubkey(&key).unwrap();
		builder
			.set_not_before(&Asn1Time::days_from_now(0).unwrap())
			.unwrap();
		builder
			.set_not_after(&Asn1Time::days_from_now(365).unwrap())
			.unwrap();
		builder.sign(&key, MessageDigest::sha256()).unwrap();
		(key, builder.build())
	}

	fn make_store(cn: &str) -> Arc<KeyStore> {
		let (key, cert) = make_identity(cn);
		let mut builder = openssl::pkcs12::Pkcs12::builder();
		builder.name(cn);
		builder.pkey(&key);
		builder.cert(&cert);
		let der = builder.build2("secret").unwrap().to_der().unwrap();
		Arc::new(KeyStore::load(KeyStoreSource::Bytes(der), "secret").unwrap())
	}

	fn settings(algorithm: SigningAlgorithm) -> As2Settings {
		As2Settings {
			key_store: make_store("POP000092"),
			sender: As2SenderSettings {
				as2_id: "POP000092".to_string(),
				email: "sender@example.com".to_string(),
				key_alias: "POP000092".to_string(),
			},
			receiver: As2ReceiverSettings {
				as2_id: "POP000011".to_string(),
				key_alias: "POP000011".to_string(),
				url: "http://localhost:8878/as2".to_string(),
			},
			receiver_certificate: Vec::new(),
			partnership_name: "POP000092-POP000011".to_string(),
			signing_algorithm: algorithm,
			message_id_template: DEFAULT_MESSAGE_ID_TEMPLATE.to_string(),
			connect_timeout: Duration::from_secs(30),
			read_timeout: Duration::from_secs(60),
			content_transfer_encoding: ContentTransferEncoding::Binary,
			mime_type: "application/xml".to_string(),
			use_data_handler: true,
			disposition_notification_to: DEFAULT_DISPOSITION_NOTIFICATION_TO.to_string(),
			proxy: None,
			debug: false,
			outgoing_dumper: None,
			incoming_dumper: None,
		}
	}

	#[test]
	fn test_content_part_sets_explicit_content_type() {
		let mut s = settings(SigningAlgorithm::Sha256);
		s.use_data_handler = false;
		let part = build_content_part(&s, b"<Invoice/>").unwrap();
		assert_eq!(
			part.headers[0],
			("Content-Type".to_string(), "application/xml".to_string())
		);
		assert_eq!(
			part.headers[1],
			("Content-Transfer-Encoding".to_string(), "binary".to_string())
		);
		assert_eq!(part.body, b"<Invoice/>");
	}

	#[test]
	fn test_string_attachment_rejects_non_utf8() {
		let mut s = settings(SigningAlgorithm::Sha256);
		s.use_data_handler = false;
		assert!(matches!(
			build_content_part(&s, &[0xff, 0xfe, 0x00]),
			Err(As2Error::PayloadNotUtf8)
		));
		// Typed binary attachment has no such restriction.
		s.use_data_handler = true;
		assert!(build_content_part(&s, &[0xff, 0xfe, 0x00]).is_ok());
	}

	#[test]
	fn test_base64_body_encoding() {
		let mut s = settings(SigningAlgorithm::Sha256);
		s.content_transfer_encoding = ContentTransferEncoding::Base64;
		let part = build_content_part(&s, b"<Invoice/>").unwrap();
		let decoded = BASE64
			.decode(
				part.body
					.iter()
					.copied()
					.filter(|b| !b.is_ascii_whitespace())
					.collect::<Vec<u8>>(),
			)
			.unwrap();
		assert_eq!(decoded, b"<Invoice/>");
	}

	#[test]
	fn test_mic_differs_by_algorithm() {
		let sha1 = compute_mic(b"payload", SigningAlgorithm::Sha1);
		let sha256 = compute_mic(b"payload", SigningAlgorithm::Sha256);
		assert_ne!(sha1, sha256);
		assert_eq!(BASE64.decode(&sha1).unwrap().len(), 20);
		assert_eq!(BASE64.decode(&sha256).unwrap().len(), 32);
	}

	#[test]
	fn test_micalg_in_envelope_matches_mic_algorithm() {
		// The micalg advertised on the envelope must equal the algorithm the
		// MIC is actually computed with.
		for algorithm in [SigningAlgorithm::Sha1, SigningAlgorithm::Sha256] {
			let s = settings(algorithm);
			let part = build_content_part(&s, b"<Invoice/>").unwrap();
			let (key, cert) = s.key_store.key_pair("POP000092");
			let signature = sign_detached(&part.to_bytes(), key, cert).unwrap();
			let multipart = build_signed_multipart(&part, &signature, algorithm);
			assert_eq!(
				content_type_param(&multipart.content_type, "micalg").as_deref(),
				Some(algorithm.mic_alg_id())
			);
			assert_eq!(
				content_type_param(&multipart.content_type, "protocol").as_deref(),
				Some("application/pkcs7-signature")
			);
		}
	}

	#[test]
	fn test_split_multipart_preserves_part_bytes() {
		let part = MimePart {
			headers: vec![("Content-Type".to_string(), "application/xml".to_string())],
			body: b"<Invoice/>".to_vec(),
		};
		let multipart = build_signed_multipart(&part, b"\x30\x80", SigningAlgorithm::Sha256);
		let boundary = content_type_param(&multipart.content_type, "boundary").unwrap();
		let parts = split_multipart(&multipart.body, &boundary).unwrap();
		assert_eq!(parts.len(), 2);
		assert_eq!(parts[0], part.to_bytes());
	}

	#[test]
	fn test_sign_and_verify_round_trip() {
		let s = settings(SigningAlgorithm::Sha256);
		let part = build_content_part(&s, b"<Invoice/>").unwrap();
		let part_bytes = part.to_bytes();
		let (key, cert) = s.key_store.key_pair("POP000092");
		let signature = sign_detached(&part_bytes, key, cert).unwrap();
		let multipart = build_signed_multipart(&part, &signature, SigningAlgorithm::Sha256);

		let message = assemble_message(
			&[
				("MIME-Version".to_string(), "1.0".to_string()),
				("Content-Type".to_string(), multipart.content_type.clone()),
			],
			&multipart.body,
		);

		// Pinned verification against the signer certificate.
		let verified = verify_signed_message(&message, Some(cert), &[]).unwrap();
		assert_eq!(verified.content, part_bytes);

		// Unpinned verification extracts the signer from the message.
		let verified = verify_signed_message(&message, None, &[]).unwrap();
		assert_eq!(
			verified.signer.to_der().unwrap(),
			cert.to_der().unwrap()
		);

		// The MIC computed by the receiver over the verified content equals
		// the sender's MIC.
		assert_eq!(
			compute_mic(&verified.content, SigningAlgorithm::Sha256),
			compute_mic(&part_bytes, SigningAlgorithm::Sha256)
		);
	}

	#[test]
	fn test_verify_rejects_wrong_pinned_certificate() {
		let s = settings(SigningAlgorithm::Sha256);
		let part = build_content_part(&s, b"<Invoice/>").unwrap();
		let (key, cert) = s.key_store.key_pair("POP000092");
		let signature = sign_detached(&part.to_bytes(), key, cert).unwrap();
		let multipart = build_signed_multipart(&part, &signature, SigningAlgorithm::Sha256);
		let message = assemble_message(
			&[("Content-Type".to_string(), multipart.content_type.clone())],
			&multipart.body,
		);

		let (_, other_cert) = make_identity("SOMEONE-ELSE");
		let result = verify_signed_message(&message, Some(&other_cert), &[]);
		assert!(matches!(result, Err(As2Error::SignatureVerification(_))));
	}

	#[test]
	fn test_verify_rejects_tampered_content() {
		let s = settings(SigningAlgorithm::Sha256);
		let part = build_content_part(&s, b"<Invoice/>").unwrap();
		let (key, cert) = s.key_store.key_pair("POP000092");
		let signature = sign_detached(&part.to_bytes(), key, cert).unwrap();
		let multipart = build_signed_multipart(&part, &signature, SigningAlgorithm::Sha256);

		let tampered = String::from_utf8(multipart.body.clone())
			.unwrap()
			.replace("<Invoice/>", "<Invoice>1</Invoice>");
		let message = assemble_message(
			&[("Content-Type".to_string(), multipart.content_type.clone())],
			tampered.as_bytes(),
		);
		let result = verify_signed_message(&message, Some(cert), &[]);
		assert!(matches!(result, Err(As2Error::SignatureVerification(_))));
	}
}
