//! MDN construction and parsing.
//!
//! A Message Disposition Notification is a signed `multipart/signed`
//! envelope whose content part is a `multipart/report` carrying a human
//! readable text part and a machine readable
//! `message/disposition-notification` part. The MIC inside binds the
//! receipt to the original message body.

use crate::smime::{self, assemble_message, build_signed_multipart, sign_detached, MimePart};
use crate::{message_id, As2Error};
use chrono::Utc;
use openssl::pkey::{PKeyRef, Private};
use openssl::x509::{X509, X509Ref};
use peppol_types::{MdnInfo, SigningAlgorithm};

/// Disposition reported for successfully processed messages.
pub const DISPOSITION_PROCESSED: &str = "automatic-action/MDN-sent-automatically; processed";

/// Disposition reported when processing failed.
pub fn disposition_error(reason: &str) -> String {
	format!(
		"automatic-action/MDN-sent-automatically; processed/error: {}",
		reason
	)
}

/// Everything needed to synthesize an MDN for a received message.
#[derive(Debug, Clone)]
pub struct MdnRequest {
	/// AS2 id of the original sender; the MDN is addressed to them.
	pub original_sender_as2_id: String,
	/// AS2 id of the receiving side; the MDN is issued by them.
	pub receiver_as2_id: String,
	/// `Message-ID` of the original message, echoed back.
	pub original_message_id: Option<String>,
	/// MIC digest computed over the received content part.
	pub mic: Option<String>,
	/// Algorithm the MIC was computed with, as requested by the sender.
	pub mic_algorithm: SigningAlgorithm,
	/// Disposition line, `processed` or an error form.
	pub disposition: String,
	/// Human readable explanation placed in the text part.
	pub text: String,
}

/// A built MDN ready to be returned in the HTTP response.
#[derive(Debug, Clone)]
pub struct BuiltMdn {
	/// Response headers including the envelope `Content-Type`.
	pub headers: Vec<(String, String)>,
	/// The `multipart/signed` response body.
	pub body: Vec<u8>,
	/// The generated `Message-ID` of the MDN itself.
	pub message_id: String,
}

/// Builds a signed MDN describing the outcome of an inbound message.
pub fn build_signed_mdn(
	key: &PKeyRef<Private>,
	cert: &X509Ref,
	request: &MdnRequest,
) -> Result<BuiltMdn, As2Error> {
	let mut machine_fields = vec![
		("Reporting-UA".to_string(), "peppol-as2".to_string()),
		(
			"Original-Recipient".to_string(),
			format!("rfc822; {}", request.receiver_as2_id),
		),
		(
			"Final-Recipient".to_string(),
			format!("rfc822; {}", request.receiver_as2_id),
		),
		("Disposition".to_string(), request.disposition.clone()),
	];
	if let Some(original) = &request.original_message_id {
		machine_fields.insert(
			3,
			("Original-Message-ID".to_string(), original.clone()),
		);
	}
	if let Some(mic) = &request.mic {
		machine_fields.push((
			"Received-Content-MIC".to_string(),
			format!("{}, {}", mic, request.mic_algorithm.mic_alg_id()),
		));
	}

	let text_part = MimePart {
		headers: vec![(
			"Content-Type".to_string(),
			"text/plain; charset=US-ASCII".to_string(),
		)],
		body: format!("{}\r\n", request.text).into_bytes(),
	};
	let machine_part = MimePart {
		headers: vec![(
			"Content-Type".to_string(),
			"message/disposition-notification".to_string(),
		)],
		body: machine_fields
			.iter()
			.map(|(name, value)| format!("{}: {}\r\n", name, value))
			.collect::<String>()
			.into_bytes(),
	};

	let mut seed = [0u8; 16];
	use rand::Rng;
	rand::thread_rng().fill(&mut seed);
	let report_boundary = format!("----=_Report_{}", hex::encode(seed));
	let mut report_body = Vec::new();
	for part in [&text_part, &machine_part] {
		report_body.extend_from_slice(format!("--{}\r\n", report_boundary).as_bytes());
		report_body.extend_from_slice(&part.to_bytes());
		report_body.extend_from_slice(b"\r\n");
	}
	report_body.extend_from_slice(format!("--{}--\r\n", report_boundary).as_bytes());

	let report_part = MimePart {
		headers: vec![(
			"Content-Type".to_string(),
			format!(
				"multipart/report; report-type=disposition-notification; boundary=\"{}\"",
				report_boundary
			),
		)],
		body: report_body,
	};

	let signature = sign_detached(&report_part.to_bytes(), key, cert)?;
	let multipart = build_signed_multipart(&report_part, &signature, request.mic_algorithm);

	let message_id = format!(
		"<{}>",
		message_id::expand(
			"peppol-mdn-$date.ddMMyyyyHHmmssZ$-$rand.1234$@$msg.sender.as2_id$_$msg.receiver.as2_id$",
			&request.receiver_as2_id,
			&request.original_sender_as2_id,
			Utc::now(),
		)
	);

	let headers = vec![
		("AS2-Version".to_string(), "1.0".to_string()),
		("AS2-From".to_string(), request.receiver_as2_id.clone()),
		(
			"AS2-To".to_string(),
			request.original_sender_as2_id.clone(),
		),
		("Message-ID".to_string(), message_id.clone()),
		("Date".to_string(), Utc::now().to_rfc2822()),
		("MIME-Version".to_string(), "1.0".to_string()),
		("Content-Type".to_string(), multipart.content_type.clone()),
		(
			"Subject".to_string(),
			"Message Disposition Notification".to_string(),
		),
	];

	Ok(BuiltMdn {
		headers,
		body: multipart.body,
		message_id,
	})
}

/// Parses and verifies an MDN received in an HTTP response.
///
/// The signature is checked against the pinned receiver certificate and the
/// received MIC is compared against the MIC computed over the outbound
/// body. An unsigned MDN fails verification; its fields are still parsed so
/// the caller can inspect them.
pub fn parse_mdn(
	content_type: &str,
	body: &[u8],
	receiver_certificate: Option<&X509>,
	expected_mic: Option<&str>,
) -> Result<MdnInfo, As2Error> {
	let message = assemble_message(
		&[
			("MIME-Version".to_string(), "1.0".to_string()),
			("Content-Type".to_string(), content_type.to_string()),
		],
		body,
	);

	let mimetype = content_type
		.split(';')
		.next()
		.unwrap_or("")
		.trim()
		.to_ascii_lowercase();

	let (report_bytes, signature_verified) = if mimetype == "multipart/signed" {
		let verified = smime::verify_signed_message(&message, receiver_certificate, &[])?;
		(verified.content, true)
	} else {
		// Unsigned MDN. Parse the fields anyway, flagged as unverified.
		tracing::warn!(content_type = %content_type, "Received an unsigned MDN");
		(message, false)
	};

	let mut info = parse_disposition_fields(&report_bytes)?;
	info.signature_verified = signature_verified;
	info.mic_matched = match (&info.received_mic, expected_mic) {
		(Some(received), Some(expected)) => Some(received == expected),
		_ => None,
	};
	Ok(info)
}

/// Digs the `message/disposition-notification` part out of a (possibly
/// nested) report body and parses its fields.
fn parse_disposition_fields(report_bytes: &[u8]) -> Result<MdnInfo, As2Error> {
	let parsed =
		mailparse::parse_mail(report_bytes).map_err(|e| As2Error::Mime(e.to_string()))?;
	let disposition_body = find_disposition_part(&parsed)
		.ok_or_else(|| As2Error::MdnMissing("no disposition-notification part".to_string()))?;

	let mut info = MdnInfo::default();
	for line in disposition_body.lines() {
		let Some((name, value)) = line.split_once(':') else {
			continue;
		};
		let value = value.trim();
		if name.eq_ignore_ascii_case("Disposition") {
			info.disposition = value.to_string();
		} else if name.eq_ignore_ascii_case("Original-Message-ID") {
			info.original_message_id = Some(value.to_string());
		} else if name.eq_ignore_ascii_case("Received-Content-MIC") {
			match value.rsplit_once(',') {
				Some((mic, algorithm)) => {
					info.received_mic = Some(mic.trim().to_string());
					info.mic_algorithm = Some(algorithm.trim().to_string());
				}
				None => info.received_mic = Some(value.to_string()),
			}
		}
	}

	if info.disposition.is_empty() {
		return Err(As2Error::MdnMissing(
			"disposition-notification part has no Disposition field".to_string(),
		));
	}
	Ok(info)
}

fn find_disposition_part(parsed: &mailparse::ParsedMail<'_>) -> Option<String> {
	if parsed
		.ctype
		.mimetype
		.eq_ignore_ascii_case("message/disposition-notification")
	{
		return parsed.get_body().ok();
	}
	for subpart in &parsed.subparts {
		if let Some(found) = find_disposition_part(subpart) {
			return Some(found);
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::smime::compute_mic;
	use openssl::asn1::Asn1Time;
	use openssl::hash::MessageDigest;
	use openssl::pkey::PKey;
	use openssl::rsa::Rsa;
	use openssl::x509::{X509, X509NameBuilder};

	fn make_identity(cn: &str) -> (PKey<openssl::pkey::Private>, X509) {
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

	fn request(mic: &str) -> MdnRequest {
		MdnRequest {
			original_sender_as2_id: "POP000092".to_string(),
			receiver_as2_id: "POP000011".to_string(),
			original_message_id: Some("<original@x_y>".to_string()),
			mic: Some(mic.to_string()),
			mic_algorithm: SigningAlgorithm::Sha256,
			disposition: DISPOSITION_PROCESSED.to_string(),
			text: "The message was processed.".to_string(),
		}
	}

	#[test]
	fn test_mdn_round_trip() {
		let (key, cert) = make_identity("POP000011");
		let mic = compute_mic(b"original body part", SigningAlgorithm::Sha256);
		let built = build_signed_mdn(&key, &cert, &request(&mic)).unwrap();

		let content_type = built
			.headers
			.iter()
			.find(|(name, _)| name == "Content-Type")
			.map(|(_, value)| value.clone())
			.unwrap();

		let info = parse_mdn(&content_type, &built.body, Some(&cert), Some(&mic)).unwrap();
		assert!(info.signature_verified);
		assert!(info.is_processed());
		assert_eq!(info.original_message_id.as_deref(), Some("<original@x_y>"));
		assert_eq!(info.received_mic.as_deref(), Some(mic.as_str()));
		assert_eq!(info.mic_algorithm.as_deref(), Some("sha-256"));
		assert_eq!(info.mic_matched, Some(true));
	}

	#[test]
	fn test_mdn_mic_mismatch_detected() {
		let (key, cert) = make_identity("POP000011");
		let mic = compute_mic(b"original body part", SigningAlgorithm::Sha256);
		let built = build_signed_mdn(&key, &cert, &request(&mic)).unwrap();
		let content_type = built
			.headers
			.iter()
			.find(|(name, _)| name == "Content-Type")
			.map(|(_, value)| value.clone())
			.unwrap();

		let other_mic = compute_mic(b"tampered body part", SigningAlgorithm::Sha256);
		let info =
			parse_mdn(&content_type, &built.body, Some(&cert), Some(&other_mic)).unwrap();
		assert_eq!(info.mic_matched, Some(false));
	}

	#[test]
	fn test_mdn_error_disposition() {
		let (key, cert) = make_identity("POP000011");
		let mut req = request("unused");
		req.mic = None;
		req.disposition = disposition_error("unexpected-processing-error");
		let built = build_signed_mdn(&key, &cert, &req).unwrap();
		let content_type = built
			.headers
			.iter()
			.find(|(name, _)| name == "Content-Type")
			.map(|(_, value)| value.clone())
			.unwrap();

		let info = parse_mdn(&content_type, &built.body, Some(&cert), None).unwrap();
		assert!(!info.is_processed());
		assert_eq!(info.mic_matched, None);
	}

	#[test]
	fn test_mdn_wrong_signer_rejected() {
		let (key, cert) = make_identity("POP000011");
		let (_, other) = make_identity("IMPOSTOR");
		let mic = compute_mic(b"x", SigningAlgorithm::Sha256);
		let built = build_signed_mdn(&key, &cert, &request(&mic)).unwrap();
		let content_type = built
			.headers
			.iter()
			.find(|(name, _)| name == "Content-Type")
			.map(|(_, value)| value.clone())
			.unwrap();

		let result = parse_mdn(&content_type, &built.body, Some(&other), Some(&mic));
		assert!(matches!(result, Err(As2Error::SignatureVerification(_))));
	}
}
