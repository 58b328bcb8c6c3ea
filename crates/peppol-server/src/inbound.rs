//! The inbound request pipeline: verify, unwrap, dispatch, acknowledge.

use crate::{IncomingMetadata, ServerState};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use peppol_as2::mdn::{self, MdnRequest, DISPOSITION_PROCESSED};
use peppol_as2::smime;
use peppol_sbd::StandardBusinessDocument;
use peppol_types::SigningAlgorithm;
use std::sync::Arc;

pub(crate) async fn handle_as2(
	State(state): State<Arc<ServerState>>,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let (status, response_headers, response_body) =
		process_incoming(&state, &headers, &body).await;

	let mut header_map = HeaderMap::new();
	for (name, value) in &response_headers {
		let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
			continue;
		};
		let Ok(value) = HeaderValue::from_str(value) else {
			continue;
		};
		header_map.insert(name, value);
	}
	(status, header_map, response_body).into_response()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
	headers
		.get(name)
		.and_then(|value| value.to_str().ok())
		.map(|value| value.to_string())
}

/// The MIC algorithm requested in `Disposition-Notification-Options`,
/// e.g. `signed-receipt-protocol=required, pkcs7-signature;
/// signed-receipt-micalg=required, sha-256`. Defaults to SHA-256.
fn requested_mic_algorithm(headers: &HeaderMap) -> SigningAlgorithm {
	let Some(options) = header_value(headers, "disposition-notification-options") else {
		return SigningAlgorithm::Sha256;
	};
	for segment in options.split(';') {
		let Some((key, value)) = segment.split_once('=') else {
			continue;
		};
		if !key.trim().eq_ignore_ascii_case("signed-receipt-micalg") {
			continue;
		}
		for token in value.split(',') {
			if let Some(algorithm) = SigningAlgorithm::from_mic_alg_id(token) {
				return algorithm;
			}
		}
	}
	SigningAlgorithm::Sha256
}

/// Full inbound processing for one AS2 request. Returns the HTTP status,
/// response headers and MDN body.
pub(crate) async fn process_incoming(
	state: &ServerState,
	headers: &HeaderMap,
	body: &[u8],
) -> (StatusCode, Vec<(String, String)>, Vec<u8>) {
	let header_pairs: Vec<(String, String)> = headers
		.iter()
		.map(|(name, value)| {
			(
				name.to_string(),
				String::from_utf8_lossy(value.as_bytes()).into_owned(),
			)
		})
		.collect();
	if let Some(dumper) = &state.incoming_dumper {
		dumper.dump(&header_pairs, body);
	}

	let Some(as2_from) = header_value(headers, "as2-from") else {
		tracing::warn!("Rejecting AS2 request without AS2-From header");
		return plain_error(StatusCode::BAD_REQUEST, "missing AS2-From header");
	};
	let as2_to =
		header_value(headers, "as2-to").unwrap_or_else(|| state.key_alias.clone());
	let original_message_id = header_value(headers, "message-id");
	let Some(content_type) = header_value(headers, "content-type") else {
		return plain_error(StatusCode::BAD_REQUEST, "missing Content-Type header");
	};
	let mic_algorithm = requested_mic_algorithm(headers);

	let metadata = IncomingMetadata {
		as2_from: as2_from.clone(),
		as2_to: as2_to.clone(),
		message_id: original_message_id.clone(),
	};

	tracing::info!(
		as2_from = %as2_from,
		as2_to = %as2_to,
		message_id = original_message_id.as_deref(),
		"Received AS2 message"
	);

	// S/MIME verification, pinned to the stored partner certificate when
	// one is known.
	let message = smime::assemble_message(
		&[
			("MIME-Version".to_string(), "1.0".to_string()),
			("Content-Type".to_string(), content_type),
		],
		body,
	);
	let pinned = state
		.key_store
		.read()
		.await
		.partner_certificate(&as2_from)
		.cloned();
	let verified = match smime::verify_signed_message(&message, pinned.as_ref(), &[]) {
		Ok(verified) => verified,
		Err(e) => {
			tracing::warn!(as2_from = %as2_from, error = %e, "Inbound message failed verification");
			return mdn_response(
				state,
				&metadata,
				mic_algorithm,
				None,
				&mdn::disposition_error("authentication-failed"),
				"The message signature could not be verified.",
			)
			.await;
		}
	};

	let mic = smime::compute_mic(&verified.content, mic_algorithm);

	// Learn the partner certificate from the first verified exchange.
	if pinned.is_none() && state.save_key_store_changes {
		let mut key_store = state.key_store.write().await;
		match key_store.set_partner_certificate(as2_from.clone(), verified.signer.clone()) {
			Ok(true) => {
				if key_store.is_file_backed() {
					if let Err(e) = key_store.save() {
						tracing::warn!(error = %e, "Failed to persist learned partner certificate");
					}
				}
			}
			Ok(false) => {}
			Err(e) => {
				tracing::warn!(error = %e, "Failed to store learned partner certificate")
			}
		}
	}

	// Unwrap the SBD from the verified content part.
	let sbd_bytes = match extract_sbd_bytes(&verified.content) {
		Ok(bytes) => bytes,
		Err(reason) => {
			tracing::warn!(as2_from = %as2_from, reason = %reason, "Inbound message carries no usable body");
			return mdn_response(
				state,
				&metadata,
				mic_algorithm,
				Some(&mic),
				&mdn::disposition_error("unexpected-processing-error"),
				"The message body could not be read.",
			)
			.await;
		}
	};
	let sbd = match StandardBusinessDocument::parse(&sbd_bytes) {
		Ok(sbd) => sbd,
		Err(e) => {
			tracing::warn!(as2_from = %as2_from, error = %e, "Inbound body is not a Standard Business Document");
			return mdn_response(
				state,
				&metadata,
				mic_algorithm,
				Some(&mic),
				&mdn::disposition_error("unexpected-processing-error"),
				"The message body is not a Standard Business Document.",
			)
			.await;
		}
	};

	tracing::info!(
		sender = %sbd.sender,
		receiver = %sbd.receiver,
		instance_id = %sbd.instance_identifier,
		"Parsed inbound Standard Business Document"
	);

	// Dispatch to all registered handlers in registration order.
	let mut failures = 0usize;
	for (index, handler) in state.handlers.iter().enumerate() {
		if let Err(e) = handler.on_incoming_sbd(&metadata, &sbd).await {
			failures += 1;
			tracing::warn!(handler = index, error = %e, "Incoming handler failed");
			if state.abort_on_handler_error {
				break;
			}
		}
	}

	let (disposition, text) = if failures == 0 {
		(
			DISPOSITION_PROCESSED.to_string(),
			"The message was processed.".to_string(),
		)
	} else {
		(
			mdn::disposition_error("unexpected-processing-error"),
			format!("{} handler(s) failed to process the message.", failures),
		)
	};
	mdn_response(state, &metadata, mic_algorithm, Some(&mic), &disposition, &text).await
}

/// The SBD XML inside the verified content part: either the part body
/// itself or the first subpart of a nested multipart.
fn extract_sbd_bytes(content_part: &[u8]) -> Result<Vec<u8>, String> {
	let parsed = mailparse::parse_mail(content_part).map_err(|e| e.to_string())?;
	let target = if parsed.subparts.is_empty() {
		&parsed
	} else {
		&parsed.subparts[0]
	};
	let body = target.get_body_raw().map_err(|e| e.to_string())?;
	if body.is_empty() {
		return Err("empty message body".to_string());
	}
	Ok(body)
}

async fn mdn_response(
	state: &ServerState,
	metadata: &IncomingMetadata,
	mic_algorithm: SigningAlgorithm,
	mic: Option<&str>,
	disposition: &str,
	text: &str,
) -> (StatusCode, Vec<(String, String)>, Vec<u8>) {
	let request = MdnRequest {
		original_sender_as2_id: metadata.as2_from.clone(),
		receiver_as2_id: metadata.as2_to.clone(),
		original_message_id: metadata.message_id.clone(),
		mic: mic.map(|m| m.to_string()),
		mic_algorithm,
		disposition: disposition.to_string(),
		text: text.to_string(),
	};

	let key_store = state.key_store.read().await;
	let (key, cert) = key_store.key_pair(&state.key_alias);
	match mdn::build_signed_mdn(key, cert, &request) {
		Ok(built) => {
			tracing::debug!(
				mdn_message_id = %built.message_id,
				disposition = disposition,
				"Returning MDN"
			);
			(StatusCode::OK, built.headers, built.body)
		}
		Err(e) => {
			tracing::error!(error = %e, "Failed to build MDN");
			plain_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to build MDN")
		}
	}
}

fn plain_error(
	status: StatusCode,
	message: &str,
) -> (StatusCode, Vec<(String, String)>, Vec<u8>) {
	(
		status,
		vec![("Content-Type".to_string(), "text/plain".to_string())],
		message.as_bytes().to_vec(),
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{As2ServerBuilder, IncomingSbdHandlerInterface, ServerError};
	use async_trait::async_trait;
	use openssl::asn1::Asn1Time;
	use openssl::hash::MessageDigest;
	use openssl::pkcs12::Pkcs12;
	use openssl::pkey::{PKey, Private};
	use openssl::rsa::Rsa;
	use openssl::stack::Stack;
	use openssl::x509::{X509, X509NameBuilder};
	use peppol_keystore::{KeyStore, KeyStoreSource};
	use peppol_sbd::{PayloadElement, SbdBuilder};
	use peppol_types::{DocumentTypeIdentifier, ParticipantIdentifier, ProcessIdentifier};
	use std::sync::Mutex;

	fn init_tracing() {
		tracing_subscriber::fmt()
			.with_env_filter(
				tracing_subscriber::EnvFilter::try_from_default_env()
					.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
			)
			.try_init()
			.ok();
	}

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

	fn make_key_store(cn: &str, partners: &[&X509]) -> KeyStore {
		let (key, cert) = make_identity(cn);
		let mut builder = Pkcs12::builder();
		builder.name(cn);
		builder.pkey(&key);
		builder.cert(&cert);
		if !partners.is_empty() {
			let mut stack = Stack::new().unwrap();
			for partner in partners {
				stack.push((*partner).clone()).unwrap();
			}
			builder.ca(stack);
		}
		let der = builder.build2("secret").unwrap().to_der().unwrap();
		KeyStore::load(KeyStoreSource::Bytes(der), "secret").unwrap()
	}

	fn sample_sbd_bytes() -> Vec<u8> {
		let payload = PayloadElement::from_bytes(
			b"<Invoice xmlns=\"urn:oasis:names:specification:ubl:schema:xsd:Invoice-2\"><ID>42</ID></Invoice>",
		)
		.unwrap();
		SbdBuilder::new(
			ParticipantIdentifier::from_value("9915:sender"),
			ParticipantIdentifier::from_value("9999:test-receiver"),
			DocumentTypeIdentifier::from_value("urn:test::Invoice"),
			ProcessIdentifier::from_value("urn:test:process"),
			payload,
		)
		.build()
		.serialize(None)
		.unwrap()
	}

	/// Builds a signed AS2 request the way the sending side does.
	fn signed_request(
		sender_key: &PKey<Private>,
		sender_cert: &X509,
		algorithm: SigningAlgorithm,
		sbd_bytes: &[u8],
	) -> (HeaderMap, Vec<u8>, String) {
		let part = smime::MimePart {
			headers: vec![
				("Content-Type".to_string(), "application/xml".to_string()),
				("Content-Transfer-Encoding".to_string(), "binary".to_string()),
			],
			body: sbd_bytes.to_vec(),
		};
		let part_bytes = part.to_bytes();
		let mic = smime::compute_mic(&part_bytes, algorithm);
		let signature = smime::sign_detached(&part_bytes, sender_key, sender_cert).unwrap();
		let multipart = smime::build_signed_multipart(&part, &signature, algorithm);

		let mut headers = HeaderMap::new();
		headers.insert("AS2-Version", HeaderValue::from_static("1.0"));
		headers.insert("AS2-From", HeaderValue::from_static("POP000092"));
		headers.insert("AS2-To", HeaderValue::from_static("POP000011"));
		headers.insert(
			"Message-ID",
			HeaderValue::from_static("<test-message@POP000092_POP000011>"),
		);
		headers.insert(
			"Disposition-Notification-To",
			HeaderValue::from_static("dummy"),
		);
		headers.insert(
			"Disposition-Notification-Options",
			HeaderValue::from_str(&format!(
				"signed-receipt-protocol=required, pkcs7-signature; signed-receipt-micalg=required, {}",
				algorithm.mic_alg_id()
			))
			.unwrap(),
		);
		headers.insert(
			"Content-Type",
			HeaderValue::from_str(&multipart.content_type).unwrap(),
		);
		(headers, multipart.body, mic)
	}

	struct RecordingHandler {
		name: &'static str,
		log: Arc<Mutex<Vec<(String, String)>>>,
		fail: bool,
	}

	#[async_trait]
	impl IncomingSbdHandlerInterface for RecordingHandler {
		async fn on_incoming_sbd(
			&self,
			_metadata: &IncomingMetadata,
			sbd: &StandardBusinessDocument,
		) -> Result<(), ServerError> {
			self.log
				.lock()
				.unwrap()
				.push((self.name.to_string(), sbd.instance_identifier.clone()));
			if self.fail {
				return Err(ServerError::Handler("boom".to_string()));
			}
			Ok(())
		}
	}

	#[tokio::test]
	async fn test_inbound_dispatch_in_registration_order() {
		init_tracing();
		let (sender_key, sender_cert) = make_identity("POP000092");
		let server = As2ServerBuilder::new(
			make_key_store("POP000011", &[&sender_cert]),
			"POP000011",
		);
		let log = Arc::new(Mutex::new(Vec::new()));
		let server = server
			.register_handler(Arc::new(RecordingHandler {
				name: "first",
				log: log.clone(),
				fail: false,
			}))
			.register_handler(Arc::new(RecordingHandler {
				name: "second",
				log: log.clone(),
				fail: false,
			}))
			.build();

		let sbd_bytes = sample_sbd_bytes();
		let (headers, body, mic) = signed_request(
			&sender_key,
			&sender_cert,
			SigningAlgorithm::Sha256,
			&sbd_bytes,
		);

		let (status, response_headers, response_body) =
			process_incoming(&server.state, &headers, &body).await;
		assert_eq!(status, StatusCode::OK);

		// Both handlers ran, in order, on the identical parsed document.
		let entries = log.lock().unwrap().clone();
		assert_eq!(entries.len(), 2);
		assert_eq!(entries[0].0, "first");
		assert_eq!(entries[1].0, "second");
		assert_eq!(entries[0].1, entries[1].1);

		// The response is a signed MDN acknowledging success with the
		// sender's MIC.
		let content_type = response_headers
			.iter()
			.find(|(name, _)| name == "Content-Type")
			.map(|(_, value)| value.clone())
			.unwrap();
		let server_cert = {
			let key_store = server.state.key_store.try_read().unwrap();
			let (_, cert) = key_store.key_pair("POP000011");
			cert.to_owned()
		};
		let info = mdn::parse_mdn(&content_type, &response_body, Some(&server_cert), Some(&mic))
			.unwrap();
		assert!(info.signature_verified);
		assert!(info.is_processed());
		assert_eq!(info.mic_matched, Some(true));
		assert_eq!(
			info.original_message_id.as_deref(),
			Some("<test-message@POP000092_POP000011>")
		);
	}

	#[tokio::test]
	async fn test_handler_failure_yields_error_mdn_but_runs_all_handlers() {
		let (sender_key, sender_cert) = make_identity("POP000092");
		let log = Arc::new(Mutex::new(Vec::new()));
		let server = As2ServerBuilder::new(
			make_key_store("POP000011", &[&sender_cert]),
			"POP000011",
		)
		.register_handler(Arc::new(RecordingHandler {
			name: "failing",
			log: log.clone(),
			fail: true,
		}))
		.register_handler(Arc::new(RecordingHandler {
			name: "second",
			log: log.clone(),
			fail: false,
		}))
		.build();

		let sbd_bytes = sample_sbd_bytes();
		let (headers, body, _mic) = signed_request(
			&sender_key,
			&sender_cert,
			SigningAlgorithm::Sha256,
			&sbd_bytes,
		);
		let (status, response_headers, response_body) =
			process_incoming(&server.state, &headers, &body).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(log.lock().unwrap().len(), 2);

		let content_type = response_headers
			.iter()
			.find(|(name, _)| name == "Content-Type")
			.map(|(_, value)| value.clone())
			.unwrap();
		let info = mdn::parse_mdn(&content_type, &response_body, None, None).unwrap();
		assert!(!info.is_processed());
	}

	#[tokio::test]
	async fn test_unknown_partner_rejected_when_tampered() {
		let (sender_key, sender_cert) = make_identity("POP000092");
		// The server does not know the sender's certificate.
		let server = As2ServerBuilder::new(make_key_store("POP000011", &[]), "POP000011")
			.build();

		let sbd_bytes = sample_sbd_bytes();
		let (headers, body, _mic) = signed_request(
			&sender_key,
			&sender_cert,
			SigningAlgorithm::Sha1,
			&sbd_bytes,
		);

		// Untampered: verifies against the embedded signer certificate.
		let (status, _, _) = process_incoming(&server.state, &headers, &body).await;
		assert_eq!(status, StatusCode::OK);

		// Tampered content must be rejected with an error MDN.
		let tampered = String::from_utf8(body.clone())
			.unwrap()
			.replace("<ID>42</ID>", "<ID>43</ID>");
		let (status, response_headers, response_body) =
			process_incoming(&server.state, &headers, tampered.as_bytes()).await;
		assert_eq!(status, StatusCode::OK);
		let content_type = response_headers
			.iter()
			.find(|(name, _)| name == "Content-Type")
			.map(|(_, value)| value.clone())
			.unwrap();
		let info = mdn::parse_mdn(&content_type, &response_body, None, None).unwrap();
		assert!(info.disposition.contains("authentication-failed"));
	}

	#[tokio::test]
	async fn test_learned_partner_certificate_is_persisted() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("server.p12");
		{
			let (key, cert) = make_identity("POP000011");
			let mut builder = Pkcs12::builder();
			builder.name("POP000011");
			builder.pkey(&key);
			builder.cert(&cert);
			std::fs::write(&path, builder.build2("secret").unwrap().to_der().unwrap())
				.unwrap();
		}

		let key_store = KeyStore::load(KeyStoreSource::File(path.clone()), "secret").unwrap();
		let server = As2ServerBuilder::new(key_store, "POP000011")
			.with_save_key_store_changes(true)
			.build();

		let (sender_key, sender_cert) = make_identity("POP000092");
		let sbd_bytes = sample_sbd_bytes();
		let (headers, body, _mic) = signed_request(
			&sender_key,
			&sender_cert,
			SigningAlgorithm::Sha256,
			&sbd_bytes,
		);
		let (status, _, _) = process_incoming(&server.state, &headers, &body).await;
		assert_eq!(status, StatusCode::OK);

		let reloaded = KeyStore::load(KeyStoreSource::File(path), "secret").unwrap();
		assert!(reloaded.partner_certificate("POP000092").is_some());
	}

	#[tokio::test]
	async fn test_missing_as2_from_is_a_plain_400() {
		let server =
			As2ServerBuilder::new(make_key_store("POP000011", &[]), "POP000011").build();
		let headers = HeaderMap::new();
		let (status, _, _) = process_incoming(&server.state, &headers, b"x").await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
	}
}
