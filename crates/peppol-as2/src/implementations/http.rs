//! HTTP AS2 transport implementation.
//!
//! One instance performs one synchronous request/response round trip:
//! content part assembly, MIC computation, S/MIME signing, the HTTP POST,
//! and MDN parsing and verification. Failures after the send boundary are
//! recorded on the returned response instead of being raised.

use crate::{mdn, message_id, smime};
use crate::{As2Error, As2Request, As2Settings, As2TransportInterface, TransportFactory};
use async_trait::async_trait;
use chrono::Utc;
use openssl::x509::X509;
use peppol_types::As2Response;

/// AS2 transport over plain reqwest.
#[derive(Debug, Default)]
pub struct HttpAs2Transport;

impl HttpAs2Transport {
	/// Creates a transport instance.
	pub fn new() -> Self {
		Self
	}

	async fn round_trip(
		&self,
		settings: &As2Settings,
		request: &As2Request,
	) -> Result<As2Response, As2Error> {
		let message_id = format!(
			"<{}>",
			message_id::expand(
				&settings.message_id_template,
				&settings.sender.as2_id,
				&settings.receiver.as2_id,
				Utc::now(),
			)
		);

		let (key, cert) = settings.key_store.key_pair(&settings.sender.key_alias);
		let content_part = smime::build_content_part(settings, &request.payload)?;
		let part_bytes = content_part.to_bytes();
		let mic = smime::compute_mic(&part_bytes, settings.signing_algorithm);
		let signature = smime::sign_detached(&part_bytes, key, cert)?;
		let multipart =
			smime::build_signed_multipart(&content_part, &signature, settings.signing_algorithm);

		let headers: Vec<(String, String)> = [
			("AS2-Version", "1.0".to_string()),
			("AS2-From", settings.sender.as2_id.clone()),
			("AS2-To", settings.receiver.as2_id.clone()),
			("From", settings.sender.email.clone()),
			("Subject", request.subject.clone()),
			("Message-ID", message_id.clone()),
			("Date", Utc::now().to_rfc2822()),
			("MIME-Version", "1.0".to_string()),
			("Content-Type", multipart.content_type.clone()),
			(
				"Content-Transfer-Encoding",
				settings
					.content_transfer_encoding
					.as_header_value()
					.to_string(),
			),
			(
				"Disposition-Notification-To",
				settings.disposition_notification_to.clone(),
			),
			(
				"Disposition-Notification-Options",
				settings.mdn_disposition_options(),
			),
		]
		.into_iter()
		.map(|(name, value)| (name.to_string(), value))
		.collect();

		if let Some(dumper) = &settings.outgoing_dumper {
			dumper.dump(&message_id, &headers, &multipart.body);
		}
		if settings.debug {
			tracing::debug!(
				message_id = %message_id,
				body = %String::from_utf8_lossy(&multipart.body),
				"Outbound AS2 message"
			);
		}

		let mut builder = reqwest::Client::builder()
			.connect_timeout(settings.connect_timeout)
			.read_timeout(settings.read_timeout);
		if let Some(proxy) = &settings.proxy {
			builder = builder.proxy(
				reqwest::Proxy::all(proxy.as_str())
					.map_err(|e| As2Error::Transport(e.to_string()))?,
			);
		}
		let client = builder
			.build()
			.map_err(|e| As2Error::Transport(e.to_string()))?;

		let mut http_request = client.post(&settings.receiver.url);
		for (name, value) in &headers {
			http_request = http_request.header(name.as_str(), value.as_str());
		}

		tracing::info!(
			message_id = %message_id,
			url = %settings.receiver.url,
			partnership = %settings.partnership_name,
			"Sending AS2 message"
		);

		let http_response = match http_request.body(multipart.body).send().await {
			Ok(response) => response,
			Err(e) => {
				tracing::warn!(error = %e, "AS2 HTTP round trip failed");
				return Ok(As2Response::failure(format!("transport error: {}", e)));
			}
		};

		let status = http_response.status();
		let response_headers: Vec<(String, String)> = http_response
			.headers()
			.iter()
			.map(|(name, value)| {
				(
					name.to_string(),
					String::from_utf8_lossy(value.as_bytes()).into_owned(),
				)
			})
			.collect();

		let body = match http_response.bytes().await {
			Ok(bytes) => bytes.to_vec(),
			Err(e) => {
				return Ok(As2Response {
					mdn: None,
					received_at: Utc::now(),
					headers: response_headers,
					exception: Some(format!("failed to read response body: {}", e)),
					raw_text: String::new(),
				});
			}
		};

		if let Some(dumper) = &settings.incoming_dumper {
			dumper.dump(&response_headers, &body);
		}

		let mut response = As2Response {
			mdn: None,
			received_at: Utc::now(),
			headers: response_headers,
			exception: None,
			raw_text: String::from_utf8_lossy(&body).into_owned(),
		};

		if !status.is_success() {
			response.exception = Some(format!("HTTP status {}", status));
			return Ok(response);
		}

		let content_type = response
			.header("content-type")
			.map(str::to_string)
			.unwrap_or_default();
		let receiver_certificate = match X509::from_der(&settings.receiver_certificate) {
			Ok(cert) => Some(cert),
			Err(e) => {
				tracing::warn!(
					error = %e,
					"Receiver certificate unavailable, MDN signature cannot be pinned"
				);
				None
			}
		};

		match mdn::parse_mdn(
			&content_type,
			&body,
			receiver_certificate.as_ref(),
			Some(&mic),
		) {
			Ok(info) => {
				if !info.signature_verified {
					response.exception = Some("MDN is not signed".to_string());
				} else if info.mic_matched == Some(false) {
					response.exception =
						Some("MDN MIC does not match the outbound content".to_string());
				}
				response.mdn = Some(info);
			}
			Err(e) => {
				response.exception = Some(e.to_string());
			}
		}

		Ok(response)
	}
}

#[async_trait]
impl As2TransportInterface for HttpAs2Transport {
	async fn send(&self, settings: &As2Settings, request: &As2Request) -> As2Response {
		match self.round_trip(settings, request).await {
			Ok(response) => response,
			Err(e) => {
				tracing::warn!(error = %e, "AS2 send failed before the HTTP round trip");
				As2Response::failure(e.to_string())
			}
		}
	}
}

/// Factory producing plain HTTP transports.
#[derive(Debug, Default)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
	fn create_transport(&self) -> Result<Box<dyn As2TransportInterface>, As2Error> {
		Ok(Box::new(HttpAs2Transport::new()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message_id::DEFAULT_MESSAGE_ID_TEMPLATE;
	use crate::settings::{
		As2ReceiverSettings, As2SenderSettings, DEFAULT_DISPOSITION_NOTIFICATION_TO,
	};
	use openssl::asn1::Asn1Time;
	use openssl::hash::MessageDigest;
	use openssl::pkey::PKey;
	use openssl::rsa::Rsa;
	use openssl::x509::X509NameBuilder;
	use peppol_keystore::{KeyStore, KeyStoreSource};
	use peppol_types::{ContentTransferEncoding, SigningAlgorithm};
	use std::sync::Arc;
	use std::time::Duration;

	fn make_store(cn: &str) -> Arc<KeyStore> {
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
		let cert = builder.build();

		let mut p12 = openssl::pkcs12::Pkcs12::builder();
		p12.name(cn);
		p12.pkey(&key);
		p12.cert(&cert);
		let der = p12.build2("secret").unwrap().to_der().unwrap();
		Arc::new(KeyStore::load(KeyStoreSource::Bytes(der), "secret").unwrap())
	}

	#[tokio::test]
	async fn test_connection_failure_is_captured_not_raised() {
		let settings = As2Settings {
			key_store: make_store("POP000092"),
			sender: As2SenderSettings {
				as2_id: "POP000092".to_string(),
				email: "sender@example.com".to_string(),
				key_alias: "POP000092".to_string(),
			},
			receiver: As2ReceiverSettings {
				as2_id: "POP000011".to_string(),
				key_alias: "POP000011".to_string(),
				// Nothing listens here.
				url: "http://127.0.0.1:1/as2".to_string(),
			},
			receiver_certificate: Vec::new(),
			partnership_name: "POP000092-POP000011".to_string(),
			signing_algorithm: SigningAlgorithm::Sha1,
			message_id_template: DEFAULT_MESSAGE_ID_TEMPLATE.to_string(),
			connect_timeout: Duration::from_millis(500),
			read_timeout: Duration::from_millis(500),
			content_transfer_encoding: ContentTransferEncoding::Binary,
			mime_type: "application/xml".to_string(),
			use_data_handler: true,
			disposition_notification_to: DEFAULT_DISPOSITION_NOTIFICATION_TO.to_string(),
			proxy: None,
			debug: false,
			outgoing_dumper: None,
			incoming_dumper: None,
		};
		let request = As2Request {
			subject: "Peppol AS2 message".to_string(),
			payload: b"<StandardBusinessDocument/>".to_vec(),
		};

		let transport = HttpTransportFactory.create_transport().unwrap();
		let response = transport.send(&settings, &request).await;
		assert!(response.has_exception());
		assert!(!response.mdn_present());
	}
}
