//! HTTP SMP client implementation.
//!
//! The SMP hostname is derived from the participant identifier through the
//! SML naming scheme: `b-<md5(value)>.<scheme>.<sml zone>`. The service
//! metadata document is then fetched over plain HTTP, as mandated for SMP,
//! and reduced to the process/endpoint entries the resolver consumes.

use crate::{ProcessMetadata, ServiceMetadata, SmpClientInterface, SmpEndpoint, SmpError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::{Digest, Md5};
use peppol_types::{
	DocumentTypeIdentifier, ParticipantIdentifier, ProcessIdentifier, TransportProfile,
};
use quick_xml::events::Event;
use quick_xml::reader::NsReader;
use std::time::Duration;

/// SML zone of the Peppol production network.
pub const PRODUCTION_SML_ZONE: &str = "edelivery.tech.ec.europa.eu";
/// SML zone of the Peppol test network (SMK).
pub const TEST_SML_ZONE: &str = "acc.edelivery.tech.ec.europa.eu";

/// SMP client that locates the SMP host through SML and fetches service
/// metadata over HTTP.
pub struct HttpSmpClient {
	http: reqwest::Client,
	sml_zone: String,
}

impl HttpSmpClient {
	/// Creates a client for the given SML zone.
	pub fn new(sml_zone: impl Into<String>) -> Result<Self, SmpError> {
		let http = reqwest::Client::builder()
			.connect_timeout(Duration::from_secs(10))
			.timeout(Duration::from_secs(30))
			.build()
			.map_err(|e| SmpError::Lookup(e.to_string()))?;
		Ok(Self {
			http,
			sml_zone: sml_zone.into(),
		})
	}

	/// Creates a client for the production SML zone.
	pub fn production() -> Result<Self, SmpError> {
		Self::new(PRODUCTION_SML_ZONE)
	}

	/// The SML hostname publishing the participant's SMP.
	pub fn smp_host(&self, participant: &ParticipantIdentifier) -> String {
		let mut hasher = Md5::new();
		hasher.update(participant.value().to_lowercase().as_bytes());
		let hash = format!("{:x}", hasher.finalize());
		format!("b-{}.{}.{}", hash, participant.scheme(), self.sml_zone)
	}

	/// The full service metadata URL for a participant and document type.
	pub fn service_url(
		&self,
		participant: &ParticipantIdentifier,
		document_type: &DocumentTypeIdentifier,
	) -> String {
		format!(
			"http://{}/{}/services/{}",
			self.smp_host(participant),
			urlencoding::encode(&participant.uri_encoded()),
			urlencoding::encode(&document_type.uri_encoded())
		)
	}
}

#[async_trait]
impl SmpClientInterface for HttpSmpClient {
	async fn fetch_service_metadata(
		&self,
		participant: &ParticipantIdentifier,
		document_type: &DocumentTypeIdentifier,
	) -> Result<ServiceMetadata, SmpError> {
		let url = self.service_url(participant, document_type);
		tracing::debug!(url = %url, "Fetching SMP service metadata");

		let response = self
			.http
			.get(&url)
			.send()
			.await
			.map_err(|e| SmpError::Lookup(e.to_string()))?;

		if response.status() == reqwest::StatusCode::NOT_FOUND {
			return Err(SmpError::NoEndpoint);
		}
		if !response.status().is_success() {
			return Err(SmpError::Lookup(format!(
				"SMP returned status {}",
				response.status()
			)));
		}

		let body = response
			.text()
			.await
			.map_err(|e| SmpError::Lookup(e.to_string()))?;
		parse_signed_service_metadata(body.as_bytes())
	}
}

/// Parses a `SignedServiceMetadata` (or bare `ServiceMetadata`) document
/// into the process/endpoint entries the resolver consumes.
///
/// Only the `ServiceInformation → ProcessList → Process →
/// ServiceEndpointList → Endpoint` spine is read; the fields consumed per
/// endpoint are the transport profile attribute, `EndpointURI` (with the
/// `EndpointReference/Address` form as fallback) and the Base64-wrapped
/// `Certificate`. The enclosing XML signature is not re-validated here.
pub fn parse_signed_service_metadata(xml: &[u8]) -> Result<ServiceMetadata, SmpError> {
	let mut reader = NsReader::from_reader(xml);
	let mut buf = Vec::new();

	let mut metadata = ServiceMetadata::default();
	let mut path: Vec<String> = Vec::new();
	let mut process_scheme: Option<String> = None;
	let mut process_id: Option<ProcessIdentifier> = None;
	let mut process_endpoints: Vec<SmpEndpoint> = Vec::new();
	let mut endpoint_profile: Option<TransportProfile> = None;
	let mut endpoint_address: Option<String> = None;
	let mut endpoint_certificate: Option<Vec<u8>> = None;

	loop {
		match reader.read_resolved_event_into(&mut buf) {
			Ok((_, Event::Start(e))) => {
				let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
				match local.as_str() {
					"Process" => {
						process_id = None;
						process_endpoints = Vec::new();
					}
					"ProcessIdentifier" => {
						process_scheme = attribute(&e, "scheme")?;
					}
					"Endpoint" => {
						endpoint_profile = attribute(&e, "transportProfile")?
							.map(TransportProfile::new);
						endpoint_address = None;
						endpoint_certificate = None;
					}
					_ => {}
				}
				path.push(local);
			}
			Ok((_, Event::End(_))) => {
				match path.last().map(String::as_str) {
					Some("Endpoint") => {
						match (
							endpoint_profile.take(),
							endpoint_address.take(),
							endpoint_certificate.take(),
						) {
							(Some(transport_profile), Some(address), Some(certificate)) => {
								process_endpoints.push(SmpEndpoint {
									transport_profile,
									address,
									certificate,
								});
							}
							_ => {
								tracing::warn!(
									"Skipping incomplete endpoint entry in service metadata"
								);
							}
						}
					}
					Some("Process") => {
						if let Some(id) = process_id.take() {
							metadata.processes.push(ProcessMetadata {
								process_id: id,
								endpoints: std::mem::take(&mut process_endpoints),
							});
						}
					}
					_ => {}
				}
				path.pop();
			}
			Ok((_, Event::Text(t))) => {
				let text = t
					.unescape()
					.map_err(|e| SmpError::Parse(e.to_string()))?
					.trim()
					.to_string();
				if text.is_empty() {
					buf.clear();
					continue;
				}
				match path.last().map(String::as_str) {
					Some("ProcessIdentifier") => {
						let scheme = process_scheme
							.take()
							.unwrap_or_else(|| peppol_types::DEFAULT_PROCESS_SCHEME.to_string());
						process_id = Some(ProcessIdentifier::new(scheme, text));
					}
					Some("EndpointURI") => endpoint_address = Some(text),
					Some("Address") => {
						// wsa:EndpointReference/wsa:Address wrapping of the URI.
						if endpoint_address.is_none()
							&& path.iter().any(|p| p == "EndpointReference")
						{
							endpoint_address = Some(text);
						}
					}
					Some("Certificate") => {
						let cleaned: String =
							text.chars().filter(|c| !c.is_whitespace()).collect();
						let der = BASE64.decode(cleaned.as_bytes()).map_err(|e| {
							SmpError::Parse(format!("endpoint certificate: {}", e))
						})?;
						endpoint_certificate = Some(der);
					}
					_ => {}
				}
			}
			Ok((_, Event::Eof)) => break,
			Ok(_) => {}
			Err(e) => return Err(SmpError::Parse(e.to_string())),
		}
		buf.clear();
	}

	Ok(metadata)
}

fn attribute(
	e: &quick_xml::events::BytesStart<'_>,
	name: &str,
) -> Result<Option<String>, SmpError> {
	e.try_get_attribute(name)
		.map_err(|err| SmpError::Parse(err.to_string()))?
		.map(|a| {
			a.unescape_value()
				.map(|v| v.into_owned())
				.map_err(|err| SmpError::Parse(err.to_string()))
		})
		.transpose()
}
