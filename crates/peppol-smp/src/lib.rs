//! SMP resolution module for the Peppol AS2 subsystem.
//!
//! This module handles the discovery of receiver Access Point endpoints
//! from signed service metadata. It provides the abstraction over SMP
//! clients and the endpoint selection logic driven by an ordered transport
//! profile preference list.

use async_trait::async_trait;
use peppol_types::{
	DocumentTypeIdentifier, EndpointInfo, ParticipantIdentifier, ProcessIdentifier,
	TransportProfile,
};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod http;
}

/// Errors that can occur during SMP resolution.
#[derive(Debug, Error)]
pub enum SmpError {
	/// Error that occurs during the network round trip to the SMP.
	#[error("SMP lookup error: {0}")]
	Lookup(String),
	/// The participant publishes no endpoint for the requested document
	/// type, process and transport profiles.
	#[error("no matching endpoint registered in the service metadata")]
	NoEndpoint,
	/// The service metadata could not be parsed.
	#[error("service metadata parse error: {0}")]
	Parse(String),
}

/// One endpoint entry from the service metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmpEndpoint {
	/// The transport profile this endpoint serves.
	pub transport_profile: TransportProfile,
	/// The endpoint address documents are POSTed to.
	pub address: String,
	/// DER-encoded X.509 certificate of the endpoint.
	pub certificate: Vec<u8>,
}

/// One process entry from the service metadata, with its endpoints in
/// document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMetadata {
	/// The process this entry applies to.
	pub process_id: ProcessIdentifier,
	/// Endpoints in document order.
	pub endpoints: Vec<SmpEndpoint>,
}

/// Parsed service metadata for one `(participant, document type)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceMetadata {
	/// Process entries in document order.
	pub processes: Vec<ProcessMetadata>,
}

/// Trait defining the interface for SMP client implementations.
///
/// An implementation fetches the signed service metadata for a participant
/// and document type. Network and parse failures map onto `SmpError`; a
/// missing registration maps onto `SmpError::NoEndpoint`.
#[async_trait]
pub trait SmpClientInterface: Send + Sync {
	/// Fetches signed service metadata for the given participant and
	/// document type.
	async fn fetch_service_metadata(
		&self,
		participant: &ParticipantIdentifier,
		document_type: &DocumentTypeIdentifier,
	) -> Result<ServiceMetadata, SmpError>;
}

/// Service that resolves receiver endpoints through an SMP client.
///
/// The resolver walks the caller's transport profile preference list in
/// order; within a profile, ties resolve by document order in the metadata.
/// The chosen profile is returned inside the endpoint so the caller can
/// align its signing algorithm with it.
pub struct SmpResolver {
	/// The underlying SMP client implementation.
	client: Box<dyn SmpClientInterface>,
}

impl SmpResolver {
	/// Creates a resolver around the given client implementation.
	pub fn new(client: Box<dyn SmpClientInterface>) -> Self {
		Self { client }
	}

	/// Resolves the endpoint for a receiver, document type and process.
	///
	/// Returns the first endpoint matching both the process and a preferred
	/// transport profile, trying profiles in the given order.
	pub async fn resolve(
		&self,
		receiver: &ParticipantIdentifier,
		document_type: &DocumentTypeIdentifier,
		process: &ProcessIdentifier,
		preferred_profiles: &[TransportProfile],
	) -> Result<EndpointInfo, SmpError> {
		let metadata = self
			.client
			.fetch_service_metadata(receiver, document_type)
			.await?;

		for profile in preferred_profiles {
			for entry in &metadata.processes {
				if entry.process_id != *process {
					continue;
				}
				if let Some(endpoint) = entry
					.endpoints
					.iter()
					.find(|e| e.transport_profile == *profile)
				{
					tracing::info!(
						receiver = %receiver,
						profile = %profile,
						address = %endpoint.address,
						"Resolved endpoint from SMP metadata"
					);
					return Ok(EndpointInfo::new(
						endpoint.address.clone(),
						endpoint.certificate.clone(),
						profile.clone(),
					));
				}
			}
		}

		Err(SmpError::NoEndpoint)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct StaticClient {
		metadata: Result<ServiceMetadata, ()>,
	}

	#[async_trait]
	impl SmpClientInterface for StaticClient {
		async fn fetch_service_metadata(
			&self,
			_participant: &ParticipantIdentifier,
			_document_type: &DocumentTypeIdentifier,
		) -> Result<ServiceMetadata, SmpError> {
			self.metadata
				.clone()
				.map_err(|_| SmpError::Lookup("network down".to_string()))
		}
	}

	fn endpoint(profile: TransportProfile, address: &str) -> SmpEndpoint {
		SmpEndpoint {
			transport_profile: profile,
			address: address.to_string(),
			certificate: vec![0x30],
		}
	}

	fn process() -> ProcessIdentifier {
		ProcessIdentifier::from_value("urn:www.cenbii.eu:profile:bii04:ver2.0")
	}

	fn metadata_with(endpoints: Vec<SmpEndpoint>) -> ServiceMetadata {
		ServiceMetadata {
			processes: vec![ProcessMetadata {
				process_id: process(),
				endpoints,
			}],
		}
	}

	async fn resolve(
		metadata: ServiceMetadata,
		preferred: &[TransportProfile],
	) -> Result<EndpointInfo, SmpError> {
		let resolver = SmpResolver::new(Box::new(StaticClient {
			metadata: Ok(metadata),
		}));
		resolver
			.resolve(
				&ParticipantIdentifier::from_value("9999:test-receiver"),
				&DocumentTypeIdentifier::from_value("urn:test::Invoice"),
				&process(),
				preferred,
			)
			.await
	}

	#[tokio::test]
	async fn test_first_preferred_profile_wins() {
		let metadata = metadata_with(vec![
			endpoint(TransportProfile::as2_v1(), "https://ap.example.com/v1"),
			endpoint(TransportProfile::as2_v2(), "https://ap.example.com/v2"),
		]);
		let resolved = resolve(
			metadata,
			&[TransportProfile::as2_v2(), TransportProfile::as2_v1()],
		)
		.await
		.unwrap();
		assert_eq!(resolved.transport_profile, TransportProfile::as2_v2());
		assert_eq!(resolved.address, "https://ap.example.com/v2");
	}

	#[tokio::test]
	async fn test_falls_back_to_second_profile() {
		let metadata = metadata_with(vec![endpoint(
			TransportProfile::as2_v1(),
			"https://ap.example.com/v1",
		)]);
		let resolved = resolve(
			metadata,
			&[TransportProfile::as2_v2(), TransportProfile::as2_v1()],
		)
		.await
		.unwrap();
		assert_eq!(resolved.transport_profile, TransportProfile::as2_v1());
	}

	#[tokio::test]
	async fn test_document_order_breaks_ties() {
		let metadata = metadata_with(vec![
			endpoint(TransportProfile::as2_v2(), "https://first.example.com"),
			endpoint(TransportProfile::as2_v2(), "https://second.example.com"),
		]);
		let resolved = resolve(metadata, &[TransportProfile::as2_v2()])
			.await
			.unwrap();
		assert_eq!(resolved.address, "https://first.example.com");
	}

	#[tokio::test]
	async fn test_no_endpoint_for_unknown_process() {
		let metadata = ServiceMetadata {
			processes: vec![ProcessMetadata {
				process_id: ProcessIdentifier::from_value("urn:other:process"),
				endpoints: vec![endpoint(TransportProfile::as2_v2(), "https://x")],
			}],
		};
		let result = resolve(metadata, &[TransportProfile::as2_v2()]).await;
		assert!(matches!(result, Err(SmpError::NoEndpoint)));
	}

	#[tokio::test]
	async fn test_lookup_error_propagates() {
		let resolver = SmpResolver::new(Box::new(StaticClient { metadata: Err(()) }));
		let result = resolver
			.resolve(
				&ParticipantIdentifier::from_value("9999:test-receiver"),
				&DocumentTypeIdentifier::from_value("urn:test::Invoice"),
				&process(),
				&[TransportProfile::as2_v2()],
			)
			.await;
		assert!(matches!(result, Err(SmpError::Lookup(_))));
	}
}
