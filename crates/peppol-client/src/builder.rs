//! The AS2 client builder and its send pipeline.

use crate::ClientError;
use chrono::Utc;
use peppol_as2::message_id::DEFAULT_MESSAGE_ID_TEMPLATE;
use peppol_as2::settings::DEFAULT_DISPOSITION_NOTIFICATION_TO;
use peppol_as2::{
	As2ReceiverSettings, As2Request, As2SenderSettings, As2Settings, HttpTransportFactory,
	TransportFactory,
};
use peppol_keystore::{KeyStore, KeyStoreSource};
use peppol_sbd::{NamespaceContext, PayloadElement, SbdBuilder};
use peppol_smp::SmpResolver;
use peppol_types::{
	check_access_point_certificate, default_transport_profiles, subject_common_name,
	As2Response, CertificateCheckPolicy, CertificateCheckStrategy, CollectingMessageHandler,
	ContentTransferEncoding, DocumentTypeIdentifier, IncomingDumper, LoggingValidationResultHandler,
	MessageHandler, OutgoingDumper, ParticipantIdentifier, ProcessIdentifier, SigningAlgorithm,
	TransportProfile, ValidationResultHandler,
};
use peppol_validation::{ValidationError, ValidationService};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default `Subject` of outbound messages.
pub const DEFAULT_AS2_SUBJECT: &str = "OpenPEPPOL AS2 message";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// The business document handed to the builder: either a readable byte
/// source still to be parsed, or an already parsed element. Exactly one
/// form is carried per send.
#[derive(Debug, Clone)]
pub enum BusinessDocument {
	/// Raw XML bytes, parsed and well-formedness-checked by the pipeline.
	Bytes(Vec<u8>),
	/// A parsed payload element, used as-is.
	Element(PayloadElement),
}

/// Builder driving one synchronous AS2 send.
///
/// Fields start unset, defaults are applied in a dedicated derivation step,
/// and missing receiver data is filled from the SMP lookup. The terminal
/// operations [`send_synchronous`](Self::send_synchronous) and
/// [`send_synchronous_sbd`](Self::send_synchronous_sbd) consume the
/// builder.
pub struct As2ClientBuilder {
	key_store_file: Option<PathBuf>,
	key_store_bytes: Option<Vec<u8>>,
	key_store_password: Option<String>,
	save_key_store_changes: bool,

	as2_subject: String,
	sender_as2_id: Option<String>,
	sender_email: Option<String>,
	sender_key_alias: Option<String>,
	receiver_as2_id: Option<String>,
	receiver_key_alias: Option<String>,
	receiver_url: Option<String>,
	receiver_certificate: Option<Vec<u8>>,
	signing_algorithm: SigningAlgorithm,
	message_id_template: String,
	connect_timeout: Duration,
	read_timeout: Duration,

	peppol_sender: Option<ParticipantIdentifier>,
	peppol_receiver: Option<ParticipantIdentifier>,
	peppol_document_type: Option<DocumentTypeIdentifier>,
	peppol_process: Option<ProcessIdentifier>,

	business_document: Option<BusinessDocument>,
	validation_rule_set: Option<String>,
	validation_service: Option<Arc<ValidationService>>,
	validation_result_handler: Arc<dyn ValidationResultHandler>,

	sbdh_namespace_context: Option<NamespaceContext>,
	sbd_bytes_observer: Option<Box<dyn FnOnce(&[u8]) + Send>>,
	ubl_version: Option<String>,

	content_transfer_encoding: ContentTransferEncoding,
	mime_type: String,
	use_data_handler: bool,

	message_handler: Arc<dyn MessageHandler>,
	certificate_check_strategy: CertificateCheckStrategy,
	certificate_check_policy: CertificateCheckPolicy,

	smp_resolver: Option<SmpResolver>,
	transport_profiles: Vec<TransportProfile>,

	transport_factory: Box<dyn TransportFactory>,
	outgoing_dumper: Option<Arc<dyn OutgoingDumper>>,
	incoming_dumper: Option<Arc<dyn IncomingDumper>>,
	proxy: Option<String>,
	debug: bool,
}

impl Default for As2ClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl As2ClientBuilder {
	/// Creates a builder with all defaults applied and everything else
	/// unset.
	pub fn new() -> Self {
		Self {
			key_store_file: None,
			key_store_bytes: None,
			key_store_password: None,
			save_key_store_changes: false,
			as2_subject: DEFAULT_AS2_SUBJECT.to_string(),
			sender_as2_id: None,
			sender_email: None,
			sender_key_alias: None,
			receiver_as2_id: None,
			receiver_key_alias: None,
			receiver_url: None,
			receiver_certificate: None,
			signing_algorithm: SigningAlgorithm::Sha1,
			message_id_template: DEFAULT_MESSAGE_ID_TEMPLATE.to_string(),
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
			read_timeout: DEFAULT_READ_TIMEOUT,
			peppol_sender: None,
			peppol_receiver: None,
			peppol_document_type: None,
			peppol_process: None,
			business_document: None,
			validation_rule_set: None,
			validation_service: None,
			validation_result_handler: Arc::new(LoggingValidationResultHandler),
			sbdh_namespace_context: None,
			sbd_bytes_observer: None,
			ubl_version: None,
			content_transfer_encoding: ContentTransferEncoding::Binary,
			mime_type: "application/xml".to_string(),
			use_data_handler: true,
			message_handler: Arc::new(CollectingMessageHandler::new()),
			certificate_check_strategy: CertificateCheckStrategy::StrictReject,
			certificate_check_policy: CertificateCheckPolicy::new(),
			smp_resolver: None,
			transport_profiles: default_transport_profiles(),
			transport_factory: Box::new(HttpTransportFactory),
			outgoing_dumper: None,
			incoming_dumper: None,
			proxy: None,
			debug: false,
		}
	}

	/// Uses a key store file on disk.
	pub fn with_key_store_file(mut self, path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
		self.key_store_file = Some(path.into());
		self.key_store_password = Some(password.into());
		self
	}

	/// Uses an in-memory key store.
	pub fn with_key_store_bytes(mut self, bytes: Vec<u8>, password: impl Into<String>) -> Self {
		self.key_store_bytes = Some(bytes);
		self.key_store_password = Some(password.into());
		self
	}

	/// Persists newly learned partner certificates back to the store file.
	pub fn with_save_key_store_changes(mut self, save: bool) -> Self {
		self.save_key_store_changes = save;
		self
	}

	/// Overrides the default AS2 subject.
	pub fn with_as2_subject(mut self, subject: impl Into<String>) -> Self {
		self.as2_subject = subject.into();
		self
	}

	/// Sets the sender AS2 identifier.
	pub fn with_sender_as2_id(mut self, id: impl Into<String>) -> Self {
		self.sender_as2_id = Some(id.into());
		self
	}

	/// Sets the sender contact email.
	pub fn with_sender_email(mut self, email: impl Into<String>) -> Self {
		self.sender_email = Some(email.into());
		self
	}

	/// Sets the sender key alias explicitly.
	pub fn with_sender_key_alias(mut self, alias: impl Into<String>) -> Self {
		self.sender_key_alias = Some(alias.into());
		self
	}

	/// Sets the receiver AS2 identifier (otherwise derived from the SMP
	/// endpoint certificate).
	pub fn with_receiver_as2_id(mut self, id: impl Into<String>) -> Self {
		self.receiver_as2_id = Some(id.into());
		self
	}

	/// Sets the receiver key alias explicitly.
	pub fn with_receiver_key_alias(mut self, alias: impl Into<String>) -> Self {
		self.receiver_key_alias = Some(alias.into());
		self
	}

	/// Sets the receiver endpoint URL (otherwise resolved via SMP).
	pub fn with_receiver_url(mut self, url: impl Into<String>) -> Self {
		self.receiver_url = Some(url.into());
		self
	}

	/// Sets the DER-encoded receiver certificate (otherwise resolved via
	/// SMP).
	pub fn with_receiver_certificate(mut self, der: Vec<u8>) -> Self {
		self.receiver_certificate = Some(der);
		self
	}

	/// Overrides the signing algorithm. The SMP lookup adjusts it to match
	/// the selected transport profile.
	pub fn with_signing_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
		self.signing_algorithm = algorithm;
		self
	}

	/// Overrides the message-ID template.
	pub fn with_message_id_template(mut self, template: impl Into<String>) -> Self {
		self.message_id_template = template.into();
		self
	}

	/// Bounds TCP connect plus TLS handshake.
	pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = timeout;
		self
	}

	/// Bounds any single socket read.
	pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
		self.read_timeout = timeout;
		self
	}

	/// Sets the Peppol sender participant.
	pub fn with_peppol_sender(mut self, id: ParticipantIdentifier) -> Self {
		self.peppol_sender = Some(id);
		self
	}

	/// Sets the Peppol receiver participant.
	pub fn with_peppol_receiver(mut self, id: ParticipantIdentifier) -> Self {
		self.peppol_receiver = Some(id);
		self
	}

	/// Sets the Peppol document type.
	pub fn with_peppol_document_type(mut self, id: DocumentTypeIdentifier) -> Self {
		self.peppol_document_type = Some(id);
		self
	}

	/// Sets the Peppol process.
	pub fn with_peppol_process(mut self, id: ProcessIdentifier) -> Self {
		self.peppol_process = Some(id);
		self
	}

	/// Supplies the business document as raw XML bytes.
	pub fn with_business_document_bytes(mut self, bytes: Vec<u8>) -> Self {
		self.business_document = Some(BusinessDocument::Bytes(bytes));
		self
	}

	/// Supplies the business document as an already parsed element.
	pub fn with_business_document_element(mut self, element: PayloadElement) -> Self {
		self.business_document = Some(BusinessDocument::Element(element));
		self
	}

	/// Requests payload validation against the named rule set.
	pub fn with_validation_rule_set(mut self, rule_set_id: impl Into<String>) -> Self {
		self.validation_rule_set = Some(rule_set_id.into());
		self
	}

	/// Provides the validation service holding the registered rule sets.
	pub fn with_validation_service(mut self, service: Arc<ValidationService>) -> Self {
		self.validation_service = Some(service);
		self
	}

	/// Overrides the validation result handler.
	pub fn with_validation_result_handler(
		mut self,
		handler: Arc<dyn ValidationResultHandler>,
	) -> Self {
		self.validation_result_handler = handler;
		self
	}

	/// Overrides the SBDH namespace context.
	pub fn with_sbdh_namespace_context(mut self, context: NamespaceContext) -> Self {
		self.sbdh_namespace_context = Some(context);
		self
	}

	/// Observes the serialized SBDH bytes, invoked at most once per send.
	pub fn with_sbd_bytes_observer(mut self, observer: Box<dyn FnOnce(&[u8]) + Send>) -> Self {
		self.sbd_bytes_observer = Some(observer);
		self
	}

	/// Overrides the default UBL `TypeVersion` of `2.1`.
	pub fn with_ubl_version(mut self, version: impl Into<String>) -> Self {
		self.ubl_version = Some(version.into());
		self
	}

	/// Overrides the body content transfer encoding.
	pub fn with_content_transfer_encoding(mut self, encoding: ContentTransferEncoding) -> Self {
		self.content_transfer_encoding = encoding;
		self
	}

	/// Overrides the body MIME type.
	pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
		self.mime_type = mime_type.into();
		self
	}

	/// Chooses between typed binary attachment (true, the default) and
	/// UTF-8 string attachment with an explicit content type (false).
	pub fn with_use_data_handler(mut self, use_data_handler: bool) -> Self {
		self.use_data_handler = use_data_handler;
		self
	}

	/// Overrides the message handler collecting warnings and errors.
	pub fn with_message_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
		self.message_handler = handler;
		self
	}

	/// Overrides the certificate check strategy.
	pub fn with_certificate_check_strategy(mut self, strategy: CertificateCheckStrategy) -> Self {
		self.certificate_check_strategy = strategy;
		self
	}

	/// Overrides the certificate check policy (trust anchors, revocation).
	pub fn with_certificate_check_policy(mut self, policy: CertificateCheckPolicy) -> Self {
		self.certificate_check_policy = policy;
		self
	}

	/// Enables SMP resolution of missing receiver data.
	pub fn with_smp_resolver(mut self, resolver: SmpResolver) -> Self {
		self.smp_resolver = Some(resolver);
		self
	}

	/// Overrides the ordered transport profile preference.
	pub fn with_transport_profiles(mut self, profiles: Vec<TransportProfile>) -> Self {
		self.transport_profiles = profiles;
		self
	}

	/// Overrides the transport factory.
	pub fn with_transport_factory(mut self, factory: Box<dyn TransportFactory>) -> Self {
		self.transport_factory = factory;
		self
	}

	/// Installs an outgoing dump hook.
	pub fn with_outgoing_dumper(mut self, dumper: Arc<dyn OutgoingDumper>) -> Self {
		self.outgoing_dumper = Some(dumper);
		self
	}

	/// Installs an incoming dump hook.
	pub fn with_incoming_dumper(mut self, dumper: Arc<dyn IncomingDumper>) -> Self {
		self.incoming_dumper = Some(dumper);
		self
	}

	/// Routes the HTTP round trips through an explicit proxy.
	pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
		self.proxy = Some(proxy_url.into());
		self
	}

	/// Enables wire-level debug logging.
	pub fn with_debug(mut self, debug: bool) -> Self {
		self.debug = debug;
		self
	}

	/// Executes the full send pipeline and returns the transport response.
	///
	/// The pipeline runs strictly in order: SMP resolution, default
	/// derivation, certificate check, content verification, payload
	/// parsing, validation, SBD assembly and serialization, settings and
	/// request assembly, send.
	pub async fn send_synchronous(mut self) -> Result<As2Response, ClientError> {
		self.resolve_via_smp().await;
		self.derive_defaults();
		self.check_receiver_certificate()?;
		self.verify_content(true)?;

		let payload = self.read_payload()?;
		self.run_validation(&payload)?;

		let sbd = SbdBuilder::new(
			self.peppol_sender.clone().expect("verified"),
			self.peppol_receiver.clone().expect("verified"),
			self.peppol_document_type.clone().expect("verified"),
			self.peppol_process.clone().expect("verified"),
			payload,
		);
		let sbd = match &self.ubl_version {
			Some(version) => sbd.with_type_version(version.clone()),
			None => sbd,
		}
		.build();
		tracing::debug!(
			instance_id = %sbd.instance_identifier,
			"Built Standard Business Document"
		);

		let sbd_bytes = sbd.serialize(self.sbdh_namespace_context.as_ref())?;
		if let Some(observer) = self.sbd_bytes_observer.take() {
			observer(&sbd_bytes);
		}

		self.dispatch(sbd_bytes).await
	}

	/// Executes the pipeline for an SBD that is already serialized,
	/// skipping payload parsing, validation and envelope assembly.
	pub async fn send_synchronous_sbd(
		mut self,
		sbd_bytes: Vec<u8>,
	) -> Result<As2Response, ClientError> {
		self.resolve_via_smp().await;
		self.derive_defaults();
		self.check_receiver_certificate()?;
		self.verify_content(false)?;
		self.dispatch(sbd_bytes).await
	}

	/// Step 1: fill missing receiver data from the SMP, when a resolver is
	/// configured. Lookup failures are reported to the message handler and
	/// absorbed; the later verification step catches remaining gaps.
	async fn resolve_via_smp(&mut self) {
		let Some(resolver) = &self.smp_resolver else {
			return;
		};
		let needs_lookup = self.receiver_url.is_none()
			|| self.receiver_certificate.is_none()
			|| self.receiver_as2_id.is_none();
		if !needs_lookup {
			return;
		}
		let (Some(receiver), Some(document_type), Some(process)) = (
			&self.peppol_receiver,
			&self.peppol_document_type,
			&self.peppol_process,
		) else {
			self.message_handler.warn(
				"Skipping SMP lookup: receiver, document type and process identifiers are not all set",
				None,
			);
			return;
		};

		tracing::debug!(receiver = %receiver, "Resolving receiver endpoint via SMP");
		let resolved = resolver
			.resolve(receiver, document_type, process, &self.transport_profiles)
			.await;
		match resolved {
			Ok(endpoint) => {
				if let Some(algorithm) = endpoint.transport_profile.default_signing_algorithm() {
					self.signing_algorithm = algorithm;
				}
				if self.receiver_url.is_none() {
					self.receiver_url = Some(endpoint.address.clone());
				}
				if self.receiver_as2_id.is_none() {
					match subject_common_name(&endpoint.certificate) {
						Ok(cn) => self.receiver_as2_id = Some(cn),
						Err(e) => self.message_handler.warn(
							"Endpoint certificate has no usable subject CN",
							Some(&e),
						),
					}
				}
				if self.receiver_certificate.is_none() {
					self.receiver_certificate = Some(endpoint.certificate);
				}
			}
			Err(e) => {
				self.message_handler
					.warn("SMP lookup failed, continuing with configured values", Some(&e));
			}
		}
	}

	/// Step 2: default derivation.
	fn derive_defaults(&mut self) {
		if self.receiver_key_alias.is_none() {
			self.receiver_key_alias = self.receiver_as2_id.clone();
		}
		// Peppol v3 AP identifiers (P-prefixed) conventionally alias their
		// key by the AS2 id itself.
		if self.sender_key_alias.is_none() {
			if let Some(id) = &self.sender_as2_id {
				if id.starts_with('P') {
					self.sender_key_alias = Some(id.clone());
				}
			}
		}
	}

	/// Step 3: check the receiver certificate, when one is present, through
	/// the configured strategy.
	fn check_receiver_certificate(&self) -> Result<(), ClientError> {
		let Some(der) = &self.receiver_certificate else {
			return Ok(());
		};
		let now = Utc::now();
		let outcome = check_access_point_certificate(der, now, &self.certificate_check_policy);
		tracing::debug!(outcome = %outcome, "Checked receiver certificate");
		self.certificate_check_strategy
			.handle(der, now, &outcome)?;
		Ok(())
	}

	/// Step 4: exhaustive content verification. Issues are recorded on the
	/// message handler; any error forbids the send.
	fn verify_content(&self, with_payload: bool) -> Result<(), ClientError> {
		let mut errors: Vec<String> = Vec::new();
		let mut error = |message: &str| {
			self.message_handler.error(message, None);
			errors.push(message.to_string());
		};

		match (&self.key_store_file, &self.key_store_bytes) {
			(None, None) => error("no key store configured"),
			(Some(_), Some(_)) => {
				error("both a key store file and key store bytes are configured")
			}
			(Some(path), None) => {
				if !path.exists() {
					error(&format!("key store file '{}' does not exist", path.display()));
				} else if self.save_key_store_changes && !peppol_keystore::is_writable(path) {
					error(&format!(
						"key store file '{}' is not writable but write-back is enabled",
						path.display()
					));
				}
			}
			(None, Some(_)) => {
				if self.save_key_store_changes {
					error("write-back is enabled but the key store is not file-backed");
				}
			}
		}
		if self.key_store_password.is_none() {
			error("no key store password configured");
		}

		if self.sender_as2_id.is_none() {
			error("no sender AS2 id configured");
		}
		if self.sender_email.is_none() {
			error("no sender email configured");
		}
		if self.sender_key_alias.is_none() {
			error("no sender key alias configured");
		}
		if self.receiver_as2_id.is_none() {
			error("no receiver AS2 id configured");
		}
		if self.receiver_key_alias.is_none() {
			error("no receiver key alias configured");
		}
		if self.receiver_url.is_none() {
			error("no receiver AS2 URL configured");
		}
		if self.receiver_certificate.is_none() {
			error("no receiver certificate configured");
		}

		if self.peppol_sender.is_none() {
			error("no Peppol sender identifier configured");
		}
		if self.peppol_receiver.is_none() {
			error("no Peppol receiver identifier configured");
		}
		if self.peppol_document_type.is_none() {
			error("no Peppol document type identifier configured");
		}
		if self.peppol_process.is_none() {
			error("no Peppol process identifier configured");
		}

		if with_payload && self.business_document.is_none() {
			error("no business document configured");
		}

		// Warnings: alias conventions and identifier schemes.
		if let (Some(id), Some(alias)) = (&self.sender_as2_id, &self.sender_key_alias) {
			if id.starts_with('P') && id != alias {
				self.message_handler.warn(
					&format!("sender key alias '{}' differs from sender AS2 id '{}'", alias, id),
					None,
				);
			}
		}
		if let (Some(id), Some(alias)) = (&self.receiver_as2_id, &self.receiver_key_alias) {
			if id.starts_with('P') && id != alias {
				self.message_handler.warn(
					&format!(
						"receiver key alias '{}' differs from receiver AS2 id '{}'",
						alias, id
					),
					None,
				);
			}
		}
		if let Some(id) = &self.peppol_sender {
			if !id.has_default_scheme() {
				self.message_handler
					.warn(&format!("sender identifier uses non-default scheme '{}'", id.scheme()), None);
			}
		}
		if let Some(id) = &self.peppol_receiver {
			if !id.has_default_scheme() {
				self.message_handler
					.warn(&format!("receiver identifier uses non-default scheme '{}'", id.scheme()), None);
			}
		}
		if let Some(id) = &self.peppol_document_type {
			if !id.has_default_scheme() {
				self.message_handler.warn(
					&format!("document type identifier uses non-default scheme '{}'", id.scheme()),
					None,
				);
			}
		}
		if let Some(id) = &self.peppol_process {
			if !id.has_default_scheme() {
				self.message_handler
					.warn(&format!("process identifier uses non-default scheme '{}'", id.scheme()), None);
			}
		}

		if self.message_handler.error_count() > 0 {
			tracing::warn!(errors = errors.len(), "Builder verification failed");
			return Err(ClientError::Incomplete { errors });
		}
		Ok(())
	}

	/// Step 5: obtain the payload element, parsing a byte source when
	/// needed.
	fn read_payload(&mut self) -> Result<PayloadElement, ClientError> {
		match self.business_document.take().expect("verified") {
			BusinessDocument::Bytes(bytes) => Ok(PayloadElement::from_bytes(&bytes)?),
			BusinessDocument::Element(element) => Ok(element),
		}
	}

	/// Step 6: run the configured validation rule set, if any.
	fn run_validation(&self, payload: &PayloadElement) -> Result<(), ClientError> {
		let Some(rule_set) = &self.validation_rule_set else {
			return Ok(());
		};
		let service = self.validation_service.as_ref().ok_or_else(|| {
			ClientError::Validation(ValidationError::UnknownRuleSet(rule_set.clone()))
		})?;
		service.validate(rule_set, &payload.bytes, self.validation_result_handler.as_ref())?;
		Ok(())
	}

	/// Steps 9 to 11: load the key store, assemble settings and request,
	/// and hand off to the transport. Transport failures land inside the
	/// returned response.
	async fn dispatch(mut self, sbd_bytes: Vec<u8>) -> Result<As2Response, ClientError> {
		let source = match (self.key_store_file.take(), self.key_store_bytes.take()) {
			(Some(path), None) => KeyStoreSource::File(path),
			(None, Some(bytes)) => KeyStoreSource::Bytes(bytes),
			_ => unreachable!("verified"),
		};
		let password = self.key_store_password.take().expect("verified");
		let key_store = Arc::new(KeyStore::load(source, &password)?);

		let sender_as2_id = self.sender_as2_id.take().expect("verified");
		let receiver_as2_id = self.receiver_as2_id.take().expect("verified");
		let partnership_name = As2Settings::partnership_name_for(&sender_as2_id, &receiver_as2_id);

		let settings = As2Settings {
			key_store,
			sender: As2SenderSettings {
				as2_id: sender_as2_id,
				email: self.sender_email.take().expect("verified"),
				key_alias: self.sender_key_alias.take().expect("verified"),
			},
			receiver: As2ReceiverSettings {
				as2_id: receiver_as2_id,
				key_alias: self.receiver_key_alias.take().expect("verified"),
				url: self.receiver_url.take().expect("verified"),
			},
			receiver_certificate: self.receiver_certificate.take().expect("verified"),
			partnership_name,
			signing_algorithm: self.signing_algorithm,
			message_id_template: self.message_id_template.clone(),
			connect_timeout: self.connect_timeout,
			read_timeout: self.read_timeout,
			content_transfer_encoding: self.content_transfer_encoding,
			mime_type: self.mime_type.clone(),
			use_data_handler: self.use_data_handler,
			disposition_notification_to: DEFAULT_DISPOSITION_NOTIFICATION_TO.to_string(),
			proxy: self.proxy.take(),
			debug: self.debug,
			outgoing_dumper: self.outgoing_dumper.take(),
			incoming_dumper: self.incoming_dumper.take(),
		};
		let request = As2Request {
			subject: self.as2_subject.clone(),
			payload: sbd_bytes,
		};

		let transport = self.transport_factory.create_transport()?;
		let response = transport.send(&settings, &request).await;
		if response.has_exception() {
			tracing::warn!(
				exception = response.exception.as_deref(),
				"AS2 send completed with a captured exception"
			);
		} else {
			tracing::info!(
				mdn_present = response.mdn_present(),
				partnership = %settings.partnership_name,
				"AS2 send completed"
			);
		}
		Ok(response)
	}
}
