//! Standard Business Document assembly and serialization.
//!
//! This module wraps a business payload element in the UN/CEFACT Standard
//! Business Document Header, serializes the envelope to bytes with a
//! controllable namespace context, and parses received envelopes back into
//! their routing metadata. The business payload is carried verbatim in both
//! directions: its bytes are never re-canonicalized.

use chrono::{DateTime, SecondsFormat, Utc};
use peppol_types::{
	DocumentTypeIdentifier, ParticipantIdentifier, ProcessIdentifier,
	DEFAULT_DOCUMENT_TYPE_SCHEME, DEFAULT_PROCESS_SCHEME,
};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use quick_xml::writer::Writer;
use thiserror::Error;
use uuid::Uuid;

/// The SBDH namespace URI.
pub const SBDH_NAMESPACE: &str =
	"http://www.unece.org/cefact/namespaces/StandardBusinessDocumentHeader";

/// Default `TypeVersion` (UBL version) when the caller provides none.
pub const DEFAULT_TYPE_VERSION: &str = "2.1";

const HEADER_LOCAL_NAME: &str = "StandardBusinessDocumentHeader";

/// Errors that can occur while building, serializing or parsing an SBD.
#[derive(Debug, Error)]
pub enum SbdError {
	/// The input is not well-formed XML, or not an SBD at all.
	#[error("malformed document: {0}")]
	Malformed(String),
	/// A required SBDH element was absent.
	#[error("missing SBDH element: {0}")]
	MissingField(&'static str),
	/// The payload element is not valid UTF-8 and cannot be spliced.
	#[error("payload element is not valid UTF-8")]
	PayloadNotUtf8,
	/// Serialization failed.
	#[error("serialization error: {0}")]
	Write(String),
	/// The `CreationDateAndTime` value could not be parsed.
	#[error("invalid creation timestamp '{0}'")]
	InvalidTimestamp(String),
}

/// A business payload element: the resolved root name plus the verbatim
/// element bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadElement {
	/// Namespace URI of the payload root element (empty when unbound).
	pub namespace_uri: String,
	/// Local name of the payload root element.
	pub local_name: String,
	/// The element bytes, exactly as supplied.
	pub bytes: Vec<u8>,
}

impl PayloadElement {
	/// Parses a byte source into a payload element.
	///
	/// The input must be a well-formed XML document or bare element; an XML
	/// declaration, comments and processing instructions ahead of the root
	/// element are tolerated and stripped. The retained bytes start at the
	/// root element's `<` so they can be spliced into an envelope untouched.
	pub fn from_bytes(input: &[u8]) -> Result<Self, SbdError> {
		let start = root_element_offset(input)?;
		let mut end = input.len();
		while end > start && input[end - 1].is_ascii_whitespace() {
			end -= 1;
		}
		let bytes = input[start..end].to_vec();

		let (namespace_uri, local_name) = resolve_root_name(&bytes)?;
		Ok(Self {
			namespace_uri,
			local_name,
			bytes,
		})
	}
}

/// Byte offset of the root element start, skipping the XML declaration,
/// comments, processing instructions and a DOCTYPE.
fn root_element_offset(input: &[u8]) -> Result<usize, SbdError> {
	let mut i = 0;
	while i < input.len() {
		if input[i].is_ascii_whitespace() {
			i += 1;
			continue;
		}
		if input[i] != b'<' {
			return Err(SbdError::Malformed(format!(
				"unexpected content before root element at offset {}",
				i
			)));
		}
		if input[i..].starts_with(b"<?") {
			i = skip_until(input, i, b"?>")?;
		} else if input[i..].starts_with(b"<!--") {
			i = skip_until(input, i, b"-->")?;
		} else if input[i..].starts_with(b"<!") {
			i = skip_until(input, i, b">")?;
		} else {
			return Ok(i);
		}
	}
	Err(SbdError::Malformed("no root element found".to_string()))
}

fn skip_until(input: &[u8], from: usize, marker: &[u8]) -> Result<usize, SbdError> {
	input[from..]
		.windows(marker.len())
		.position(|w| w == marker)
		.map(|p| from + p + marker.len())
		.ok_or_else(|| {
			SbdError::Malformed(format!(
				"unterminated construct starting at offset {}",
				from
			))
		})
}

/// Walks the whole input to check well-formedness and resolves the root
/// element's namespace URI and local name.
fn resolve_root_name(bytes: &[u8]) -> Result<(String, String), SbdError> {
	let mut reader = NsReader::from_reader(bytes);
	let mut buf = Vec::new();
	let mut root: Option<(String, String)> = None;
	loop {
		match reader.read_resolved_event_into(&mut buf) {
			Ok((ns, Event::Start(e))) | Ok((ns, Event::Empty(e))) => {
				if root.is_none() {
					let local =
						String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
					let uri = match ns {
						ResolveResult::Bound(namespace) => {
							String::from_utf8_lossy(namespace.as_ref()).into_owned()
						}
						_ => String::new(),
					};
					root = Some((uri, local));
				}
			}
			Ok((_, Event::Eof)) => break,
			Ok(_) => {}
			Err(e) => return Err(SbdError::Malformed(e.to_string())),
		}
		buf.clear();
	}
	root.ok_or_else(|| SbdError::Malformed("document has no root element".to_string()))
}

/// Controls the prefix the SBDH namespace is bound to on serialization.
///
/// The default context maps the SBDH namespace to the default (empty)
/// prefix. Some deployed receivers only accept that form, so a prefixed
/// context must be requested explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceContext {
	sbdh_prefix: Option<String>,
}

impl NamespaceContext {
	/// The compatibility default: SBDH elements in the default namespace.
	pub fn default_prefix() -> Self {
		Self { sbdh_prefix: None }
	}

	/// Binds the SBDH namespace to the given prefix.
	pub fn with_sbdh_prefix(prefix: impl Into<String>) -> Self {
		Self {
			sbdh_prefix: Some(prefix.into()),
		}
	}

	fn qualify(&self, name: &str) -> String {
		match &self.sbdh_prefix {
			Some(prefix) => format!("{}:{}", prefix, name),
			None => name.to_string(),
		}
	}
}

/// A Standard Business Document: routing metadata plus the verbatim
/// business payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardBusinessDocument {
	/// Peppol sender participant.
	pub sender: ParticipantIdentifier,
	/// Peppol receiver participant.
	pub receiver: ParticipantIdentifier,
	/// Document type carried in the DOCUMENTID business scope.
	pub document_type: DocumentTypeIdentifier,
	/// Process carried in the PROCESSID business scope.
	pub process: ProcessIdentifier,
	/// Unique instance identifier of this envelope.
	pub instance_identifier: String,
	/// The `TypeVersion` (UBL version) of the payload.
	pub type_version: String,
	/// Envelope creation time.
	pub creation_date_time: DateTime<Utc>,
	/// The business payload element.
	pub payload: PayloadElement,
}

/// Assembles a Standard Business Document around a payload element.
#[derive(Debug)]
pub struct SbdBuilder {
	sender: ParticipantIdentifier,
	receiver: ParticipantIdentifier,
	document_type: DocumentTypeIdentifier,
	process: ProcessIdentifier,
	instance_identifier: Option<String>,
	type_version: Option<String>,
	payload: PayloadElement,
}

impl SbdBuilder {
	/// Starts a builder from the four routing identifiers and the payload.
	pub fn new(
		sender: ParticipantIdentifier,
		receiver: ParticipantIdentifier,
		document_type: DocumentTypeIdentifier,
		process: ProcessIdentifier,
		payload: PayloadElement,
	) -> Self {
		Self {
			sender,
			receiver,
			document_type,
			process,
			instance_identifier: None,
			type_version: None,
			payload,
		}
	}

	/// Overrides the generated instance identifier.
	pub fn with_instance_identifier(mut self, id: impl Into<String>) -> Self {
		self.instance_identifier = Some(id.into());
		self
	}

	/// Overrides the default `TypeVersion` of `2.1`.
	pub fn with_type_version(mut self, version: impl Into<String>) -> Self {
		self.type_version = Some(version.into());
		self
	}

	/// Builds the document, generating a fresh instance identifier and
	/// applying the default type version where none was given.
	pub fn build(self) -> StandardBusinessDocument {
		StandardBusinessDocument {
			sender: self.sender,
			receiver: self.receiver,
			document_type: self.document_type,
			process: self.process,
			instance_identifier: self
				.instance_identifier
				.unwrap_or_else(|| Uuid::new_v4().to_string()),
			type_version: self
				.type_version
				.unwrap_or_else(|| DEFAULT_TYPE_VERSION.to_string()),
			creation_date_time: Utc::now(),
			payload: self.payload,
		}
	}
}

impl StandardBusinessDocument {
	/// Serializes the document to XML bytes.
	///
	/// Without a namespace context the SBDH namespace lands on the default
	/// (empty) prefix. The payload element is spliced in byte-for-byte.
	pub fn serialize(&self, context: Option<&NamespaceContext>) -> Result<Vec<u8>, SbdError> {
		let default_context = NamespaceContext::default_prefix();
		let ctx = context.unwrap_or(&default_context);

		let mut writer = Writer::new(Vec::new());
		let w = &mut writer;
		write_event(w, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

		let mut root = BytesStart::new(ctx.qualify("StandardBusinessDocument"));
		match &ctx.sbdh_prefix {
			None => root.push_attribute(("xmlns", SBDH_NAMESPACE)),
			Some(prefix) => {
				root.push_attribute((format!("xmlns:{}", prefix).as_str(), SBDH_NAMESPACE))
			}
		}
		write_event(w, Event::Start(root))?;

		write_start(w, &ctx.qualify(HEADER_LOCAL_NAME))?;
		write_text_element(w, &ctx.qualify("HeaderVersion"), "1.0")?;

		for (container, identifier) in [
			("Sender", &self.sender),
			("Receiver", &self.receiver),
		] {
			write_start(w, &ctx.qualify(container))?;
			let mut ident = BytesStart::new(ctx.qualify("Identifier"));
			ident.push_attribute(("Authority", identifier.scheme()));
			write_event(w, Event::Start(ident))?;
			write_event(w, Event::Text(BytesText::new(identifier.value())))?;
			write_end(w, &ctx.qualify("Identifier"))?;
			write_end(w, &ctx.qualify(container))?;
		}

		write_start(w, &ctx.qualify("DocumentIdentification"))?;
		write_text_element(w, &ctx.qualify("Standard"), &self.payload.namespace_uri)?;
		write_text_element(w, &ctx.qualify("TypeVersion"), &self.type_version)?;
		write_text_element(
			w,
			&ctx.qualify("InstanceIdentifier"),
			&self.instance_identifier,
		)?;
		write_text_element(w, &ctx.qualify("Type"), &self.payload.local_name)?;
		write_text_element(
			w,
			&ctx.qualify("CreationDateAndTime"),
			&self
				.creation_date_time
				.to_rfc3339_opts(SecondsFormat::AutoSi, true),
		)?;
		write_end(w, &ctx.qualify("DocumentIdentification"))?;

		write_start(w, &ctx.qualify("BusinessScope"))?;
		for (scope_type, value, identifier_scheme) in [
			(
				"DOCUMENTID",
				self.document_type.value(),
				self.document_type.scheme(),
			),
			("PROCESSID", self.process.value(), self.process.scheme()),
		] {
			write_start(w, &ctx.qualify("Scope"))?;
			write_text_element(w, &ctx.qualify("Type"), scope_type)?;
			write_text_element(w, &ctx.qualify("InstanceIdentifier"), value)?;
			write_text_element(w, &ctx.qualify("Identifier"), identifier_scheme)?;
			write_end(w, &ctx.qualify("Scope"))?;
		}
		write_end(w, &ctx.qualify("BusinessScope"))?;

		write_end(w, &ctx.qualify(HEADER_LOCAL_NAME))?;

		// Payload splice. from_escaped keeps the bytes exactly as supplied.
		let payload = std::str::from_utf8(&self.payload.bytes)
			.map_err(|_| SbdError::PayloadNotUtf8)?;
		write_event(w, Event::Text(BytesText::from_escaped(payload)))?;

		write_end(w, &ctx.qualify("StandardBusinessDocument"))?;
		Ok(writer.into_inner())
	}

	/// Parses a received SBD envelope.
	///
	/// Routing metadata is read from the SBDH; the payload element bytes are
	/// extracted verbatim from between the header close tag and the envelope
	/// close tag.
	pub fn parse(input: &[u8]) -> Result<Self, SbdError> {
		let fields = parse_header_fields(input)?;
		let payload_bytes = extract_payload_slice(input)?;
		let payload = PayloadElement::from_bytes(payload_bytes)?;

		let creation = fields
			.creation_date_time
			.ok_or(SbdError::MissingField("CreationDateAndTime"))?;
		let creation_date_time = DateTime::parse_from_rfc3339(&creation)
			.map_err(|_| SbdError::InvalidTimestamp(creation.clone()))?
			.with_timezone(&Utc);

		Ok(Self {
			sender: ParticipantIdentifier::new(
				fields.sender_scheme.ok_or(SbdError::MissingField("Sender"))?,
				fields.sender_value.ok_or(SbdError::MissingField("Sender"))?,
			),
			receiver: ParticipantIdentifier::new(
				fields
					.receiver_scheme
					.ok_or(SbdError::MissingField("Receiver"))?,
				fields
					.receiver_value
					.ok_or(SbdError::MissingField("Receiver"))?,
			),
			document_type: DocumentTypeIdentifier::new(
				fields
					.document_scheme
					.unwrap_or_else(|| DEFAULT_DOCUMENT_TYPE_SCHEME.to_string()),
				fields
					.document_value
					.ok_or(SbdError::MissingField("BusinessScope DOCUMENTID"))?,
			),
			process: ProcessIdentifier::new(
				fields
					.process_scheme
					.unwrap_or_else(|| DEFAULT_PROCESS_SCHEME.to_string()),
				fields
					.process_value
					.ok_or(SbdError::MissingField("BusinessScope PROCESSID"))?,
			),
			instance_identifier: fields
				.instance_identifier
				.ok_or(SbdError::MissingField("InstanceIdentifier"))?,
			type_version: fields
				.type_version
				.unwrap_or_else(|| DEFAULT_TYPE_VERSION.to_string()),
			creation_date_time,
			payload,
		})
	}
}

fn write_event(w: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), SbdError> {
	w.write_event(event)
		.map_err(|e| SbdError::Write(e.to_string()))
}

fn write_start(w: &mut Writer<Vec<u8>>, name: &str) -> Result<(), SbdError> {
	write_event(w, Event::Start(BytesStart::new(name)))
}

fn write_end(w: &mut Writer<Vec<u8>>, name: &str) -> Result<(), SbdError> {
	write_event(w, Event::End(BytesEnd::new(name)))
}

fn write_text_element(w: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), SbdError> {
	write_start(w, name)?;
	write_event(w, Event::Text(BytesText::new(text)))?;
	write_end(w, name)
}

#[derive(Default)]
struct HeaderFields {
	sender_scheme: Option<String>,
	sender_value: Option<String>,
	receiver_scheme: Option<String>,
	receiver_value: Option<String>,
	type_version: Option<String>,
	instance_identifier: Option<String>,
	creation_date_time: Option<String>,
	document_value: Option<String>,
	document_scheme: Option<String>,
	process_value: Option<String>,
	process_scheme: Option<String>,
}

fn parse_header_fields(input: &[u8]) -> Result<HeaderFields, SbdError> {
	let mut reader = NsReader::from_reader(input);
	let mut buf = Vec::new();
	let mut fields = HeaderFields::default();

	// Path of local names from the envelope root down to the current element.
	let mut path: Vec<String> = Vec::new();
	let mut saw_root = false;
	let mut current_scope_type: Option<String> = None;
	let mut pending_authority: Option<String> = None;

	loop {
		match reader.read_resolved_event_into(&mut buf) {
			Ok((_, Event::Start(e))) => {
				let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
				if !saw_root {
					if local != "StandardBusinessDocument" {
						return Err(SbdError::Malformed(format!(
							"root element is '{}', not StandardBusinessDocument",
							local
						)));
					}
					saw_root = true;
				}
				if path.len() == 3 && path[1] == HEADER_LOCAL_NAME && local == "Identifier" {
					pending_authority = e
						.try_get_attribute("Authority")
						.map_err(|err| SbdError::Malformed(err.to_string()))?
						.map(|a| {
							a.unescape_value()
								.map(|v| v.into_owned())
								.map_err(|err| SbdError::Malformed(err.to_string()))
						})
						.transpose()?;
				}
				path.push(local);
			}
			Ok((_, Event::End(_))) => {
				if path.len() == 4
					&& path[1] == HEADER_LOCAL_NAME
					&& path[2] == "BusinessScope"
					&& path[3] == "Scope"
				{
					current_scope_type = None;
				}
				path.pop();
			}
			Ok((_, Event::Empty(_))) => {}
			Ok((_, Event::Text(t))) => {
				let text = t
					.unescape()
					.map_err(|e| SbdError::Malformed(e.to_string()))?
					.trim()
					.to_string();
				if text.is_empty() || path.len() < 2 || path[1] != HEADER_LOCAL_NAME {
					buf.clear();
					continue;
				}
				let names: Vec<&str> = path.iter().map(String::as_str).collect();
				match &names[1..] {
					[_, "Sender", "Identifier"] => {
						fields.sender_scheme = pending_authority.take();
						fields.sender_value = Some(text);
					}
					[_, "Receiver", "Identifier"] => {
						fields.receiver_scheme = pending_authority.take();
						fields.receiver_value = Some(text);
					}
					[_, "DocumentIdentification", "TypeVersion"] => {
						fields.type_version = Some(text)
					}
					[_, "DocumentIdentification", "InstanceIdentifier"] => {
						fields.instance_identifier = Some(text)
					}
					[_, "DocumentIdentification", "CreationDateAndTime"] => {
						fields.creation_date_time = Some(text)
					}
					[_, "BusinessScope", "Scope", "Type"] => {
						current_scope_type = Some(text)
					}
					[_, "BusinessScope", "Scope", "InstanceIdentifier"] => {
						match current_scope_type.as_deref() {
							Some("DOCUMENTID") => fields.document_value = Some(text),
							Some("PROCESSID") => fields.process_value = Some(text),
							_ => {}
						}
					}
					[_, "BusinessScope", "Scope", "Identifier"] => {
						match current_scope_type.as_deref() {
							Some("DOCUMENTID") => fields.document_scheme = Some(text),
							Some("PROCESSID") => fields.process_scheme = Some(text),
							_ => {}
						}
					}
					_ => {}
				}
			}
			Ok((_, Event::Eof)) => break,
			Ok(_) => {}
			Err(e) => return Err(SbdError::Malformed(e.to_string())),
		}
		buf.clear();
	}

	if !saw_root {
		return Err(SbdError::Malformed("document has no root element".to_string()));
	}
	Ok(fields)
}

/// The raw payload slice: everything between the SBDH close tag and the
/// envelope close tag.
fn extract_payload_slice(input: &[u8]) -> Result<&[u8], SbdError> {
	let header_close = find_close_tag(input, HEADER_LOCAL_NAME.as_bytes())
		.ok_or(SbdError::MissingField("StandardBusinessDocumentHeader"))?;
	let after_header = skip_until(input, header_close, b">")?;

	let root_close = input
		.windows(2)
		.rposition(|w| w == b"</")
		.ok_or_else(|| SbdError::Malformed("envelope close tag not found".to_string()))?;
	if root_close < after_header {
		return Err(SbdError::Malformed(
			"no payload element after the SBDH".to_string(),
		));
	}
	Ok(&input[after_header..root_close])
}

/// Offset of the first `</...local_name` close tag (prefix-agnostic).
fn find_close_tag(input: &[u8], local_name: &[u8]) -> Option<usize> {
	let mut i = 0;
	while let Some(p) = input[i..].windows(2).position(|w| w == b"</") {
		let tag_start = i + p;
		let name_start = tag_start + 2;
		let name_end = input[name_start..]
			.iter()
			.position(|&b| b == b'>' || b.is_ascii_whitespace())
			.map(|q| name_start + q)?;
		let qname = &input[name_start..name_end];
		let local = match qname.iter().rposition(|&b| b == b':') {
			Some(colon) => &qname[colon + 1..],
			None => qname,
		};
		if local == local_name {
			return Some(tag_start);
		}
		i = name_end;
	}
	None
}
