//! Peppol identifier value types.
//!
//! Participant, document-type and process identifiers all share the same
//! `{scheme, value}` shape. The canonical wire form is the URI-encoded
//! `scheme::value` string used in SMP paths and SBDH business scopes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default scheme for Peppol participant identifiers.
pub const DEFAULT_PARTICIPANT_SCHEME: &str = "iso6523-actorid-upis";
/// Default scheme for Peppol document type identifiers.
pub const DEFAULT_DOCUMENT_TYPE_SCHEME: &str = "busdox-docid-qns";
/// Default scheme for Peppol process identifiers.
pub const DEFAULT_PROCESS_SCHEME: &str = "cenbii-procid-ubl";

/// Errors that can occur when parsing identifiers from their URI-encoded form.
#[derive(Debug, Error)]
pub enum IdentifierError {
	/// The input did not contain the `::` scheme separator.
	#[error("missing '::' separator in identifier '{0}'")]
	MissingSeparator(String),
	/// The value part of the identifier was empty.
	#[error("empty value in identifier '{0}'")]
	EmptyValue(String),
}

fn split_uri_encoded(input: &str) -> Result<(String, String), IdentifierError> {
	let (scheme, value) = input
		.split_once("::")
		.ok_or_else(|| IdentifierError::MissingSeparator(input.to_string()))?;
	if value.is_empty() {
		return Err(IdentifierError::EmptyValue(input.to_string()));
	}
	Ok((scheme.to_string(), value.to_string()))
}

/// Identifier of a Peppol participant (sender or receiver Access Point
/// customer), e.g. `iso6523-actorid-upis::9915:test`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantIdentifier {
	scheme: String,
	value: String,
}

impl ParticipantIdentifier {
	/// Creates an identifier with an explicit scheme.
	pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			scheme: scheme.into(),
			value: value.into(),
		}
	}

	/// Creates an identifier with the default Peppol participant scheme.
	pub fn from_value(value: impl Into<String>) -> Self {
		Self::new(DEFAULT_PARTICIPANT_SCHEME, value)
	}

	/// The identifier scheme.
	pub fn scheme(&self) -> &str {
		&self.scheme
	}

	/// The identifier value.
	pub fn value(&self) -> &str {
		&self.value
	}

	/// The canonical `scheme::value` form.
	pub fn uri_encoded(&self) -> String {
		format!("{}::{}", self.scheme, self.value)
	}

	/// Checks whether this identifier uses the given scheme.
	pub fn has_scheme(&self, expected: &str) -> bool {
		self.scheme == expected
	}

	/// Checks whether this identifier uses the default Peppol scheme.
	pub fn has_default_scheme(&self) -> bool {
		self.has_scheme(DEFAULT_PARTICIPANT_SCHEME)
	}
}

impl fmt::Display for ParticipantIdentifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}::{}", self.scheme, self.value)
	}
}

impl FromStr for ParticipantIdentifier {
	type Err = IdentifierError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (scheme, value) = split_uri_encoded(s)?;
		Ok(Self { scheme, value })
	}
}

/// Identifier of a Peppol document type, e.g.
/// `busdox-docid-qns::urn:oasis:...::Invoice##...::2.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentTypeIdentifier {
	scheme: String,
	value: String,
}

impl DocumentTypeIdentifier {
	/// Creates an identifier with an explicit scheme.
	pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			scheme: scheme.into(),
			value: value.into(),
		}
	}

	/// Creates an identifier with the default Peppol document type scheme.
	pub fn from_value(value: impl Into<String>) -> Self {
		Self::new(DEFAULT_DOCUMENT_TYPE_SCHEME, value)
	}

	/// The identifier scheme.
	pub fn scheme(&self) -> &str {
		&self.scheme
	}

	/// The identifier value.
	pub fn value(&self) -> &str {
		&self.value
	}

	/// The canonical `scheme::value` form.
	pub fn uri_encoded(&self) -> String {
		format!("{}::{}", self.scheme, self.value)
	}

	/// Checks whether this identifier uses the given scheme.
	pub fn has_scheme(&self, expected: &str) -> bool {
		self.scheme == expected
	}

	/// Checks whether this identifier uses the default Peppol scheme.
	pub fn has_default_scheme(&self) -> bool {
		self.has_scheme(DEFAULT_DOCUMENT_TYPE_SCHEME)
	}
}

impl fmt::Display for DocumentTypeIdentifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}::{}", self.scheme, self.value)
	}
}

impl FromStr for DocumentTypeIdentifier {
	type Err = IdentifierError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (scheme, value) = split_uri_encoded(s)?;
		Ok(Self { scheme, value })
	}
}

/// Identifier of a Peppol business process, e.g.
/// `cenbii-procid-ubl::urn:www.cenbii.eu:profile:bii04:ver2.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessIdentifier {
	scheme: String,
	value: String,
}

impl ProcessIdentifier {
	/// Creates an identifier with an explicit scheme.
	pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			scheme: scheme.into(),
			value: value.into(),
		}
	}

	/// Creates an identifier with the default Peppol process scheme.
	pub fn from_value(value: impl Into<String>) -> Self {
		Self::new(DEFAULT_PROCESS_SCHEME, value)
	}

	/// The identifier scheme.
	pub fn scheme(&self) -> &str {
		&self.scheme
	}

	/// The identifier value.
	pub fn value(&self) -> &str {
		&self.value
	}

	/// The canonical `scheme::value` form.
	pub fn uri_encoded(&self) -> String {
		format!("{}::{}", self.scheme, self.value)
	}

	/// Checks whether this identifier uses the given scheme.
	pub fn has_scheme(&self, expected: &str) -> bool {
		self.scheme == expected
	}

	/// Checks whether this identifier uses the default Peppol scheme.
	pub fn has_default_scheme(&self) -> bool {
		self.has_scheme(DEFAULT_PROCESS_SCHEME)
	}
}

impl fmt::Display for ProcessIdentifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}::{}", self.scheme, self.value)
	}
}

impl FromStr for ProcessIdentifier {
	type Err = IdentifierError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (scheme, value) = split_uri_encoded(s)?;
		Ok(Self { scheme, value })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_uri_encoded_round_trip() {
		let id = ParticipantIdentifier::from_value("9915:test");
		assert_eq!(id.uri_encoded(), "iso6523-actorid-upis::9915:test");

		let parsed: ParticipantIdentifier = id.uri_encoded().parse().unwrap();
		assert_eq!(parsed, id);
		assert!(parsed.has_default_scheme());
	}

	#[test]
	fn test_explicit_scheme() {
		let id = DocumentTypeIdentifier::new("my-scheme", "my-value");
		assert!(id.has_scheme("my-scheme"));
		assert!(!id.has_default_scheme());
		assert_eq!(id.to_string(), "my-scheme::my-value");
	}

	#[test]
	fn test_parse_rejects_missing_separator() {
		let result = ProcessIdentifier::from_str("no-separator-here");
		assert!(matches!(result, Err(IdentifierError::MissingSeparator(_))));
	}

	#[test]
	fn test_parse_rejects_empty_value() {
		let result = ParticipantIdentifier::from_str("iso6523-actorid-upis::");
		assert!(matches!(result, Err(IdentifierError::EmptyValue(_))));
	}

	#[test]
	fn test_document_type_with_double_colon_in_value() {
		// Document type values themselves contain `::` separators; only the
		// first one splits scheme from value.
		let raw = "busdox-docid-qns::urn:oasis:names:specification:ubl:schema:xsd:Invoice-2::Invoice##urn:www.cenbii.eu:transaction:biitrns010:ver2.0::2.1";
		let id: DocumentTypeIdentifier = raw.parse().unwrap();
		assert_eq!(id.scheme(), "busdox-docid-qns");
		assert!(id.value().starts_with("urn:oasis"));
		assert_eq!(id.uri_encoded(), raw);
	}
}
