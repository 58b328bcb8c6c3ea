//! Content-Transfer-Encoding values for the AS2 body part.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when an encoding name is not recognized.
#[derive(Debug, Error)]
#[error("unknown content transfer encoding '{0}'")]
pub struct UnknownEncoding(String);

/// The Content-Transfer-Encoding applied to the AS2 body part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentTransferEncoding {
	/// `7bit` pass-through.
	#[serde(rename = "7bit")]
	SevenBit,
	/// `8bit` pass-through.
	#[serde(rename = "8bit")]
	EightBit,
	/// `binary` pass-through. Default for Peppol AS2.
	#[default]
	Binary,
	/// Base64 with 76 character line wrapping.
	Base64,
	/// Quoted-printable.
	QuotedPrintable,
}

impl ContentTransferEncoding {
	/// The header value announced on the MIME part.
	pub fn as_header_value(&self) -> &'static str {
		match self {
			ContentTransferEncoding::SevenBit => "7bit",
			ContentTransferEncoding::EightBit => "8bit",
			ContentTransferEncoding::Binary => "binary",
			ContentTransferEncoding::Base64 => "base64",
			ContentTransferEncoding::QuotedPrintable => "quoted-printable",
		}
	}
}

impl fmt::Display for ContentTransferEncoding {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_header_value())
	}
}

impl FromStr for ContentTransferEncoding {
	type Err = UnknownEncoding;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"7bit" => Ok(ContentTransferEncoding::SevenBit),
			"8bit" => Ok(ContentTransferEncoding::EightBit),
			"binary" => Ok(ContentTransferEncoding::Binary),
			"base64" => Ok(ContentTransferEncoding::Base64),
			"quoted-printable" => Ok(ContentTransferEncoding::QuotedPrintable),
			other => Err(UnknownEncoding(other.to_string())),
		}
	}
}
