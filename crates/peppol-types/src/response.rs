//! AS2 response and MDN types.

use chrono::{DateTime, Utc};

/// The parsed Message Disposition Notification returned by the receiving
/// Access Point.
#[derive(Debug, Clone, Default)]
pub struct MdnInfo {
	/// The `Disposition` field, e.g. `automatic-action/MDN-sent-automatically; processed`.
	pub disposition: String,
	/// The `Original-Message-ID` field, when present.
	pub original_message_id: Option<String>,
	/// The `Received-Content-MIC` digest value, base64.
	pub received_mic: Option<String>,
	/// The MIC algorithm named next to the digest.
	pub mic_algorithm: Option<String>,
	/// Whether the received MIC matched the MIC computed over the outbound
	/// body. `None` when no MIC was received.
	pub mic_matched: Option<bool>,
	/// Whether the MDN signature verified against the receiver certificate.
	pub signature_verified: bool,
}

impl MdnInfo {
	/// Whether the disposition reports successful processing.
	pub fn is_processed(&self) -> bool {
		let lower = self.disposition.to_ascii_lowercase();
		lower.contains("processed") && !lower.contains("error") && !lower.contains("failed")
	}
}

/// Outcome of a synchronous AS2 send. Transport failures after the send
/// boundary are captured here as attributes, never raised, so the caller can
/// always inspect headers and MIC outcomes.
#[derive(Debug, Clone)]
pub struct As2Response {
	/// The parsed MDN, when the response carried one.
	pub mdn: Option<MdnInfo>,
	/// When the response (or failure) was recorded.
	pub received_at: DateTime<Utc>,
	/// Response headers in receive order.
	pub headers: Vec<(String, String)>,
	/// Stringified transport or MDN-verification failure, if any.
	pub exception: Option<String>,
	/// The raw response body, lossily decoded for diagnostics.
	pub raw_text: String,
}

impl As2Response {
	/// An empty response recording only a failure.
	pub fn failure(message: impl Into<String>) -> Self {
		Self {
			mdn: None,
			received_at: Utc::now(),
			headers: Vec::new(),
			exception: Some(message.into()),
			raw_text: String::new(),
		}
	}

	/// Whether an MDN was present in the response.
	pub fn mdn_present(&self) -> bool {
		self.mdn.is_some()
	}

	/// Whether a transport-level failure was captured.
	pub fn has_exception(&self) -> bool {
		self.exception.is_some()
	}

	/// Case-insensitive response header lookup.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_failure_response() {
		let response = As2Response::failure("connection refused");
		assert!(!response.mdn_present());
		assert!(response.has_exception());
	}

	#[test]
	fn test_disposition_processed() {
		let mut mdn = MdnInfo {
			disposition: "automatic-action/MDN-sent-automatically; processed".to_string(),
			..Default::default()
		};
		assert!(mdn.is_processed());

		mdn.disposition =
			"automatic-action/MDN-sent-automatically; processed/error: unexpected-processing-error"
				.to_string();
		assert!(!mdn.is_processed());
	}

	#[test]
	fn test_header_lookup_is_case_insensitive() {
		let response = As2Response {
			mdn: None,
			received_at: Utc::now(),
			headers: vec![("AS2-From".to_string(), "POP000092".to_string())],
			exception: None,
			raw_text: String::new(),
		};
		assert_eq!(response.header("as2-from"), Some("POP000092"));
		assert_eq!(response.header("missing"), None);
	}
}
