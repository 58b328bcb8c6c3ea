//! AS2 settings assembled by the orchestrator before the send.

use peppol_keystore::KeyStore;
use peppol_types::{ContentTransferEncoding, IncomingDumper, OutgoingDumper, SigningAlgorithm};
use std::sync::Arc;
use std::time::Duration;

/// The `Disposition-Notification-To` value sent by default. The header must
/// be present to coax some receiver implementations into issuing an MDN;
/// its value is ignored for synchronous MDNs.
pub const DEFAULT_DISPOSITION_NOTIFICATION_TO: &str = "dummy";

/// Sender-side partnership data.
#[derive(Debug, Clone)]
pub struct As2SenderSettings {
	/// The sender AS2 identifier (`AS2-From`).
	pub as2_id: String,
	/// The sender contact email, sent in the `From` header.
	pub email: String,
	/// Alias of the signing key in the key store.
	pub key_alias: String,
}

/// Receiver-side partnership data.
#[derive(Debug, Clone)]
pub struct As2ReceiverSettings {
	/// The receiver AS2 identifier (`AS2-To`).
	pub as2_id: String,
	/// Alias the receiver certificate is stored under.
	pub key_alias: String,
	/// The endpoint URL the message is POSTed to.
	pub url: String,
}

/// Everything the transport needs for one send: key material, partnership
/// data, MDN disposition options, encodings and timeouts.
#[derive(Clone)]
pub struct As2Settings {
	/// The loaded key store holding the sender's private key.
	pub key_store: Arc<KeyStore>,
	/// Sender partnership data.
	pub sender: As2SenderSettings,
	/// Receiver partnership data.
	pub receiver: As2ReceiverSettings,
	/// DER-encoded receiver certificate the MDN signature is checked
	/// against.
	pub receiver_certificate: Vec<u8>,
	/// Partnership name, `<senderAS2Id>-<receiverAS2Id>`.
	pub partnership_name: String,
	/// Digest algorithm for signing and MIC computation.
	pub signing_algorithm: SigningAlgorithm,
	/// Message-ID template with `$...$` replacement tokens.
	pub message_id_template: String,
	/// Bound on TCP connect plus TLS handshake.
	pub connect_timeout: Duration,
	/// Bound on any single socket read.
	pub read_timeout: Duration,
	/// Transfer encoding of the body part.
	pub content_transfer_encoding: ContentTransferEncoding,
	/// MIME type of the body part.
	pub mime_type: String,
	/// When true the payload travels as typed binary; when false it is
	/// attached as a UTF-8 string with the content type set explicitly.
	pub use_data_handler: bool,
	/// Where MDNs are requested to be sent. Kept at `dummy` by default.
	pub disposition_notification_to: String,
	/// Explicit HTTP proxy URL, if any.
	pub proxy: Option<String>,
	/// When true the full wire messages are logged at debug level.
	pub debug: bool,
	/// Observer of the final outbound message.
	pub outgoing_dumper: Option<Arc<dyn OutgoingDumper>>,
	/// Observer of the raw MDN response.
	pub incoming_dumper: Option<Arc<dyn IncomingDumper>>,
}

impl As2Settings {
	/// The `Disposition-Notification-Options` header value requesting a
	/// signed MDN whose MIC uses the configured signing algorithm.
	pub fn mdn_disposition_options(&self) -> String {
		format!(
			"signed-receipt-protocol=required, pkcs7-signature; signed-receipt-micalg=required, {}",
			self.signing_algorithm.mic_alg_id()
		)
	}

	/// The partnership name for two AS2 identifiers.
	pub fn partnership_name_for(sender_as2_id: &str, receiver_as2_id: &str) -> String {
		format!("{}-{}", sender_as2_id, receiver_as2_id)
	}
}
