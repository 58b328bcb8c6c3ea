//! Dump hook interfaces.
//!
//! Dumpers observe raw wire traffic for audit trails and debugging. Both
//! hooks are optional; when absent, nothing is recorded.

/// Observer of outbound AS2 messages, invoked once per send with the final
/// wire headers and body.
pub trait OutgoingDumper: Send + Sync {
	/// Records an outbound message.
	fn dump(&self, message_id: &str, headers: &[(String, String)], body: &[u8]);
}

/// Observer of inbound AS2 traffic (the MDN on the client side, the full
/// request on the server side).
pub trait IncomingDumper: Send + Sync {
	/// Records an inbound message.
	fn dump(&self, headers: &[(String, String)], body: &[u8]);
}
