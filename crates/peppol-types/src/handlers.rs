//! Message and certificate-check handler interfaces.
//!
//! These are the pluggable sinks the send pipeline reports into. The
//! message handler centralizes warnings and errors up to the send boundary;
//! the certificate-check strategy decides whether an invalid Access Point
//! certificate aborts the send.

use crate::certificate::{CertificateError, CertificateStatus};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Severity of a recorded pipeline message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
	/// Non-fatal; the send may proceed.
	Warning,
	/// Fatal once verification completes; the send is forbidden.
	Error,
}

/// A single message recorded during builder verification or SMP resolution.
#[derive(Debug, Clone)]
pub struct RecordedMessage {
	/// Severity of the message.
	pub level: MessageLevel,
	/// Human-readable description of the issue.
	pub text: String,
	/// Stringified cause, when the issue wraps an underlying error.
	pub cause: Option<String>,
}

/// Sink for warnings and errors produced by the send pipeline. The pipeline
/// consults `error_count` after verification; a positive count forbids the
/// send.
pub trait MessageHandler: Send + Sync {
	/// Records a warning.
	fn warn(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>);

	/// Records an error.
	fn error(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>);

	/// Number of errors recorded so far.
	fn error_count(&self) -> usize;
}

/// Default message handler: accumulates all messages for later inspection
/// and mirrors them onto the tracing subscriber.
#[derive(Default)]
pub struct CollectingMessageHandler {
	messages: Mutex<Vec<RecordedMessage>>,
}

impl CollectingMessageHandler {
	/// Creates an empty handler.
	pub fn new() -> Self {
		Self::default()
	}

	fn record(&self, level: MessageLevel, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
		let mut messages = self.messages.lock().expect("message handler lock poisoned");
		messages.push(RecordedMessage {
			level,
			text: message.to_string(),
			cause: cause.map(|c| c.to_string()),
		});
	}

	/// Snapshot of everything recorded so far.
	pub fn messages(&self) -> Vec<RecordedMessage> {
		self.messages
			.lock()
			.expect("message handler lock poisoned")
			.clone()
	}

	/// The texts of all recorded errors, for failure reporting.
	pub fn error_messages(&self) -> Vec<String> {
		self.messages()
			.into_iter()
			.filter(|m| m.level == MessageLevel::Error)
			.map(|m| m.text)
			.collect()
	}
}

impl MessageHandler for CollectingMessageHandler {
	fn warn(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
		tracing::warn!(cause = cause.map(|c| c.to_string()), "{}", message);
		self.record(MessageLevel::Warning, message, cause);
	}

	fn error(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
		tracing::error!(cause = cause.map(|c| c.to_string()), "{}", message);
		self.record(MessageLevel::Error, message, cause);
	}

	fn error_count(&self) -> usize {
		self.messages()
			.iter()
			.filter(|m| m.level == MessageLevel::Error)
			.count()
	}
}

/// Message handler that only logs, keeping a bare error counter. Useful for
/// long-running senders that do not inspect individual messages.
#[derive(Default)]
pub struct TracingMessageHandler {
	errors: AtomicUsize,
}

impl TracingMessageHandler {
	/// Creates a handler with a zeroed error counter.
	pub fn new() -> Self {
		Self::default()
	}
}

impl MessageHandler for TracingMessageHandler {
	fn warn(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
		tracing::warn!(cause = cause.map(|c| c.to_string()), "{}", message);
	}

	fn error(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
		tracing::error!(cause = cause.map(|c| c.to_string()), "{}", message);
		self.errors.fetch_add(1, Ordering::Relaxed);
	}

	fn error_count(&self) -> usize {
		self.errors.load(Ordering::Relaxed)
	}
}

/// Receiver of the Access Point certificate check outcome. A custom handler
/// decides whether a given outcome aborts the send by returning an error.
pub trait CertificateCheckResultHandler: Send + Sync {
	/// Called once with the checked certificate, the check instant and the
	/// outcome. Returning an error aborts the send.
	fn on_result(
		&self,
		cert_der: &[u8],
		checked_at: DateTime<Utc>,
		outcome: &CertificateStatus,
	) -> Result<(), CertificateError>;
}

/// Strategy applied to the certificate check outcome.
#[derive(Clone, Default)]
pub enum CertificateCheckStrategy {
	/// Reject on any outcome other than `Valid`. The default.
	#[default]
	StrictReject,
	/// Log a warning for invalid outcomes but let the send proceed.
	PermissiveWarn,
	/// Delegate the decision to a custom handler.
	Custom(Arc<dyn CertificateCheckResultHandler>),
}

impl CertificateCheckStrategy {
	/// Applies the strategy to a check outcome.
	pub fn handle(
		&self,
		cert_der: &[u8],
		checked_at: DateTime<Utc>,
		outcome: &CertificateStatus,
	) -> Result<(), CertificateError> {
		match self {
			CertificateCheckStrategy::StrictReject => {
				if outcome.is_valid() {
					Ok(())
				} else {
					Err(CertificateError::Rejected(outcome.to_string()))
				}
			}
			CertificateCheckStrategy::PermissiveWarn => {
				if !outcome.is_valid() {
					tracing::warn!(
						outcome = %outcome,
						"Receiver certificate failed its check, continuing anyway"
					);
				}
				Ok(())
			}
			CertificateCheckStrategy::Custom(handler) => {
				handler.on_result(cert_der, checked_at, outcome)
			}
		}
	}
}

impl fmt::Debug for CertificateCheckStrategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CertificateCheckStrategy::StrictReject => f.write_str("StrictReject"),
			CertificateCheckStrategy::PermissiveWarn => f.write_str("PermissiveWarn"),
			CertificateCheckStrategy::Custom(_) => f.write_str("Custom(..)"),
		}
	}
}
