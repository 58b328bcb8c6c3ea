//! Validation result types and the validation result handler interface.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity of a single validation result item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
	/// Informational only.
	Info,
	/// Worth surfacing, does not forbid the send.
	Warning,
	/// Rule violation. Whether it aborts the send is the handler's call.
	Error,
}

/// A single finding produced by a validation rule set execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationItem {
	/// Severity of the finding.
	pub severity: Severity,
	/// Location inside the document, when the rule engine provides one.
	pub location: Option<String>,
	/// Human-readable rule text.
	pub text: String,
}

impl ValidationItem {
	/// Creates an error-severity item.
	pub fn error(text: impl Into<String>) -> Self {
		Self {
			severity: Severity::Error,
			location: None,
			text: text.into(),
		}
	}

	/// Creates a warning-severity item.
	pub fn warning(text: impl Into<String>) -> Self {
		Self {
			severity: Severity::Warning,
			location: None,
			text: text.into(),
		}
	}

	/// Creates an info-severity item.
	pub fn info(text: impl Into<String>) -> Self {
		Self {
			severity: Severity::Info,
			location: None,
			text: text.into(),
		}
	}

	/// Attaches a document location to the item.
	pub fn at(mut self, location: impl Into<String>) -> Self {
		self.location = Some(location.into());
		self
	}

	/// Whether this item has error severity.
	pub fn is_error(&self) -> bool {
		self.severity == Severity::Error
	}
}

/// Raised by a validation result handler to abort the send.
#[derive(Debug, Error)]
#[error("validation rejected: {message}")]
pub struct ValidationRejection {
	/// Why the handler aborted.
	pub message: String,
}

impl ValidationRejection {
	/// Creates a rejection with the given message.
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}
}

/// Receiver of validation outcomes. `on_errors` is invoked exactly once when
/// any error-severity item is present, `on_success` otherwise. The handler
/// decides whether errors abort the send by returning a rejection.
pub trait ValidationResultHandler: Send + Sync {
	/// Called with the full result list when it contains errors.
	fn on_errors(&self, items: &[ValidationItem]) -> Result<(), ValidationRejection>;

	/// Called with the full result list when it contains no errors.
	fn on_success(&self, items: &[ValidationItem]);
}

/// Default handler: logs errors and continues.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingValidationResultHandler;

impl ValidationResultHandler for LoggingValidationResultHandler {
	fn on_errors(&self, items: &[ValidationItem]) -> Result<(), ValidationRejection> {
		for item in items.iter().filter(|i| i.is_error()) {
			tracing::warn!(location = item.location.as_deref(), "Validation error: {}", item.text);
		}
		Ok(())
	}

	fn on_success(&self, items: &[ValidationItem]) {
		tracing::debug!(items = items.len(), "Validation passed");
	}
}

/// Strict handler: aborts the send on the first error-severity item.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingValidationResultHandler;

impl ValidationResultHandler for RejectingValidationResultHandler {
	fn on_errors(&self, items: &[ValidationItem]) -> Result<(), ValidationRejection> {
		let first = items
			.iter()
			.find(|i| i.is_error())
			.map(|i| i.text.clone())
			.unwrap_or_else(|| "unspecified validation error".to_string());
		Err(ValidationRejection::new(first))
	}

	fn on_success(&self, _items: &[ValidationItem]) {}
}
