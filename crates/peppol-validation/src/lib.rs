//! Payload validation module for the Peppol AS2 subsystem.
//!
//! This module adapts external validation engines behind a registry of
//! named rule sets. The send pipeline asks for a rule set by identifier and
//! routes the outcome through a pluggable result handler which decides
//! whether errors abort the send.

use peppol_types::{ValidationItem, ValidationRejection, ValidationResultHandler};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during payload validation.
#[derive(Debug, Error)]
pub enum ValidationError {
	/// The requested rule set identifier is not registered.
	#[error("unknown validation rule set '{0}'")]
	UnknownRuleSet(String),
	/// The rule engine itself failed to execute.
	#[error("validation execution failed: {0}")]
	Execution(String),
	/// The result handler aborted the send.
	#[error(transparent)]
	Rejected(#[from] ValidationRejection),
}

/// Trait defining the interface for validation executors.
///
/// An executor runs one named rule set against a serialized XML business
/// document and reports its findings. Execution is synchronous; rule
/// engines are CPU-bound.
pub trait ValidationExecutorInterface: Send + Sync {
	/// Runs the rule set against the document and returns all findings.
	fn validate(&self, xml: &[u8]) -> Result<Vec<ValidationItem>, ValidationError>;
}

/// Service that manages named validation rule sets.
pub struct ValidationService {
	/// Registered executors by rule set identifier.
	executors: HashMap<String, Box<dyn ValidationExecutorInterface>>,
}

impl ValidationService {
	/// Creates a service with no registered rule sets.
	pub fn new() -> Self {
		Self {
			executors: HashMap::new(),
		}
	}

	/// Registers an executor under a rule set identifier, replacing any
	/// previous registration for the same identifier.
	pub fn register(
		&mut self,
		rule_set_id: impl Into<String>,
		executor: Box<dyn ValidationExecutorInterface>,
	) {
		self.executors.insert(rule_set_id.into(), executor);
	}

	/// Whether a rule set identifier is registered.
	pub fn contains(&self, rule_set_id: &str) -> bool {
		self.executors.contains_key(rule_set_id)
	}

	/// Validates a document against the named rule set.
	///
	/// When any error-severity finding is present the handler's `on_errors`
	/// is invoked exactly once with the full result list; otherwise
	/// `on_success` is invoked. The handler aborts by returning a rejection,
	/// which surfaces as `ValidationError::Rejected`.
	pub fn validate(
		&self,
		rule_set_id: &str,
		xml: &[u8],
		handler: &dyn ValidationResultHandler,
	) -> Result<Vec<ValidationItem>, ValidationError> {
		let executor = self
			.executors
			.get(rule_set_id)
			.ok_or_else(|| ValidationError::UnknownRuleSet(rule_set_id.to_string()))?;

		let items = executor.validate(xml)?;
		let error_count = items.iter().filter(|i| i.is_error()).count();
		if error_count > 0 {
			tracing::warn!(
				rule_set = rule_set_id,
				errors = error_count,
				"Validation produced errors"
			);
			handler.on_errors(&items)?;
		} else {
			handler.on_success(&items);
		}
		Ok(items)
	}
}

impl Default for ValidationService {
	fn default() -> Self {
		Self::new()
	}
}
