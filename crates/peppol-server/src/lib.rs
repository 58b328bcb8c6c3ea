//! Inbound AS2 endpoint for the Peppol AS2 subsystem.
//!
//! This module receives AS2 messages over HTTP, verifies and unwraps them,
//! parses the Standard Business Document, delivers it to the registered
//! incoming handlers in registration order, and answers with a signed MDN.
//! Handlers are registered explicitly at server construction; they run on
//! the server's task pool and must be thread-safe.

use async_trait::async_trait;
use axum::routing::post;
use axum::Router;
use peppol_keystore::KeyStore;
use peppol_sbd::StandardBusinessDocument;
use peppol_types::IncomingDumper;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

mod inbound;

/// Errors that can occur while running the inbound endpoint.
#[derive(Debug, Error)]
pub enum ServerError {
	/// The listener could not be bound or the server loop failed.
	#[error("server error: {0}")]
	Serve(String),
	/// An incoming handler rejected the document.
	#[error("handler error: {0}")]
	Handler(String),
}

/// Routing metadata of a received AS2 message.
#[derive(Debug, Clone)]
pub struct IncomingMetadata {
	/// The `AS2-From` identifier of the sending Access Point.
	pub as2_from: String,
	/// The `AS2-To` identifier the message was addressed to.
	pub as2_to: String,
	/// The `Message-ID` of the AS2 message, when present.
	pub message_id: Option<String>,
}

/// Trait defining the interface for incoming SBD handlers.
///
/// Every registered handler receives every successfully unwrapped document,
/// in registration order. A failing handler is logged and the remaining
/// handlers still run (unless the server is configured to abort), but the
/// final MDN reports an error.
#[async_trait]
pub trait IncomingSbdHandlerInterface: Send + Sync {
	/// Delivers one parsed Standard Business Document.
	async fn on_incoming_sbd(
		&self,
		metadata: &IncomingMetadata,
		sbd: &StandardBusinessDocument,
	) -> Result<(), ServerError>;
}

pub(crate) struct ServerState {
	pub(crate) key_store: RwLock<KeyStore>,
	pub(crate) key_alias: String,
	pub(crate) save_key_store_changes: bool,
	pub(crate) abort_on_handler_error: bool,
	pub(crate) handlers: Vec<Arc<dyn IncomingSbdHandlerInterface>>,
	pub(crate) incoming_dumper: Option<Arc<dyn IncomingDumper>>,
}

/// Builder assembling the inbound endpoint.
pub struct As2ServerBuilder {
	key_store: KeyStore,
	key_alias: String,
	save_key_store_changes: bool,
	abort_on_handler_error: bool,
	handlers: Vec<Arc<dyn IncomingSbdHandlerInterface>>,
	incoming_dumper: Option<Arc<dyn IncomingDumper>>,
	as2_path: String,
}

impl As2ServerBuilder {
	/// Starts a builder from the server key store and the alias of the key
	/// MDNs are signed with.
	pub fn new(key_store: KeyStore, key_alias: impl Into<String>) -> Self {
		Self {
			key_store,
			key_alias: key_alias.into(),
			save_key_store_changes: false,
			abort_on_handler_error: false,
			handlers: Vec::new(),
			incoming_dumper: None,
			as2_path: "/as2".to_string(),
		}
	}

	/// Registers an incoming handler. Handlers run in registration order.
	pub fn register_handler(mut self, handler: Arc<dyn IncomingSbdHandlerInterface>) -> Self {
		self.handlers.push(handler);
		self
	}

	/// Persists partner certificates learned from verified inbound
	/// messages.
	pub fn with_save_key_store_changes(mut self, save: bool) -> Self {
		self.save_key_store_changes = save;
		self
	}

	/// Stops dispatching to remaining handlers after the first failure.
	pub fn with_abort_on_handler_error(mut self, abort: bool) -> Self {
		self.abort_on_handler_error = abort;
		self
	}

	/// Installs an incoming dump hook observing every raw request.
	pub fn with_incoming_dumper(mut self, dumper: Arc<dyn IncomingDumper>) -> Self {
		self.incoming_dumper = Some(dumper);
		self
	}

	/// Overrides the path the AS2 endpoint is served under.
	pub fn with_as2_path(mut self, path: impl Into<String>) -> Self {
		self.as2_path = path.into();
		self
	}

	/// Builds the server.
	pub fn build(self) -> As2Server {
		As2Server {
			state: Arc::new(ServerState {
				key_store: RwLock::new(self.key_store),
				key_alias: self.key_alias,
				save_key_store_changes: self.save_key_store_changes,
				abort_on_handler_error: self.abort_on_handler_error,
				handlers: self.handlers,
				incoming_dumper: self.incoming_dumper,
			}),
			as2_path: self.as2_path,
		}
	}
}

/// The inbound AS2 endpoint.
pub struct As2Server {
	pub(crate) state: Arc<ServerState>,
	as2_path: String,
}

impl As2Server {
	/// The axum router serving the AS2 endpoint.
	pub fn router(&self) -> Router {
		Router::new()
			.route(&self.as2_path, post(inbound::handle_as2))
			.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
			.with_state(self.state.clone())
	}

	/// Binds the listener and serves requests until the task is aborted.
	pub async fn serve(&self, bind_address: &str) -> Result<(), ServerError> {
		let listener = TcpListener::bind(bind_address)
			.await
			.map_err(|e| ServerError::Serve(e.to_string()))?;
		tracing::info!(
			bind_address = bind_address,
			path = %self.as2_path,
			handlers = self.state.handlers.len(),
			"AS2 inbound endpoint starting"
		);
		axum::serve(listener, self.router())
			.await
			.map_err(|e| ServerError::Serve(e.to_string()))
	}
}
