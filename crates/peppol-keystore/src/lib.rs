//! Key store module for the Peppol AS2 subsystem.
//!
//! A PKCS#12 container holds the sender's private key and certificate plus
//! the partner certificates learned from inbound traffic. The store is
//! loaded once per send (or once per server), mutated in memory, and
//! rewritten atomically when persistence is enabled. Concurrent writers of
//! the same file are not coordinated here; a file-mtime check at save time
//! surfaces the conflict instead.

use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// Errors that can occur during key store operations.
#[derive(Debug, Error)]
pub enum KeyStoreError {
	/// Error that occurs while reading or writing the store file.
	#[error("key store I/O error: {0}")]
	Io(#[from] std::io::Error),
	/// The container could not be parsed, typically a wrong password or a
	/// corrupt file.
	#[error("key store parse error: {0}")]
	Parse(String),
	/// The container holds no private key entry.
	#[error("key store has no private key entry")]
	MissingKey,
	/// A certificate in the container has no subject common name to serve
	/// as its alias.
	#[error("certificate in key store has no subject common name")]
	MissingCommonName,
	/// The store file changed on disk since it was loaded.
	#[error("key store file changed on disk since it was loaded")]
	ConcurrentModification,
	/// The store was loaded from bytes; there is no file to save to.
	#[error("key store is not file-backed, nothing to save to")]
	NotFileBacked,
}

impl From<openssl::error::ErrorStack> for KeyStoreError {
	fn from(e: openssl::error::ErrorStack) -> Self {
		KeyStoreError::Parse(e.to_string())
	}
}

/// Where the PKCS#12 container comes from. Exactly one source is used per
/// store.
#[derive(Debug, Clone)]
pub enum KeyStoreSource {
	/// A container file on disk; enables `save`.
	File(PathBuf),
	/// An in-memory container; the store cannot be persisted.
	Bytes(Vec<u8>),
}

/// A loaded PKCS#12 key store.
///
/// The private key entry's certificate subject CN doubles as the key alias,
/// matching the Peppol convention of naming Access Point keys after their
/// AS2 identifier. Partner certificates are likewise aliased by their
/// subject CN.
pub struct KeyStore {
	source: KeyStoreSource,
	password: String,
	key: PKey<Private>,
	key_certificate: X509,
	key_alias: String,
	partners: HashMap<String, X509>,
	loaded_mtime: Option<SystemTime>,
}

fn subject_cn(cert: &X509) -> Result<String, KeyStoreError> {
	cert.subject_name()
		.entries_by_nid(Nid::COMMONNAME)
		.next()
		.and_then(|entry| entry.data().as_utf8().ok())
		.map(|s| s.to_string())
		.ok_or(KeyStoreError::MissingCommonName)
}

impl KeyStore {
	/// Loads a PKCS#12 container from its source with the given password.
	pub fn load(source: KeyStoreSource, password: &str) -> Result<Self, KeyStoreError> {
		let (bytes, loaded_mtime) = match &source {
			KeyStoreSource::File(path) => {
				let bytes = std::fs::read(path)?;
				let mtime = std::fs::metadata(path)?.modified()?;
				(bytes, Some(mtime))
			}
			KeyStoreSource::Bytes(bytes) => (bytes.clone(), None),
		};

		let parsed = Pkcs12::from_der(&bytes)?.parse2(password)?;
		let key = parsed.pkey.ok_or(KeyStoreError::MissingKey)?;
		let key_certificate = parsed.cert.ok_or(KeyStoreError::MissingKey)?;
		let key_alias = subject_cn(&key_certificate)?;

		let mut partners = HashMap::new();
		if let Some(ca) = parsed.ca {
			for cert in ca {
				let alias = subject_cn(&cert)?;
				partners.insert(alias, cert);
			}
		}

		tracing::debug!(
			key_alias = %key_alias,
			partners = partners.len(),
			"Loaded key store"
		);

		Ok(Self {
			source,
			password: password.to_string(),
			key,
			key_certificate,
			key_alias,
			partners,
			loaded_mtime,
		})
	}

	/// The alias of the private key entry (its certificate's subject CN).
	pub fn key_alias(&self) -> &str {
		&self.key_alias
	}

	/// The private key and certificate for the given alias.
	///
	/// The container holds exactly one key entry; an alias that does not
	/// match its CN is tolerated with a warning, since deployed stores are
	/// not always aliased consistently.
	pub fn key_pair(&self, alias: &str) -> (&PKey<Private>, &X509) {
		if alias != self.key_alias {
			tracing::warn!(
				requested = alias,
				actual = %self.key_alias,
				"Key alias does not match the key certificate CN"
			);
		}
		(&self.key, &self.key_certificate)
	}

	/// The partner certificate stored under the given alias, if any.
	pub fn partner_certificate(&self, alias: &str) -> Option<&X509> {
		self.partners.get(alias)
	}

	/// Stores a partner certificate under an alias. Returns whether the
	/// store content actually changed.
	pub fn set_partner_certificate(
		&mut self,
		alias: impl Into<String>,
		cert: X509,
	) -> Result<bool, KeyStoreError> {
		let alias = alias.into();
		if let Some(existing) = self.partners.get(&alias) {
			if existing.to_der()? == cert.to_der()? {
				return Ok(false);
			}
		}
		self.partners.insert(alias, cert);
		Ok(true)
	}

	/// Whether this store can be persisted back to disk.
	pub fn is_file_backed(&self) -> bool {
		matches!(self.source, KeyStoreSource::File(_))
	}

	/// Rewrites the store file atomically.
	///
	/// Fails with `ConcurrentModification` when the file mtime changed since
	/// the store was loaded or last saved.
	pub fn save(&mut self) -> Result<(), KeyStoreError> {
		let path = match &self.source {
			KeyStoreSource::File(path) => path.clone(),
			KeyStoreSource::Bytes(_) => return Err(KeyStoreError::NotFileBacked),
		};

		if let Some(loaded) = self.loaded_mtime {
			let current = std::fs::metadata(&path)?.modified()?;
			if current != loaded {
				return Err(KeyStoreError::ConcurrentModification);
			}
		}

		let mut builder = Pkcs12::builder();
		builder.name(&self.key_alias);
		builder.pkey(&self.key);
		builder.cert(&self.key_certificate);
		if !self.partners.is_empty() {
			let mut stack = Stack::new()?;
			for cert in self.partners.values() {
				stack.push(cert.clone())?;
			}
			builder.ca(stack);
		}
		let der = builder.build2(&self.password)?.to_der()?;

		let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
		let mut tmp = match dir {
			Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
			None => tempfile::NamedTempFile::new()?,
		};
		tmp.write_all(&der)?;
		tmp.persist(&path).map_err(|e| KeyStoreError::Io(e.error))?;

		self.loaded_mtime = Some(std::fs::metadata(&path)?.modified()?);
		tracing::info!(path = %path.display(), "Persisted key store");
		Ok(())
	}
}

/// Probes whether a store path could be written: an existing file must not
/// be read-only, a new file needs an existing parent directory.
pub fn is_writable(path: &Path) -> bool {
	match std::fs::metadata(path) {
		Ok(metadata) => !metadata.permissions().readonly(),
		Err(_) => path
			.parent()
			.map(|parent| parent.as_os_str().is_empty() || parent.is_dir())
			.unwrap_or(false),
	}
}
