//! Storage back-ends.
//!
//! Two small synchronous interfaces, [`KvStore`] and [`BlobStore`], plus
//! [`FsStore`] implementing both over a root directory. The interfaces are
//! narrow on purpose: the underlying driver serializes access, and callers
//! never hold these across suspension points.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// Flat key-value partition for small values.
pub trait KvStore: Send + Sync {
	/// Read the value stored under `namespace`/`key`.
	fn kv_get(&self, namespace: &str, key: &str) -> Result<String>;
	/// Write `value` under `namespace`/`key`, replacing any previous value.
	fn kv_put(&self, namespace: &str, key: &str, value: &str) -> Result<()>;
	/// Remove `namespace`/`key`; succeeds when absent.
	fn kv_delete(&self, namespace: &str, key: &str) -> Result<()>;
	/// Whether `namespace`/`key` exists.
	fn kv_has(&self, namespace: &str, key: &str) -> bool;
}

/// Blob partition for multi-kilobyte objects.
pub trait BlobStore: Send + Sync {
	/// Read a whole blob.
	fn blob_get(&self, name: &str) -> Result<Vec<u8>>;
	/// Write a whole blob, replacing any previous content.
	fn blob_put(&self, name: &str, data: &[u8]) -> Result<()>;
	/// Remove a blob; succeeds when absent.
	fn blob_delete(&self, name: &str) -> Result<()>;
	/// Whether the blob exists and is readable.
	fn blob_has(&self, name: &str) -> bool;
}

/// Filesystem-backed store rooted at a state directory.
///
/// KV entries live file-per-key under `kv/<namespace>/`, blobs under
/// `blob/`. Writes go through a temp file followed by a rename so a single
/// object is never observed half-written; the certificate *set* is still
/// three separate objects (see `CredentialStore`).
#[derive(Debug, Clone)]
pub struct FsStore {
	root: PathBuf,
}

impl FsStore {
	/// Open (creating directories as needed) a store under `root`.
	pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
		let root = root.into();
		fs::create_dir_all(root.join("kv"))?;
		fs::create_dir_all(root.join("blob"))?;
		Ok(Self { root })
	}

	fn kv_path(&self, namespace: &str, key: &str) -> Result<PathBuf> {
		validate_name(namespace)?;
		validate_name(key)?;
		Ok(self.root.join("kv").join(namespace).join(key))
	}

	fn blob_path(&self, name: &str) -> Result<PathBuf> {
		validate_name(name)?;
		Ok(self.root.join("blob").join(name))
	}
}

fn validate_name(name: &str) -> Result<()> {
	if name.is_empty()
		|| !name
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
	{
		return Err(StoreError::InvalidArgument(name.to_string()));
	}
	Ok(())
}

fn write_replacing(path: &Path, data: &[u8]) -> Result<()> {
	let Some(parent) = path.parent() else {
		return Err(StoreError::InvalidArgument(path.display().to_string()));
	};
	fs::create_dir_all(parent)?;
	let tmp = path.with_extension("tmp");
	{
		let mut file = fs::File::create(&tmp)?;
		file.write_all(data)?;
		file.sync_all()?;
	}
	fs::rename(&tmp, path)?;
	Ok(())
}

fn read_all(path: &Path, name: &str) -> Result<Vec<u8>> {
	match fs::read(path) {
		Ok(data) => Ok(data),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
			Err(StoreError::NotFound(name.to_string()))
		}
		Err(e) => Err(e.into()),
	}
}

impl KvStore for FsStore {
	fn kv_get(&self, namespace: &str, key: &str) -> Result<String> {
		let data = read_all(&self.kv_path(namespace, key)?, key)?;
		String::from_utf8(data).map_err(|_| StoreError::Truncated(key.to_string()))
	}

	fn kv_put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
		write_replacing(&self.kv_path(namespace, key)?, value.as_bytes())
	}

	fn kv_delete(&self, namespace: &str, key: &str) -> Result<()> {
		match fs::remove_file(self.kv_path(namespace, key)?) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	fn kv_has(&self, namespace: &str, key: &str) -> bool {
		self.kv_path(namespace, key)
			.map(|p| p.is_file())
			.unwrap_or(false)
	}
}

impl BlobStore for FsStore {
	fn blob_get(&self, name: &str) -> Result<Vec<u8>> {
		read_all(&self.blob_path(name)?, name)
	}

	fn blob_put(&self, name: &str, data: &[u8]) -> Result<()> {
		write_replacing(&self.blob_path(name)?, data)
	}

	fn blob_delete(&self, name: &str) -> Result<()> {
		match fs::remove_file(self.blob_path(name)?) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	fn blob_has(&self, name: &str) -> bool {
		self.blob_path(name).map(|p| p.is_file()).unwrap_or(false)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn kv_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsStore::open(dir.path()).unwrap();

		store.kv_put("makapix", "player_key", "abc").unwrap();
		assert_eq!(store.kv_get("makapix", "player_key").unwrap(), "abc");
		assert!(store.kv_has("makapix", "player_key"));

		store.kv_delete("makapix", "player_key").unwrap();
		assert!(!store.kv_has("makapix", "player_key"));
		assert!(matches!(
			store.kv_get("makapix", "player_key"),
			Err(StoreError::NotFound(_))
		));
	}

	#[test]
	fn kv_delete_absent_is_ok() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsStore::open(dir.path()).unwrap();
		store.kv_delete("makapix", "nope").unwrap();
	}

	#[test]
	fn blob_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsStore::open(dir.path()).unwrap();

		store.blob_put("makapix_ca.pem", b"-----BEGIN-----").unwrap();
		assert_eq!(store.blob_get("makapix_ca.pem").unwrap(), b"-----BEGIN-----");
		store.blob_delete("makapix_ca.pem").unwrap();
		assert!(!store.blob_has("makapix_ca.pem"));
	}

	#[test]
	fn names_are_validated() {
		let dir = tempfile::tempdir().unwrap();
		let store = FsStore::open(dir.path()).unwrap();
		assert!(matches!(
			store.kv_put("makapix", "../escape", "x"),
			Err(StoreError::InvalidArgument(_))
		));
		assert!(matches!(
			store.blob_get("a/b"),
			Err(StoreError::InvalidArgument(_))
		));
	}
}
