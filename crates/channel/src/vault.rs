//! Content-addressed vault layout.
//!
//! Assets live under `<root>/vault/<b0>/<b1>/<b2>/<storage_key><ext>` where
//! `b0 b1 b2` are the first three bytes of SHA-256 over the storage key,
//! rendered as two-digit lowercase hex directories, and the extension
//! derives from the source URL.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Directory name of the vault under the asset root.
pub const VAULT_DIR: &str = "vault";

/// Derive the local path for an asset.
#[must_use]
pub fn vault_path(root: &Path, storage_key: &str, url: &str) -> PathBuf {
	let digest = Sha256::digest(storage_key.as_bytes());
	root.join(VAULT_DIR)
		.join(format!("{:02x}", digest[0]))
		.join(format!("{:02x}", digest[1]))
		.join(format!("{:02x}", digest[2]))
		.join(format!("{storage_key}{}", extension_from_url(url)))
}

/// File extension (with dot) derived from a source URL.
///
/// Unknown or missing extensions default to `.webp`, the dominant container.
#[must_use]
pub fn extension_from_url(url: &str) -> &'static str {
	let path = url.split(['?', '#']).next().unwrap_or(url);
	let ext = path.rsplit('.').next().unwrap_or_default();
	match ext.to_ascii_lowercase().as_str() {
		"gif" => ".gif",
		"png" => ".png",
		"jpg" | "jpeg" => ".jpg",
		_ => ".webp",
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn path_uses_first_three_digest_bytes() {
		// SHA-256("abc") = ba7816bf8f01...
		let path = vault_path(Path::new("/data"), "abc", "https://cdn/x.webp");
		assert_eq!(
			path,
			Path::new("/data/vault/ba/78/16/abc.webp")
		);
	}

	#[test]
	fn extension_derivation() {
		assert_eq!(extension_from_url("https://cdn/a.gif"), ".gif");
		assert_eq!(extension_from_url("https://cdn/a.PNG"), ".png");
		assert_eq!(extension_from_url("https://cdn/a.jpeg?sig=1"), ".jpg");
		assert_eq!(extension_from_url("https://cdn/a"), ".webp");
	}
}
