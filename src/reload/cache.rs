use std::fs;
use std::io::{self, Read};
use std::path::Path;

use serde::Serialize;

use crate::reload::{ReloadError, Result};

/// Bump whenever the payload layout or engine bytecode format changes.
pub const CACHE_FORMAT_VERSION: u32 = 10;
/// Width of the NUL-padded build id field.
pub const BUILD_ID_LEN: usize = 512;
/// Fixed header size: version, build id, content hash.
pub const HEADER_LEN: usize = 4 + BUILD_ID_LEN + 8;
/// zstd frame magic.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

const MAX_PAYLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Header fields that must all match for a cache entry to be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheKey {
	/// Cache format version.
	pub version: u32,
	/// Identifier of the build that wrote the entry.
	pub build_id: String,
	/// Content hash of the expanded source.
	pub content_hash: u64,
}

impl CacheKey {
	/// Key for the current format version.
	pub fn current(build_id: &str, content_hash: u64) -> Self {
		Self {
			version: CACHE_FORMAT_VERSION,
			build_id: build_id.to_owned(),
			content_hash,
		}
	}
}

/// How the payload is stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadCompression {
	/// Raw engine bytes.
	None,
	/// zstd frame.
	Zstd,
}

impl PayloadCompression {
	/// Stable lowercase label.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::None => "none",
			Self::Zstd => "zstd",
		}
	}
}

/// Decoded cache file.
#[derive(Debug, Clone)]
pub struct CacheEntry {
	/// Header.
	pub key: CacheKey,
	/// Payload storage mode.
	pub compression: PayloadCompression,
	/// Serialized module bytes, decompressed.
	pub payload: Vec<u8>,
}

/// Encode a header and zstd-compressed payload.
pub fn encode_entry(key: &CacheKey, payload: &[u8]) -> Result<Vec<u8>> {
	let id = key.build_id.as_bytes();
	if id.len() > BUILD_ID_LEN {
		return Err(ReloadError::BuildIdTooLong {
			len: id.len(),
			max: BUILD_ID_LEN,
		});
	}

	let compressed = zstd::encode_all(payload, 0)?;
	let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
	out.extend_from_slice(&key.version.to_le_bytes());
	out.extend_from_slice(id);
	out.resize(4 + BUILD_ID_LEN, 0);
	out.extend_from_slice(&key.content_hash.to_le_bytes());
	out.extend_from_slice(&compressed);
	Ok(out)
}

/// Parse only the fixed header.
pub fn decode_header(bytes: &[u8]) -> Result<CacheKey> {
	if bytes.len() < HEADER_LEN {
		return Err(ReloadError::CacheTruncated {
			need: HEADER_LEN,
			have: bytes.len(),
		});
	}

	let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
	let id_field = &bytes[4..4 + BUILD_ID_LEN];
	let id_len = id_field.iter().position(|&byte| byte == 0).unwrap_or(BUILD_ID_LEN);
	let build_id = String::from_utf8_lossy(&id_field[..id_len]).into_owned();
	let mut hash = [0_u8; 8];
	hash.copy_from_slice(&bytes[4 + BUILD_ID_LEN..HEADER_LEN]);

	Ok(CacheKey {
		version,
		build_id,
		content_hash: u64::from_le_bytes(hash),
	})
}

/// Parse header and payload.
pub fn decode_entry(bytes: &[u8]) -> Result<CacheEntry> {
	let key = decode_header(bytes)?;
	let body = &bytes[HEADER_LEN..];

	let (compression, payload) = if body.starts_with(&ZSTD_MAGIC) {
		(PayloadCompression::Zstd, decode_zstd(body)?)
	} else {
		(PayloadCompression::None, body.to_vec())
	};

	Ok(CacheEntry { key, compression, payload })
}

/// Read a cache file; `Ok(None)` when it does not exist.
pub fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
	match fs::read(path) {
		Ok(bytes) => decode_entry(&bytes).map(Some),
		Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
		Err(err) => Err(err.into()),
	}
}

/// Write a cache file, creating parent directories.
pub fn write_entry(path: &Path, key: &CacheKey, payload: &[u8]) -> Result<()> {
	let bytes = encode_entry(key, payload)?;
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	fs::write(path, bytes)?;
	Ok(())
}

fn decode_zstd(raw: &[u8]) -> Result<Vec<u8>> {
	let mut decoder = zstd::stream::read::Decoder::new(raw)?;
	let mut out = Vec::new();
	let mut buf = [0_u8; 8192];

	loop {
		let read = decoder.read(&mut buf)?;
		if read == 0 {
			break;
		}

		if out.len() + read > MAX_PAYLOAD_BYTES {
			return Err(ReloadError::CachePayloadTooLarge { limit: MAX_PAYLOAD_BYTES });
		}

		out.extend_from_slice(&buf[..read]);
	}

	Ok(out)
}
