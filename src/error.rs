use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while embedding into or extracting from an image.
#[derive(Error, Debug)]
pub enum StegoError {
	/// The container is lossy, not a PNG, or a PNG layout we cannot address bit-exactly
	#[error("Unsupported image format: {0}")]
	UnsupportedFormat(String),

	/// The bytes claim to be a PNG but cannot be decoded
	#[error("Corrupt image: {0}")]
	CorruptImage(String),

	#[error("Cannot embed {needed}bytes, maximum embeddable size: {available}bytes")]
	CapacityExceeded { needed: usize, available: usize },

	/// The embedded header does not describe the available data.
	/// Usually a wrong carrier, wrong mode or wrong key image at decode time.
	#[error("Embedded frame is corrupt: {0}")]
	FrameCorrupt(String),

	#[error("Decryption failed (wrong key image?)")]
	DecryptionFailed,

	#[error("Key derivation failed: {0}")]
	Kdf(String),

	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	#[error("Failed to access `{}`: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

impl StegoError {
	pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Self::Io {
			path: path.into(),
			source,
		}
	}
}

pub type Result<T> = std::result::Result<T, StegoError>;
