//! Orchestration of the four operating modes.
//!
//! The `encode_*`/`decode_*` functions work on in-memory PNG bytes. [`run`] wraps them for
//! files: it validates paths, reads inputs and only writes outputs once everything succeeded.

use std::fmt::Formatter;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;

use crate::config::Config;
use crate::crypto;
use crate::crypto::CipherParams;
use crate::crypto::PARAMS_LEN;
use crate::crypto::TAG_LEN;
use crate::error::Result;
use crate::error::StegoError;
use crate::header;
use crate::header::Decode;
use crate::header::Encode;
use crate::header::FrameKind;
use crate::header::HEADER_LEN;
use crate::image;
use crate::image::ImageInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Encode,
	Decode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
	None,
	Aes,
}

impl core::fmt::Display for Mode {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Mode::Encode => write!(f, "encode"),
			Mode::Decode => write!(f, "decode"),
		}
	}
}

impl core::fmt::Display for Cipher {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Cipher::None => write!(f, "none"),
			Cipher::Aes => write!(f, "aes"),
		}
	}
}

/// One invocation of the tool
#[derive(Debug, Clone)]
pub enum Operation {
	EncodePlaintext {
		carrier: PathBuf,
		message: Vec<u8>,
		output: PathBuf,
	},
	EncodeEncrypted {
		carrier: PathBuf,
		message: Vec<u8>,
		output: PathBuf,
		key_image: PathBuf,
		output_key_image: PathBuf,
	},
	/// `key_image` is the artifact written when encoding, unless `key_artifact` is given, in
	/// which case it is the original key image
	DecodeEncrypted {
		carrier: PathBuf,
		key_image: PathBuf,
		key_artifact: Option<PathBuf>,
	},
	DecodePlaintext {
		carrier: PathBuf,
	},
	Info {
		carrier: PathBuf,
	},
}

impl Operation {
	pub fn mode(&self) -> Option<Mode> {
		match self {
			Operation::EncodePlaintext { .. } | Operation::EncodeEncrypted { .. } => Some(Mode::Encode),
			Operation::DecodePlaintext { .. } | Operation::DecodeEncrypted { .. } => Some(Mode::Decode),
			Operation::Info { .. } => None,
		}
	}

	pub fn cipher(&self) -> Cipher {
		match self {
			Operation::EncodeEncrypted { .. } | Operation::DecodeEncrypted { .. } => Cipher::Aes,
			_ => Cipher::None,
		}
	}
}

/// Result of a successful operation
#[derive(Debug)]
pub enum Outcome {
	/// Files written, in order
	Written(Vec<PathBuf>),
	/// Decoded message
	Message(Vec<u8>),
	Info(Info),
}

/// Capacity report of a carrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
	pub width: u32,
	pub height: u32,
	pub channels: usize,
	/// Largest message for plaintext mode
	pub plaintext_capacity: usize,
	/// Largest message for encrypted mode
	pub encrypted_capacity: usize,
}

impl core::fmt::Display for Info {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		writeln!(f, "Image:     {}x{}", self.width, self.height)?;
		writeln!(f, "Channels:  {}", self.channels)?;
		writeln!(f, "Plaintext: {}bytes", self.plaintext_capacity)?;
		write!(f, "Encrypted: {}bytes", self.encrypted_capacity)
	}
}

/// Overhead of encrypted mode on top of the outer frame: inner frame + authentication tag
const ENCRYPTION_OVERHEAD: usize = HEADER_LEN + TAG_LEN;

/// Largest message encrypted mode can embed given the plaintext capacity
pub fn encrypted_capacity(plaintext_capacity: usize) -> usize {
	plaintext_capacity.saturating_sub(ENCRYPTION_OVERHEAD)
}

/// Reports dimensions and capacities of a carrier
pub fn info(carrier: &[u8], config: &Config) -> Result<Info> {
	let (_, geometry) = image::decode(carrier)?;
	let plaintext_capacity = config.algorithm.max_size(&geometry);

	Ok(Info {
		width: geometry.width(),
		height: geometry.height(),
		channels: geometry.channels(),
		plaintext_capacity,
		encrypted_capacity: encrypted_capacity(plaintext_capacity),
	})
}

/// Embeds `message` into `carrier`, returns the new image
pub fn encode_plaintext(carrier: &[u8], message: &[u8], config: &Config) -> Result<Vec<u8>> {
	let algorithm = config.algorithm;
	let (mut sequence, geometry) = image::decode(carrier)?;

	let frame = header::build_frame(
		message,
		FrameKind::Message,
		algorithm.usable_bytes(sequence.len()),
	)?;
	log::debug!(
		"Embedding {}bytes ({} channel values) with {algorithm}, capacity {}bytes",
		message.len(),
		algorithm.embedded_size(frame.len() / 8),
		algorithm.max_size(&geometry)
	);
	algorithm.embed(&mut sequence, &frame)?;

	image::encode(&sequence, &geometry)
}

/// Encrypts `message` with key material from `key_image` and embeds it into `carrier`.
///
/// Returns the new carrier and the key image artifact. Both capacity checks run before either
/// image is modified.
pub fn encode_encrypted(
	carrier: &[u8],
	message: &[u8],
	key_image: &[u8],
	config: &Config,
) -> Result<(Vec<u8>, Vec<u8>)> {
	let algorithm = config.algorithm;
	let (mut sequence, geometry) = image::decode(carrier)?;
	let (mut key_sequence, key_geometry) = image::decode(key_image)?;

	let usable = algorithm.usable_bytes(sequence.len());
	let available = encrypted_capacity(header::payload_capacity(usable));
	if message.len() > available {
		return Err(StegoError::CapacityExceeded {
			needed: message.len(),
			available,
		});
	}
	let key_usable = algorithm.usable_bytes(key_sequence.len());
	if header::payload_capacity(key_usable) < PARAMS_LEN {
		return Err(StegoError::CapacityExceeded {
			needed: PARAMS_LEN,
			available: header::payload_capacity(key_usable),
		});
	}

	let params = CipherParams::generate(config.kdf);
	let key = crypto::derive_key(
		algorithm.masked(&key_sequence).as_slice(),
		&params.salt,
		&params.kdf,
	)?;

	let inner = header::build_frame(message, FrameKind::Message, message.len() + HEADER_LEN)?;
	let ciphertext = crypto::encrypt(inner.as_raw_slice(), &key, &params)?;
	let frame = header::build_frame(&ciphertext, FrameKind::Ciphertext, usable)?;

	let mut encoded_params = Vec::with_capacity(PARAMS_LEN);
	params.encode(&mut encoded_params);
	let key_frame = header::build_frame(&encoded_params, FrameKind::CipherParams, key_usable)?;

	log::debug!(
		"Embedding {}bytes of ciphertext with {algorithm}, key image holds {}bytes of parameters",
		ciphertext.len(),
		encoded_params.len()
	);
	algorithm.embed(&mut sequence, &frame)?;
	algorithm.embed(&mut key_sequence, &key_frame)?;

	Ok((
		image::encode(&sequence, &geometry)?,
		image::encode(&key_sequence, &key_geometry)?,
	))
}

/// Extracts the message embedded in `carrier`
pub fn decode_plaintext(carrier: &[u8], config: &Config) -> Result<Vec<u8>> {
	let (sequence, _) = image::decode(carrier)?;
	config.algorithm.extract(&sequence, FrameKind::Message)
}

/// Extracts and decrypts the message embedded in `carrier`.
///
/// Cipher parameters are read from `key_artifact`. The key is derived from `key_image` when
/// given, otherwise from the artifact itself, which only differs from the original key image in
/// its embedding bits.
pub fn decode_encrypted(
	carrier: &[u8],
	key_artifact: &[u8],
	key_image: Option<&[u8]>,
	config: &Config,
) -> Result<Vec<u8>> {
	let algorithm = config.algorithm;
	let (artifact_sequence, _) = image::decode(key_artifact)?;
	let encoded_params = algorithm.extract(&artifact_sequence, FrameKind::CipherParams)?;
	let params = CipherParams::decode(&mut encoded_params.into_iter())?;

	let key_sequence = match key_image {
		Some(key_image) => image::decode(key_image)?.0,
		None => artifact_sequence,
	};
	let key = crypto::derive_key(
		algorithm.masked(&key_sequence).as_slice(),
		&params.salt,
		&params.kdf,
	)?;

	let (sequence, _) = image::decode(carrier)?;
	let ciphertext = algorithm.extract(&sequence, FrameKind::Ciphertext)?;
	let inner = crypto::decrypt(&ciphertext, &key, &params)?;

	let usable = inner.len();
	header::parse_frame(&mut inner.into_iter(), FrameKind::Message, usable)
}

fn read(path: &Path) -> Result<Vec<u8>> {
	image::check_extension(path)?;
	fs::read(path).map_err(|err| StegoError::io(path, err))
}

/// Writes every output or none of them.
///
/// Each output is staged in a temporary file next to its destination, then renamed into place.
/// Files that already exist at a destination are copied aside first. If a later rename fails,
/// they are put back and new files are removed.
fn write_outputs(outputs: &[(&Path, &[u8])]) -> Result<Vec<PathBuf>> {
	let mut staged = Vec::with_capacity(outputs.len());
	for (path, data) in outputs {
		let dir = match path.parent() {
			Some(dir) if !dir.as_os_str().is_empty() => dir,
			_ => Path::new("."),
		};
		let mut file = NamedTempFile::new_in(dir).map_err(|err| StegoError::io(dir, err))?;
		file.write_all(data)
			.and_then(|_| file.as_file().sync_all())
			.map_err(|err| StegoError::io(file.path(), err))?;

		let backup = if path.is_file() {
			let backup = NamedTempFile::new_in(dir).map_err(|err| StegoError::io(dir, err))?;
			fs::copy(path, backup.path()).map_err(|err| StegoError::io(*path, err))?;
			Some(backup)
		} else {
			None
		};
		staged.push((*path, file, backup));
	}

	let mut written: Vec<(&Path, Option<NamedTempFile>)> = Vec::with_capacity(staged.len());
	for (path, file, backup) in staged {
		if let Err(err) = file.persist(path) {
			rollback(written);
			return Err(StegoError::io(path, err.error));
		}
		log::debug!("File written to `{}`", path.display());
		written.push((path, backup));
	}

	Ok(written
		.into_iter()
		.map(|(path, _)| path.to_path_buf())
		.collect())
}

// Restores what was at each destination before `write_outputs`
fn rollback(written: Vec<(&Path, Option<NamedTempFile>)>) {
	for (path, backup) in written {
		let restored = match backup {
			Some(backup) => backup.persist(path).map(|_| ()).map_err(|err| err.error),
			None => fs::remove_file(path),
		};
		if let Err(err) = restored {
			log::warn!("Failed to restore `{}`: {err}", path.display());
		}
	}
}

/// Runs one operation against the filesystem
pub fn run(operation: &Operation, config: &Config) -> Result<Outcome> {
	log::debug!(
		"Running {} (cipher: {}) with {}",
		operation.mode().map_or("info".to_string(), |mode| mode.to_string()),
		operation.cipher(),
		config.algorithm
	);

	match operation {
		Operation::EncodePlaintext {
			carrier,
			message,
			output,
		} => {
			image::check_extension(output)?;
			let carrier = read(carrier)?;
			let encoded = encode_plaintext(&carrier, message, config)?;

			write_outputs(&[(output.as_path(), encoded.as_slice())]).map(Outcome::Written)
		}
		Operation::EncodeEncrypted {
			carrier,
			message,
			output,
			key_image,
			output_key_image,
		} => {
			image::check_extension(output)?;
			image::check_extension(output_key_image)?;
			if output == output_key_image {
				return Err(StegoError::InvalidArgument(format!(
					"Output image and output key image are both `{}`",
					output.display()
				)));
			}
			let carrier = read(carrier)?;
			let key_image = read(key_image)?;
			let (encoded, artifact) = encode_encrypted(&carrier, message, &key_image, config)?;

			write_outputs(&[
				(output.as_path(), encoded.as_slice()),
				(output_key_image.as_path(), artifact.as_slice()),
			])
			.map(Outcome::Written)
		}
		Operation::DecodePlaintext { carrier } => {
			let carrier = read(carrier)?;
			decode_plaintext(&carrier, config).map(Outcome::Message)
		}
		Operation::DecodeEncrypted {
			carrier,
			key_image,
			key_artifact,
		} => {
			let carrier = read(carrier)?;
			let key_image = read(key_image)?;
			let message = match key_artifact {
				Some(artifact) => {
					let artifact = read(artifact)?;
					decode_encrypted(&carrier, &artifact, Some(&key_image), config)?
				}
				None => decode_encrypted(&carrier, &key_image, None, config)?,
			};
			Ok(Outcome::Message(message))
		}
		Operation::Info { carrier } => {
			let carrier = read(carrier)?;
			info(&carrier, config).map(Outcome::Info)
		}
	}
}
