//! Key derivation from key images and payload encryption.
//!
//! The key image's channel values, with the embedding bits cleared, are the Argon2id password.
//! Every encode draws a fresh salt and nonce; the payload is sealed with AES-256-GCM-SIV. Salt,
//! nonce and the Argon2 costs form the [`CipherParams`] that travel inside the key image
//! artifact, so decoding needs no other input than the artifact itself.

use aes_gcm_siv::aead::Aead;
use aes_gcm_siv::aead::Payload;
use aes_gcm_siv::Aes256GcmSiv;
use aes_gcm_siv::KeyInit;
use aes_gcm_siv::Nonce;
use argon2::Algorithm;
use argon2::Argon2;
use argon2::Params;
use argon2::Version;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::Result;
use crate::error::StegoError;
use crate::header::next_bytes;
use crate::header::Decode;
use crate::header::Encode;

/// Argon2 salt length in bytes.
pub const SALT_LEN: usize = 16;
/// AES-GCM-SIV nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// Authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;
/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// Encoded size of [`CipherParams`].
pub const PARAMS_LEN: usize = 1 + SALT_LEN + NONCE_LEN + 3 * 4;

const PARAMS_VERSION: u8 = 1;
const ASSOCIATED_DATA: &[u8] = b"stegopng/v1";

// Upper bounds accepted from an artifact, so a crafted one cannot make decoding allocate
// unbounded memory
const MAX_M_COST: u32 = 1024 * 1024;
const MAX_T_COST: u32 = 64;
const MAX_P_COST: u32 = 16;

/// Secret key, wiped on drop
pub type KeyMaterial = Zeroizing<[u8; KEY_LEN]>;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
	/// Memory size in KiB
	pub m_cost: u32,
	/// Number of passes
	pub t_cost: u32,
	/// Degree of parallelism
	pub p_cost: u32,
}

impl Default for KdfParams {
	fn default() -> Self {
		Self {
			m_cost: Params::DEFAULT_M_COST,
			t_cost: Params::DEFAULT_T_COST,
			p_cost: Params::DEFAULT_P_COST,
		}
	}
}

impl KdfParams {
	fn argon2(&self) -> std::result::Result<Argon2<'static>, argon2::Error> {
		let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(KEY_LEN))?;
		Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
	}

	/// Checks the costs are accepted by Argon2 and stay under the decoding ceiling
	pub fn validate(&self) -> std::result::Result<(), String> {
		if self.m_cost > MAX_M_COST || self.t_cost > MAX_T_COST || self.p_cost > MAX_P_COST {
			return Err(format!(
				"Argon2 costs m={} t={} p={} exceed the maximum m={MAX_M_COST} t={MAX_T_COST} p={MAX_P_COST}",
				self.m_cost, self.t_cost, self.p_cost
			));
		}
		self.argon2().map(|_| ()).map_err(|err| err.to_string())
	}
}

/// Random cipher parameters of one encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherParams {
	pub salt: [u8; SALT_LEN],
	pub nonce: [u8; NONCE_LEN],
	pub kdf: KdfParams,
}

impl CipherParams {
	/// Draws a fresh salt and nonce from the operating system
	pub fn generate(kdf: KdfParams) -> Self {
		let mut salt = [0u8; SALT_LEN];
		OsRng.fill_bytes(&mut salt);
		let mut nonce = [0u8; NONCE_LEN];
		OsRng.fill_bytes(&mut nonce);

		Self { salt, nonce, kdf }
	}
}

impl Encode for CipherParams {
	fn encode(&self, vec: &mut Vec<u8>) {
		vec.push(PARAMS_VERSION);
		vec.extend_from_slice(self.salt.as_slice());
		vec.extend_from_slice(self.nonce.as_slice());
		vec.extend_from_slice(self.kdf.m_cost.to_be_bytes().as_slice());
		vec.extend_from_slice(self.kdf.t_cost.to_be_bytes().as_slice());
		vec.extend_from_slice(self.kdf.p_cost.to_be_bytes().as_slice());
	}
}

impl Decode for CipherParams {
	type Type = CipherParams;

	fn decode<I>(it: &mut I) -> Result<Self::Type>
	where
		I: Iterator<Item = u8>,
	{
		let [version] = next_bytes(it, "params version")?;
		if version != PARAMS_VERSION {
			return Err(StegoError::FrameCorrupt(format!(
				"Unknown key image version: {version}"
			)));
		}

		let salt = next_bytes(it, "salt")?;
		let nonce = next_bytes(it, "nonce")?;
		let kdf = KdfParams {
			m_cost: u32::from_be_bytes(next_bytes(it, "m_cost")?),
			t_cost: u32::from_be_bytes(next_bytes(it, "t_cost")?),
			p_cost: u32::from_be_bytes(next_bytes(it, "p_cost")?),
		};
		kdf.validate()
			.map_err(|err| StegoError::FrameCorrupt(format!("Invalid key derivation parameters: {err}")))?;

		if it.next().is_some() {
			return Err(StegoError::FrameCorrupt("Trailing bytes after cipher parameters".into()));
		}

		Ok(Self { salt, nonce, kdf })
	}
}

/// Derives the AES key from the key image's masked channel bytes
pub fn derive_key(key_channels: &[u8], salt: &[u8], kdf: &KdfParams) -> Result<KeyMaterial> {
	let mut key = Zeroizing::new([0u8; KEY_LEN]);
	kdf.argon2()
		.and_then(|argon2| argon2.hash_password_into(key_channels, salt, &mut *key))
		.map_err(|err| StegoError::Kdf(err.to_string()))?;
	Ok(key)
}

/// Encrypts a frame. The ciphertext carries a [`TAG_LEN`] bytes authentication tag.
pub fn encrypt(frame: &[u8], key: &KeyMaterial, params: &CipherParams) -> Result<Vec<u8>> {
	let cipher = Aes256GcmSiv::new_from_slice(key.as_slice())
		.map_err(|_| StegoError::Kdf("Invalid key length".into()))?;

	cipher
		.encrypt(
			Nonce::from_slice(&params.nonce),
			Payload {
				msg: frame,
				aad: ASSOCIATED_DATA,
			},
		)
		.map_err(|_| StegoError::InvalidArgument("Payload is too large to encrypt".into()))
}

/// Decrypts a frame, failing with [`StegoError::DecryptionFailed`] when authentication fails
pub fn decrypt(ciphertext: &[u8], key: &KeyMaterial, params: &CipherParams) -> Result<Vec<u8>> {
	if ciphertext.len() < TAG_LEN {
		return Err(StegoError::DecryptionFailed);
	}

	let cipher = Aes256GcmSiv::new_from_slice(key.as_slice())
		.map_err(|_| StegoError::Kdf("Invalid key length".into()))?;

	cipher
		.decrypt(
			Nonce::from_slice(&params.nonce),
			Payload {
				msg: ciphertext,
				aad: ASSOCIATED_DATA,
			},
		)
		.map_err(|_| StegoError::DecryptionFailed)
}
