use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Random bytes drawn for a generated message
pub const MIN_BYTES: usize = 20;
pub const MAX_BYTES: usize = 30;

/// Generates a random URL-safe message from `rng`
pub fn generate_message<R>(rng: &mut R) -> String
where
	R: Rng + ?Sized,
{
	let len = rng.gen_range(MIN_BYTES..=MAX_BYTES);
	let mut bytes = vec![0u8; len];
	rng.fill_bytes(&mut bytes);
	URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a random URL-safe message, seeded from the operating system
pub fn generate() -> String { generate_message(&mut ChaCha20Rng::from_entropy()) }
