//! Hide messages in the pixels of PNG images.
//!
//! Messages are framed with a length and checksum, then written into the low-order bits of the
//! image's channel values. In encrypted mode the frame is sealed with a key derived from a second
//! "key image"; the random cipher parameters are embedded into a copy of that key image, the key
//! image artifact, which is all a decoder needs besides the carrier.

pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod embed;
pub mod error;
pub mod header;
pub mod image;
pub mod password;

pub use config::Config;
pub use dispatch::decode_encrypted;
pub use dispatch::decode_plaintext;
pub use dispatch::encode_encrypted;
pub use dispatch::encode_plaintext;
pub use dispatch::run;
pub use dispatch::Cipher;
pub use dispatch::Mode;
pub use dispatch::Operation;
pub use dispatch::Outcome;
pub use embed::EmbedAlgorithm;
pub use error::Result;
pub use error::StegoError;
