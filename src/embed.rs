use std::fmt::Formatter;
use std::str::FromStr;

use bitvec::order::Msb0;
use bitvec::slice::BitSlice;
use bitvec::vec::BitVec;
use zeroize::Zeroizing;

use crate::error::Result;
use crate::error::StegoError;
use crate::header;
use crate::header::FrameKind;
use crate::image::ChannelSequence;
use crate::image::ImageInfo;

/// Algorithm to embed data.
///
/// Encoder and decoder must agree on it: nothing about the algorithm is stored in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedAlgorithm {
	/// Replace the `n` lowest bits of every channel value
	Lo(u8),
}

impl Default for EmbedAlgorithm {
	fn default() -> Self { EmbedAlgorithm::Lo(1) }
}

impl EmbedAlgorithm {
	/// Bits written into every channel value
	pub fn bits(&self) -> u8 {
		match self {
			EmbedAlgorithm::Lo(bits) => *bits,
		}
	}

	/// Mask of the bits owned by the embedding inside a channel value
	pub fn mask(&self) -> u8 { ((1u16 << self.bits()) - 1) as u8 }

	/// Whole bytes that fit in `channels` channel values
	pub fn usable_bytes(&self, channels: usize) -> usize {
		channels.saturating_mul(self.bits() as usize) / 8
	}

	/// Get the number of channel values needed to embed `size` bytes
	pub fn embedded_size(&self, size: usize) -> usize {
		(size * 8).div_ceil(self.bits() as usize)
	}

	/// Maximum payload (in bytes) an image can hold with this algorithm
	pub fn max_size(&self, info: &dyn ImageInfo) -> usize {
		capacity(info.channels(), self.bits())
	}

	/// Writes `frame` into the low bits of successive channel values.
	///
	/// Bits are consumed most-significant first. When the last value only receives part of its
	/// bits they are placed at the top of the embedding window and the bits below are left as
	/// they were. Values past the frame are untouched.
	pub fn embed(&self, sequence: &mut ChannelSequence, frame: &BitSlice<u8, Msb0>) -> Result<()> {
		let bits = self.bits() as usize;
		let available = sequence.len().saturating_mul(bits);
		if frame.len() > available {
			return Err(StegoError::CapacityExceeded {
				needed: frame.len().div_ceil(8),
				available: available / 8,
			});
		}

		for (value, chunk) in sequence.values_mut().zip(frame.chunks(bits)) {
			let shift = bits - chunk.len();
			let embed = chunk
				.iter()
				.fold(0u8, |acc, bit| (acc << 1) | *bit as u8);
			let mask = (((1u16 << chunk.len()) - 1) as u8) << shift;

			*value &= !mask;
			*value |= embed << shift;
		}

		Ok(())
	}

	/// Iterator over the bytes embedded in `sequence`
	pub fn reader<'a>(&self, sequence: &'a ChannelSequence) -> EmbedIterator<'a> {
		EmbedIterator::new(*self, sequence)
	}

	/// Reads a frame of `kind` back and returns its payload.
	///
	/// Only the channel values covering the header and the declared payload are visited.
	pub fn extract(&self, sequence: &ChannelSequence, kind: FrameKind) -> Result<Vec<u8>> {
		let mut it = self.reader(sequence);
		let payload = header::parse_frame(&mut it, kind, self.usable_bytes(sequence.len()))?;
		log::debug!(
			"Extracted {}bytes from {} channel values",
			payload.len(),
			it.visited()
		);
		Ok(payload)
	}

	/// Channel bytes with every embeddable bit cleared.
	///
	/// Two images that only differ in their embedding bits mask to the same bytes.
	pub fn masked(&self, sequence: &ChannelSequence) -> Zeroizing<Vec<u8>> {
		let mut masked = sequence.clone();
		let mask = self.mask();
		masked.values_mut().for_each(|value| *value &= !mask);
		Zeroizing::new(masked.into_bytes())
	}
}

/// Payload capacity (in bytes) of `channel_count` values carrying `bits` bits each
pub fn capacity(channel_count: usize, bits: u8) -> usize {
	header::payload_capacity(channel_count.saturating_mul(bits as usize) / 8)
}

impl core::fmt::Display for EmbedAlgorithm {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			EmbedAlgorithm::Lo(bits) => write!(f, "lo{bits}"),
		}
	}
}

impl FromStr for EmbedAlgorithm {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		let (dig_pos, _) = s
			.char_indices()
			.find(|(_, c)| c.is_ascii_digit())
			.ok_or(format!("Unknown algorithm: {s}"))?;

		let (first, second) = s.split_at(dig_pos);
		match first {
			"lo" => {
				let value = second.parse::<u8>().map_err(|err| {
					format!("Failed to convert `{second}` to a number of bits: {err}")
				})?;
				if value > 7 || value == 0 {
					Err(format!(
						"Cannot specify {value} bits for `lo` method, must be within [1, 7]"
					))
				} else {
					Ok(EmbedAlgorithm::Lo(value))
				}
			}
			_ => Err(format!("Unknown algorithm: {s}")),
		}
	}
}

// Iterator to read embedded bytes out of a channel sequence
pub struct EmbedIterator<'a> {
	algorithm: EmbedAlgorithm,
	sequence: &'a ChannelSequence,

	// Channel values consumed so far
	index: usize,

	// Bits that have been read and will be part of the `next` byte
	remainder: BitVec<u8, Msb0>,
}

impl<'a> EmbedIterator<'a> {
	pub fn new(algorithm: EmbedAlgorithm, sequence: &'a ChannelSequence) -> Self {
		Self {
			algorithm,
			sequence,
			index: 0,
			remainder: BitVec::with_capacity(16),
		}
	}

	/// Number of channel values read so far
	pub fn visited(&self) -> usize { self.index }
}

impl<'a> Iterator for EmbedIterator<'a> {
	type Item = u8;

	fn next(&mut self) -> Option<Self::Item> {
		let bits = self.algorithm.bits();

		while self.remainder.len() < 8 {
			// End of data
			let value = self.sequence.value(self.index)?;
			self.index += 1;

			for i in (0..bits).rev() {
				self.remainder.push((value >> i) & 0b1 == 0b1);
			}
		}

		let byte = self.remainder[..8]
			.iter()
			.fold(0u8, |acc, bit| (acc << 1) | *bit as u8);
		self.remainder.drain(..8);

		Some(byte)
	}
}
