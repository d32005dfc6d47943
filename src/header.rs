use bitvec::order::Msb0;
use bitvec::vec::BitVec;
use crc::Crc;
use crc::CRC_32_CKSUM;

use crate::error::Result;
use crate::error::StegoError;

/// Size of the frame header: payload length + payload crc
pub const HEADER_LEN: usize = 8;

const CKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_CKSUM);

pub trait Encode {
	/// Encode the data into a vector
	fn encode(&self, vec: &mut Vec<u8>);
}

pub trait Decode {
	type Type;

	/// Decode the data from an iterator
	fn decode<I>(it: &mut I) -> Result<Self::Type>
	where
		I: Iterator<Item = u8>;
}

// Pulls `N` bytes out of the iterator, failing once it runs dry
pub(crate) fn next_bytes<I, const N: usize>(it: &mut I, what: &str) -> Result<[u8; N]>
where
	I: Iterator<Item = u8>,
{
	let mut result = [0u8; N];
	for (count, byte) in result.iter_mut().enumerate() {
		*byte = it.next().ok_or(StegoError::FrameCorrupt(format!(
			"Failed to get {what} byte at index: {count}"
		)))?;
	}
	Ok(result)
}

/// What a frame carries.
///
/// The kind is folded into the frame checksum, so a frame read back as the wrong kind fails its
/// CRC check instead of yielding the wrong bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
	/// Plaintext message
	Message,
	/// Encrypted message
	Ciphertext,
	/// Cipher parameters of a key image artifact
	CipherParams,
}

impl FrameKind {
	const ALL: [FrameKind; 3] = [FrameKind::Message, FrameKind::Ciphertext, FrameKind::CipherParams];

	fn tag(self) -> u8 {
		match self {
			FrameKind::Message => 0x00,
			FrameKind::Ciphertext => 0x01,
			FrameKind::CipherParams => 0x02,
		}
	}

	fn checksum(self, data: &[u8]) -> u32 {
		let mut digest = CKSUM.digest();
		digest.update(&[self.tag()]);
		digest.update(data);
		digest.finalize()
	}
}

impl core::fmt::Display for FrameKind {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self {
			FrameKind::Message => write!(f, "plaintext message"),
			FrameKind::Ciphertext => write!(f, "encrypted message"),
			FrameKind::CipherParams => write!(f, "cipher parameters"),
		}
	}
}

/// Header placed in front of every embedded payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
	pub data_len: u32,
	pub data_crc: u32,
}

impl Header {
	/// Construct a new header from the embedded data
	pub fn new(data: &[u8], kind: FrameKind) -> Result<Self> {
		let data_len = u32::try_from(data.len()).map_err(|_| StegoError::CapacityExceeded {
			needed: data.len().saturating_add(HEADER_LEN),
			available: u32::MAX as usize,
		})?;

		Ok(Self {
			data_len,
			data_crc: kind.checksum(data),
		})
	}
}

impl Encode for Header {
	fn encode(&self, vec: &mut Vec<u8>) {
		vec.extend_from_slice(self.data_len.to_be_bytes().as_slice());
		vec.extend_from_slice(self.data_crc.to_be_bytes().as_slice());
	}
}

impl Decode for Header {
	type Type = Header;

	fn decode<I>(it: &mut I) -> Result<Self::Type>
	where
		I: Iterator<Item = u8>,
	{
		let data_len = u32::from_be_bytes(next_bytes(it, "header length")?);
		let data_crc = u32::from_be_bytes(next_bytes(it, "header crc")?);

		Ok(Header { data_len, data_crc })
	}
}

/// Payload bytes an image can hold once the header is accounted for
pub fn payload_capacity(usable_bytes: usize) -> usize { usable_bytes.saturating_sub(HEADER_LEN) }

/// Frames `payload` of `kind` for embedding, as bits in most-significant-first order.
///
/// # Errors
///
/// Fails with [`StegoError::CapacityExceeded`] when the framed payload does not fit in
/// `usable_bytes`. Nothing has been written anywhere at that point.
pub fn build_frame(
	payload: &[u8],
	kind: FrameKind,
	usable_bytes: usize,
) -> Result<BitVec<u8, Msb0>> {
	let available = payload_capacity(usable_bytes);
	if payload.len().saturating_add(HEADER_LEN) > usable_bytes {
		return Err(StegoError::CapacityExceeded {
			needed: payload.len(),
			available,
		});
	}

	let header = Header::new(payload, kind)?;
	let mut data = Vec::with_capacity(HEADER_LEN + payload.len());
	header.encode(&mut data);
	data.extend_from_slice(payload);

	Ok(BitVec::from_vec(data))
}

/// Reads a frame back from a byte stream.
///
/// `usable_bytes` is how many bytes the source can possibly hold; a header that declares more
/// than that is rejected before anything past the header is read.
pub fn parse_frame<I>(it: &mut I, kind: FrameKind, usable_bytes: usize) -> Result<Vec<u8>>
where
	I: Iterator<Item = u8>,
{
	let header = Header::decode(it)?;
	let available = payload_capacity(usable_bytes);
	let data_len = header.data_len as usize;
	if data_len > available {
		return Err(StegoError::FrameCorrupt(format!(
			"Header declares {data_len}bytes but only {available}bytes can be embedded"
		)));
	}

	let data = it.by_ref().take(data_len).collect::<Vec<_>>();
	if data.len() != data_len {
		return Err(StegoError::FrameCorrupt(format!(
			"Failed to read data byte at {}",
			data.len()
		)));
	}

	let data_crc = kind.checksum(data.as_slice());
	if data_crc != header.data_crc {
		// Distinguish a frame of another kind from plain corruption
		if let Some(other) = FrameKind::ALL
			.into_iter()
			.find(|other| other.checksum(data.as_slice()) == header.data_crc)
		{
			return Err(StegoError::FrameCorrupt(format!(
				"Expected a {kind} but the image holds a {other}"
			)));
		}
		return Err(StegoError::FrameCorrupt(format!(
			"Data CRC do not match: HEADER={:X} GOT={data_crc:X}",
			header.data_crc
		)));
	}

	Ok(data)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_layout() {
		let header = Header::new(b"abc", FrameKind::Message).unwrap();
		let mut data = vec![];
		header.encode(&mut data);

		assert_eq!(data.len(), HEADER_LEN);
		assert_eq!(&data[0..4], &[0, 0, 0, 3]);
		assert_eq!(u32::from_be_bytes([data[4], data[5], data[6], data[7]]), FrameKind::Message.checksum(b"abc"));
	}

	#[test]
	fn frame_bits_are_msb_first() {
		let frame = build_frame(&[0b1000_0001], FrameKind::Message, 16).unwrap();
		assert_eq!(frame.len(), (HEADER_LEN + 1) * 8);
		// Length field is 1, last bit of the 4th byte
		assert!(frame[31]);
		assert!(!frame[30]);
		assert!(frame[64]);
		assert!(frame[71]);
	}

	#[test]
	fn build_respects_capacity() {
		assert!(build_frame(&[0; 8], FrameKind::Message, 16).is_ok());
		assert!(matches!(
			build_frame(&[0; 9], FrameKind::Message, 16),
			Err(StegoError::CapacityExceeded { needed: 9, available: 8 })
		));
		// Even an empty payload needs room for its header
		assert!(matches!(
			build_frame(&[], FrameKind::Message, 7),
			Err(StegoError::CapacityExceeded { needed: 0, available: 0 })
		));
	}

	#[test]
	fn parse_frame_reads_back() {
		let frame = build_frame(b"hello", FrameKind::Message, 64).unwrap();
		let mut it = frame.into_vec().into_iter().chain(std::iter::repeat(0xAA));
		assert_eq!(parse_frame(&mut it, FrameKind::Message, 64).unwrap(), b"hello");
		// Nothing past the payload was consumed
		assert_eq!(it.next(), Some(0xAA));
	}

	#[test]
	fn parse_frame_rejects_oversized_length() {
		let mut data = vec![];
		Header {
			data_len: 1000,
			data_crc: 0,
		}
		.encode(&mut data);
		data.extend_from_slice(&[0; 100]);

		assert!(matches!(
			parse_frame(&mut data.into_iter(), FrameKind::Message, 108),
			Err(StegoError::FrameCorrupt(_))
		));
	}

	#[test]
	fn parse_frame_rejects_bad_crc() {
		let mut data = build_frame(b"payload", FrameKind::Message, 64).unwrap().into_vec();
		let last = data.len() - 1;
		data[last] ^= 1;
		assert!(matches!(
			parse_frame(&mut data.into_iter(), FrameKind::Message, 64),
			Err(StegoError::FrameCorrupt(_))
		));
	}

	#[test]
	fn parse_frame_rejects_truncated_source() {
		let data = build_frame(b"payload", FrameKind::Message, 64).unwrap().into_vec();
		assert!(matches!(
			parse_frame(&mut data[..10].iter().copied(), FrameKind::Message, 64),
			Err(StegoError::FrameCorrupt(_))
		));
		assert!(matches!(
			parse_frame(&mut data[..3].iter().copied(), FrameKind::Message, 64),
			Err(StegoError::FrameCorrupt(_))
		));
	}

	#[test]
	fn empty_payload() {
		let frame = build_frame(&[], FrameKind::Message, HEADER_LEN).unwrap();
		assert_eq!(frame.len(), HEADER_LEN * 8);
		let mut it = frame.into_vec().into_iter();
		assert!(parse_frame(&mut it, FrameKind::Message, HEADER_LEN).unwrap().is_empty());
	}

	#[test]
	fn frame_kinds_do_not_mix() {
		let data = build_frame(b"ciphertext", FrameKind::Ciphertext, 64)
			.unwrap()
			.into_vec();
		assert_eq!(
			parse_frame(&mut data.clone().into_iter(), FrameKind::Ciphertext, 64).unwrap(),
			b"ciphertext"
		);

		match parse_frame(&mut data.clone().into_iter(), FrameKind::Message, 64) {
			Err(StegoError::FrameCorrupt(err)) => assert!(err.contains("encrypted message"), "{err}"),
			other => panic!("Expected FrameCorrupt, got {other:?}"),
		}
		assert!(matches!(
			parse_frame(&mut data.into_iter(), FrameKind::CipherParams, 64),
			Err(StegoError::FrameCorrupt(_))
		));
		assert_ne!(
			FrameKind::Message.checksum(b""),
			FrameKind::Ciphertext.checksum(b"")
		);
	}
}
