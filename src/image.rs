use std::path::Path;

use png::BitDepth;
use png::ColorType;
use png::ScaledFloat;
use png::SourceChromaticities;
use png::SrgbRenderingIntent;

use crate::error::Result;
use crate::error::StegoError;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

pub trait ImageInfo {
	fn width(&self) -> u32;
	fn height(&self) -> u32;
	/// Number of channel values (pixels times samples per pixel)
	fn channels(&self) -> usize;
	/// Size of the raw image data in bytes
	fn size(&self) -> usize;
}

/// Ancillary chunks that affect how the pixels are displayed.
/// They are carried to the re-encoded image untouched.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
	pub gamma: Option<ScaledFloat>,
	pub chromaticities: Option<SourceChromaticities>,
	pub srgb: Option<SrgbRenderingIntent>,
	pub trns: Option<Vec<u8>>,
}

/// Layout of a decoded image
#[derive(Debug, Clone)]
pub struct Geometry {
	pub width: u32,
	pub height: u32,
	pub color_type: ColorType,
	pub bit_depth: BitDepth,
	pub metadata: Metadata,
}

impl Geometry {
	/// Bytes used by a single channel value
	pub fn bytes_per_channel(&self) -> usize {
		match self.bit_depth {
			BitDepth::Sixteen => 2,
			_ => 1,
		}
	}
}

impl ImageInfo for Geometry {
	fn width(&self) -> u32 { self.width }

	fn height(&self) -> u32 { self.height }

	fn channels(&self) -> usize {
		self.width as usize * self.height as usize * self.color_type.samples()
	}

	fn size(&self) -> usize { self.channels() * self.bytes_per_channel() }
}

/// Flattened channel values of an image, in row-major pixel order then stored channel order.
///
/// Alpha is part of the sequence. For 16-bit images every value spans two big-endian bytes and
/// only the low byte is handed out for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSequence {
	data: Vec<u8>,
	stride: usize,
}

impl ChannelSequence {
	pub fn new(data: Vec<u8>, bit_depth: BitDepth) -> Self {
		let stride = match bit_depth {
			BitDepth::Sixteen => 2,
			_ => 1,
		};
		Self { data, stride }
	}

	/// Number of channel values
	pub fn len(&self) -> usize { self.data.len() / self.stride }

	pub fn is_empty(&self) -> bool { self.len() == 0 }

	pub fn as_bytes(&self) -> &[u8] { self.data.as_slice() }

	pub fn into_bytes(self) -> Vec<u8> { self.data }

	/// Embeddable byte of the channel value at `index`
	pub fn value(&self, index: usize) -> Option<u8> {
		if index >= self.len() {
			return None;
		}
		self.data.get(index * self.stride + self.stride - 1).copied()
	}

	/// Embeddable byte of every channel value, in sequence order
	pub fn values(&self) -> impl Iterator<Item = u8> + '_ {
		let stride = self.stride;
		self.data.chunks_exact(stride).map(move |value| value[stride - 1])
	}

	/// Mutable embeddable byte of every channel value, in sequence order
	pub fn values_mut(&mut self) -> impl Iterator<Item = &mut u8> + '_ {
		self.data
			.chunks_exact_mut(self.stride)
			.filter_map(|value| value.last_mut())
	}
}

/// Rejects paths that do not name a PNG file
pub fn check_extension(path: &Path) -> Result<()> {
	match path.extension().and_then(|ext| ext.to_str()) {
		Some(ext) if ext.eq_ignore_ascii_case("png") => Ok(()),
		Some(ext) => Err(StegoError::UnsupportedFormat(format!(
			"`{}` has extension `.{ext}`, only lossless `.png` images are supported",
			path.display()
		))),
		None => Err(StegoError::UnsupportedFormat(format!(
			"Unable get image type for `{}`",
			path.display()
		))),
	}
}

// Identifies the container from its magic bytes
fn sniff(bytes: &[u8]) -> Result<()> {
	if bytes.starts_with(&PNG_SIGNATURE) {
		return Ok(());
	}

	let container = if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
		"JPEG (lossy)"
	} else if bytes.starts_with(b"GIF8") {
		"GIF (palette)"
	} else if bytes.starts_with(b"BM") {
		"BMP"
	} else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
		"WebP"
	} else {
		"unknown"
	};
	Err(StegoError::UnsupportedFormat(format!(
		"{container} container, expected a PNG image"
	)))
}

fn check_layout(color_type: ColorType, bit_depth: BitDepth) -> Result<()> {
	match color_type {
		ColorType::Indexed => Err(StegoError::UnsupportedFormat(
			"Indexed (palette) PNG images cannot be modified losslessly".into(),
		)),
		_ => match bit_depth {
			BitDepth::Eight | BitDepth::Sixteen => Ok(()),
			depth => Err(StegoError::UnsupportedFormat(format!(
				"Color type {color_type:?} with bit depth {} is not supported, expected 8 or 16",
				depth as u8
			))),
		},
	}
}

fn corrupt(err: png::DecodingError) -> StegoError {
	match err {
		png::DecodingError::LimitsExceeded => {
			StegoError::UnsupportedFormat("Image exceeds the decoder memory limits".into())
		}
		err => StegoError::CorruptImage(format!("Failed to read png data: {err}")),
	}
}

/// Decodes a PNG into its channel values and layout
pub fn decode(bytes: &[u8]) -> Result<(ChannelSequence, Geometry)> {
	sniff(bytes)?;

	let mut decoder = png::Decoder::new(bytes);
	decoder.set_transformations(png::Transformations::IDENTITY);
	let mut reader = decoder.read_info().map_err(corrupt)?;

	let (color_type, bit_depth) = reader.output_color_type();
	check_layout(color_type, bit_depth)?;

	let metadata = {
		let info = reader.info();
		if info.animation_control.is_some() {
			return Err(StegoError::UnsupportedFormat(
				"Animated PNG images are not supported".into(),
			));
		}
		if info.icc_profile.is_some() {
			log::warn!("iCCP chunk will not be carried to the output image");
		}
		Metadata {
			gamma: info.source_gamma,
			chromaticities: info.source_chromaticities,
			srgb: info.srgb,
			trns: info.trns.as_ref().map(|trns| trns.to_vec()),
		}
	};

	let mut data = vec![0; reader.output_buffer_size()];
	let frame = reader.next_frame(data.as_mut_slice()).map_err(corrupt)?;
	data.truncate(frame.buffer_size());

	let geometry = Geometry {
		width: frame.width,
		height: frame.height,
		color_type,
		bit_depth,
		metadata,
	};
	if data.len() != geometry.size() {
		return Err(StegoError::CorruptImage(format!(
			"Decoded {}bytes of image data, expected {}bytes",
			data.len(),
			geometry.size()
		)));
	}
	log::debug!(
		"Decoded {}x{} {:?}/{} image: {} channel values",
		geometry.width,
		geometry.height,
		geometry.color_type,
		geometry.bit_depth as u8,
		geometry.channels()
	);

	Ok((ChannelSequence::new(data, bit_depth), geometry))
}

/// Encodes channel values back into a PNG with the given layout
pub fn encode(sequence: &ChannelSequence, geometry: &Geometry) -> Result<Vec<u8>> {
	if sequence.as_bytes().len() != geometry.size() {
		return Err(StegoError::CorruptImage(format!(
			"Channel data is {}bytes, image layout requires {}bytes",
			sequence.as_bytes().len(),
			geometry.size()
		)));
	}

	let mut result = Vec::with_capacity(geometry.size() / 2);
	{
		let mut encoder = png::Encoder::new(&mut result, geometry.width, geometry.height);
		encoder.set_color(geometry.color_type);
		encoder.set_depth(geometry.bit_depth);
		encoder.set_compression(png::Compression::Best);

		// sRGB first: it also resets gAMA and cHRM, which are restored right after
		let metadata = &geometry.metadata;
		if let Some(srgb) = metadata.srgb {
			encoder.set_source_srgb(srgb);
		}
		if let Some(gamma) = metadata.gamma {
			encoder.set_source_gamma(gamma);
		}
		if let Some(chromaticities) = metadata.chromaticities {
			encoder.set_source_chromaticities(chromaticities);
		}
		if let Some(trns) = &metadata.trns {
			encoder.set_trns(trns.clone());
		}

		let mut writer = encoder
			.write_header()
			.map_err(|err| StegoError::CorruptImage(format!("Failed to write png header: {err}")))?;
		writer
			.write_image_data(sequence.as_bytes())
			.map_err(|err| StegoError::CorruptImage(format!("Failed to write image data: {err}")))?;
		writer
			.finish()
			.map_err(|err| StegoError::CorruptImage(format!("Failed to finish png stream: {err}")))?;
	}

	Ok(result)
}


#[cfg(test)]
mod tests {
	use super::testing::noise_png;
	use super::*;

	#[test]
	fn decode_encode_is_bit_exact() {
		for (color, depth) in [
			(ColorType::Rgb, BitDepth::Eight),
			(ColorType::Rgba, BitDepth::Eight),
			(ColorType::Grayscale, BitDepth::Eight),
			(ColorType::GrayscaleAlpha, BitDepth::Sixteen),
			(ColorType::Rgb, BitDepth::Sixteen),
		] {
			let png = noise_png(13, 7, color, depth, 3);
			let (sequence, geometry) = decode(&png).unwrap();
			let reencoded = encode(&sequence, &geometry).unwrap();
			let (again, geometry_again) = decode(&reencoded).unwrap();

			assert_eq!(sequence, again);
			assert_eq!(geometry_again.width, 13);
			assert_eq!(geometry_again.height, 7);
			assert_eq!(geometry_again.color_type, color);
			assert_eq!(geometry_again.bit_depth, depth);
		}
	}

	#[test]
	fn sixteen_bit_exposes_low_bytes() {
		let sequence = ChannelSequence::new(vec![0xAA, 0x01, 0xBB, 0x02], BitDepth::Sixteen);
		assert_eq!(sequence.len(), 2);
		assert_eq!(sequence.values().collect::<Vec<_>>(), vec![0x01, 0x02]);
	}

	#[test]
	fn channel_count() {
		let png = noise_png(100, 100, ColorType::Rgb, BitDepth::Eight, 1);
		let (sequence, geometry) = decode(&png).unwrap();
		assert_eq!(sequence.len(), 30_000);
		assert_eq!(geometry.channels(), 30_000);
	}

	#[test]
	fn rejects_lossy_and_unknown_containers() {
		let jpeg = [0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
		assert!(matches!(decode(&jpeg), Err(StegoError::UnsupportedFormat(_))));
		assert!(matches!(decode(b"hello world"), Err(StegoError::UnsupportedFormat(_))));
		assert!(matches!(decode(&[]), Err(StegoError::UnsupportedFormat(_))));
	}

	#[test]
	fn rejects_palette_images() {
		let mut png = vec![];
		{
			let mut encoder = png::Encoder::new(&mut png, 2, 2);
			encoder.set_color(ColorType::Indexed);
			encoder.set_depth(BitDepth::Eight);
			encoder.set_palette(vec![0, 0, 0, 255, 255, 255]);
			let mut writer = encoder.write_header().unwrap();
			writer.write_image_data(&[0, 1, 1, 0]).unwrap();
		}
		assert!(matches!(decode(&png), Err(StegoError::UnsupportedFormat(_))));
	}

	#[test]
	fn truncated_png_is_corrupt() {
		let png = noise_png(32, 32, ColorType::Rgb, BitDepth::Eight, 9);
		let truncated = &png[..png.len() / 2];
		assert!(matches!(decode(truncated), Err(StegoError::CorruptImage(_))));
	}

	#[test]
	fn encode_rejects_wrong_length() {
		let png = noise_png(4, 4, ColorType::Rgb, BitDepth::Eight, 2);
		let (_, geometry) = decode(&png).unwrap();
		let short = ChannelSequence::new(vec![0; 10], BitDepth::Eight);
		assert!(matches!(encode(&short, &geometry), Err(StegoError::CorruptImage(_))));
	}

	#[test]
	fn gamma_survives_reencoding() {
		let mut png = vec![];
		{
			let mut encoder = png::Encoder::new(&mut png, 2, 1);
			encoder.set_color(ColorType::Rgb);
			encoder.set_depth(BitDepth::Eight);
			encoder.set_source_gamma(ScaledFloat::new(1.0 / 2.2));
			let mut writer = encoder.write_header().unwrap();
			writer.write_image_data(&[1, 2, 3, 4, 5, 6]).unwrap();
		}
		let (sequence, geometry) = decode(&png).unwrap();
		assert!(geometry.metadata.gamma.is_some());

		let (_, again) = decode(&encode(&sequence, &geometry).unwrap()).unwrap();
		assert_eq!(again.metadata.gamma, geometry.metadata.gamma);
	}

	#[test]
	fn display_chunks_survive_reencoding() {
		let chromaticities = SourceChromaticities::new(
			(0.3127, 0.3290),
			(0.6400, 0.3300),
			(0.3000, 0.6000),
			(0.1500, 0.0600),
		);
		let mut png = vec![];
		{
			let mut encoder = png::Encoder::new(&mut png, 2, 1);
			encoder.set_color(ColorType::Rgb);
			encoder.set_depth(BitDepth::Eight);
			encoder.set_source_srgb(SrgbRenderingIntent::Perceptual);
			encoder.set_source_chromaticities(chromaticities);
			encoder.set_trns(vec![0, 1, 0, 2, 0, 3]);
			let mut writer = encoder.write_header().unwrap();
			writer.write_image_data(&[1, 2, 3, 4, 5, 6]).unwrap();
		}
		let (sequence, geometry) = decode(&png).unwrap();
		assert_eq!(geometry.metadata.srgb, Some(SrgbRenderingIntent::Perceptual));
		assert_eq!(geometry.metadata.chromaticities, Some(chromaticities));
		assert_eq!(geometry.metadata.trns, Some(vec![0, 1, 0, 2, 0, 3]));

		let (_, again) = decode(&encode(&sequence, &geometry).unwrap()).unwrap();
		assert_eq!(again.metadata.srgb, geometry.metadata.srgb);
		assert_eq!(again.metadata.chromaticities, geometry.metadata.chromaticities);
		assert_eq!(again.metadata.gamma, geometry.metadata.gamma);
		assert_eq!(again.metadata.trns, geometry.metadata.trns);
	}

	#[test]
	fn rejects_sub_byte_depths() {
		for (depth, row) in [(BitDepth::One, 1), (BitDepth::Two, 2), (BitDepth::Four, 4)] {
			let mut png = vec![];
			{
				let mut encoder = png::Encoder::new(&mut png, 8, 2);
				encoder.set_color(ColorType::Grayscale);
				encoder.set_depth(depth);
				let mut writer = encoder.write_header().unwrap();
				writer.write_image_data(&vec![0b1010_0101; row * 2]).unwrap();
			}
			match decode(&png) {
				Err(StegoError::UnsupportedFormat(err)) => {
					assert!(err.contains(&format!("bit depth {}", depth as u8)), "{err}")
				}
				other => panic!("Expected UnsupportedFormat for {depth:?}, got {other:?}"),
			}
		}
	}

	#[test]
	fn rejects_animated_png() {
		let mut png = vec![];
		{
			let mut encoder = png::Encoder::new(&mut png, 2, 2);
			encoder.set_color(ColorType::Rgb);
			encoder.set_depth(BitDepth::Eight);
			encoder.set_animated(1, 0).unwrap();
			let mut writer = encoder.write_header().unwrap();
			writer.write_image_data(&[7; 12]).unwrap();
		}
		assert!(matches!(decode(&png), Err(StegoError::UnsupportedFormat(_))));
	}

	// Adam7 interlaced 8-bit RGB PNG, zlib stream made of stored blocks
	fn interlaced_png(width: u32, height: u32, pixels: &[u8]) -> Vec<u8> {
		const PASSES: [(u32, u32, u32, u32); 7] = [
			(0, 0, 8, 8),
			(4, 0, 8, 8),
			(0, 4, 4, 8),
			(2, 0, 4, 4),
			(0, 2, 2, 4),
			(1, 0, 2, 2),
			(0, 1, 1, 2),
		];
		let mut raw = vec![];
		for (x0, y0, dx, dy) in PASSES {
			if x0 >= width || y0 >= height {
				continue;
			}
			for y in (y0..height).step_by(dy as usize) {
				raw.push(0);
				for x in (x0..width).step_by(dx as usize) {
					let at = (y * width + x) as usize * 3;
					raw.extend_from_slice(&pixels[at..at + 3]);
				}
			}
		}

		let mut zlib = vec![0x78, 0x01];
		let mut blocks = raw.chunks(0xFFFF).peekable();
		while let Some(block) = blocks.next() {
			zlib.push(blocks.peek().is_none() as u8);
			zlib.extend_from_slice(&(block.len() as u16).to_le_bytes());
			zlib.extend_from_slice(&(!(block.len() as u16)).to_le_bytes());
			zlib.extend_from_slice(block);
		}
		let (a, b) = raw.iter().fold((1u32, 0u32), |(a, b), byte| {
			let a = (a + *byte as u32) % 65521;
			(a, (b + a) % 65521)
		});
		zlib.extend_from_slice(&((b << 16) | a).to_be_bytes());

		let crc = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
		let chunk = |png: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]| {
			png.extend_from_slice(&(data.len() as u32).to_be_bytes());
			let mut digest = crc.digest();
			digest.update(kind);
			digest.update(data);
			png.extend_from_slice(kind);
			png.extend_from_slice(data);
			png.extend_from_slice(&digest.finalize().to_be_bytes());
		};

		let mut ihdr = vec![];
		ihdr.extend_from_slice(&width.to_be_bytes());
		ihdr.extend_from_slice(&height.to_be_bytes());
		ihdr.extend_from_slice(&[8, 2, 0, 0, 1]);

		let mut png = PNG_SIGNATURE.to_vec();
		chunk(&mut png, b"IHDR", &ihdr);
		chunk(&mut png, b"IDAT", &zlib);
		chunk(&mut png, b"IEND", &[]);
		png
	}

	#[test]
	fn interlaced_input_is_bit_exact() {
		let (width, height) = (11, 9);
		let pixels = (0..width * height * 3)
			.map(|i| (i * 37 % 251) as u8)
			.collect::<Vec<_>>();
		let png = interlaced_png(width, height, &pixels);

		let (sequence, geometry) = decode(&png).unwrap();
		assert_eq!(sequence.as_bytes(), pixels.as_slice());

		let (again, geometry_again) = decode(&encode(&sequence, &geometry).unwrap()).unwrap();
		assert_eq!(again.as_bytes(), pixels.as_slice());
		assert_eq!((geometry_again.width, geometry_again.height), (width, height));
		assert_eq!(geometry_again.color_type, ColorType::Rgb);
	}

	#[test]
	fn extension_check() {
		assert!(check_extension(Path::new("a/b/carrier.png")).is_ok());
		assert!(check_extension(Path::new("CARRIER.PNG")).is_ok());
		assert!(matches!(
			check_extension(Path::new("photo.jpg")),
			Err(StegoError::UnsupportedFormat(_))
		));
		assert!(matches!(
			check_extension(Path::new("noext")),
			Err(StegoError::UnsupportedFormat(_))
		));
	}
}
