use std::str::FromStr;

use crate::crypto::KdfParams;
use crate::embed::EmbedAlgorithm;

/// Settings shared by every operation.
///
/// `algorithm` has to be identical when encoding and decoding. `kdf` only matters when encoding:
/// the costs are stored in the key image artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
	pub algorithm: EmbedAlgorithm,
	pub kdf: KdfParams,
}

impl Config {
	pub fn with_algorithm(mut self, algorithm: EmbedAlgorithm) -> Self {
		self.algorithm = algorithm;
		self
	}

	pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
		self.kdf = kdf;
		self
	}

	/// Overrides the defaults with textual options, as given on the command line
	pub fn from_options(
		algorithm: Option<&str>,
		m_cost: Option<&str>,
		t_cost: Option<&str>,
		p_cost: Option<&str>,
	) -> Result<Self, String> {
		fn parse<T: FromStr>(value: Option<&str>, name: &str, default: T) -> Result<T, String>
		where
			T::Err: std::fmt::Display,
		{
			match value {
				None => Ok(default),
				Some(s) => s
					.parse::<T>()
					.map_err(|err| format!("Failed to parse `{s}` as {name}: {err}")),
			}
		}

		let defaults = Config::default();
		let algorithm = parse(algorithm, "embed algorithm", defaults.algorithm)?;
		let kdf = KdfParams {
			m_cost: parse(m_cost, "kdf memory", defaults.kdf.m_cost)?,
			t_cost: parse(t_cost, "kdf time", defaults.kdf.t_cost)?,
			p_cost: parse(p_cost, "kdf lanes", defaults.kdf.p_cost)?,
		};
		kdf.validate()?;

		Ok(Self { algorithm, kdf })
	}
}
