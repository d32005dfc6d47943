use std::env;
use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use env_logger::Builder;
use getopts::Matches;
use getopts::Options;
use log::LevelFilter;
use stegopng::password;
use stegopng::Config;
use stegopng::Operation;
use stegopng::Outcome;
use stegopng::StegoError;

fn print_usage(program: &str, opts: Options) {
	let brief = format!(
		"Usage: {0} -(e|i|g|d|z) [MESSAGE] FILE [-o OUTPUT] [-k KEY] [opts]
		Encode:    {0} -e \"attack at dawn\" carrier.png -o out.png
		Encrypted: {0} -e \"attack at dawn\" carrier.png -o out.png -k key.png -K out-key.png
		Decode:    {0} -d out.png [-k out-key.png]
		Info:      {0} -z carrier.png",
		program
	);
	print!("{}", opts.usage(&brief));
}

fn print_version() {
	print!(
		r#"stegopng {} (c) ef3d0c3e -- Hide messages in PNG images
Copyright (c) 2024
stegopng is licensed under the GNU Affero General Public License version 3 (AGPLv3),
under the terms of the Free Software Foundation <https://www.gnu.org/licenses/agpl-3.0.en.html>.

This program is free software; you may modify and redistribute it.
There is NO WARRANTY, to the extent permitted by law.
"#,
		env!("CARGO_PKG_VERSION")
	);
}

fn init_logger(verbose: bool) {
	let mut builder = Builder::new();
	builder
		.format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
		.filter_level(if verbose {
			LevelFilter::Debug
		} else {
			LevelFilter::Off
		});
	if let Ok(filters) = env::var("RUST_LOG") {
		builder.parse_filters(&filters);
	}
	builder.init();
}

/// Default key image artifact path: `<stem> - key.png` next to the output
fn default_key_output(output: &Path) -> PathBuf {
	let stem = output
		.file_stem()
		.map_or(String::new(), |stem| stem.to_string_lossy().into_owned());
	output.with_file_name(format!("{stem} - key.png"))
}

/// Message to embed, and whether it was generated
fn read_message(matches: &Matches) -> Result<(Vec<u8>, bool), StegoError> {
	if let Some(message) = matches.opt_str("e") {
		Ok((message.into_bytes(), false))
	} else if let Some(file) = matches.opt_str("i") {
		fs::read(&file)
			.map(|data| (data, false))
			.map_err(|err| StegoError::io(file, err))
	} else {
		Ok((password::generate().into_bytes(), true))
	}
}

fn encode(input: PathBuf, matches: &Matches, config: &Config) -> Result<(), StegoError> {
	let output = matches
		.opt_str("o")
		.map(PathBuf::from)
		.ok_or_else(|| StegoError::InvalidArgument("Missing -o(utput) file".into()))?;
	let (message, generated) = read_message(matches)?;

	let operation = match matches.opt_str("k") {
		Some(key_image) => Operation::EncodeEncrypted {
			carrier: input,
			message: message.clone(),
			output_key_image: matches
				.opt_str("K")
				.map_or_else(|| default_key_output(&output), PathBuf::from),
			output,
			key_image: PathBuf::from(key_image),
		},
		None => {
			if matches.opt_present("K") {
				return Err(StegoError::InvalidArgument(
					"-K(ey-output) requires a -k(ey) image".into(),
				));
			}
			Operation::EncodePlaintext {
				carrier: input,
				message: message.clone(),
				output,
			}
		}
	};

	stegopng::run(&operation, config)?;
	if generated {
		println!("{}", String::from_utf8_lossy(&message));
	}
	Ok(())
}

fn decode(input: PathBuf, matches: &Matches, config: &Config) -> Result<(), StegoError> {
	let operation = match matches.opt_str("k") {
		Some(key_image) => Operation::DecodeEncrypted {
			carrier: input,
			key_image: PathBuf::from(key_image),
			key_artifact: matches.opt_str("a").map(PathBuf::from),
		},
		None => {
			if matches.opt_present("a") {
				return Err(StegoError::InvalidArgument(
					"-a(rtifact) requires a -k(ey) image".into(),
				));
			}
			Operation::DecodePlaintext { carrier: input }
		}
	};

	let Outcome::Message(message) = stegopng::run(&operation, config)? else {
		return Err(StegoError::InvalidArgument("Decoding produced no message".into()));
	};

	match matches.opt_str("o") {
		Some(output) => {
			fs::write(&output, &message).map_err(|err| StegoError::io(&output, err))?;
			log::debug!("Message written to `{output}`");
		}
		None => {
			let mut stdout = io::stdout().lock();
			stdout
				.write_all(&message)
				.and_then(|_| stdout.write_all(b"\n"))
				.and_then(|_| stdout.flush())
				.map_err(|err| StegoError::io("<stdout>", err))?;
		}
	}
	Ok(())
}

fn info(input: PathBuf, config: &Config) -> Result<(), StegoError> {
	if let Outcome::Info(info) = stegopng::run(&Operation::Info { carrier: input }, config)? {
		println!("{info}");
	}
	Ok(())
}

fn main() -> ExitCode {
	let args: Vec<String> = env::args().collect();
	let program = args[0].clone();

	let mut opts = Options::new();
	opts.optopt("e", "embed", "Message to embed", "TXT");
	opts.optopt("i", "input", "Embed the content of a file", "PATH");
	opts.optflag("g", "generate", "Embed a generated random message and print it");
	opts.optflag("d", "decode", "Decode mode");
	opts.optflag("z", "info", "Print dimensions and capacity");
	opts.optopt("o", "output", "Output file", "PATH");
	opts.optopt("k", "key", "Key image, the key image artifact when decoding", "PATH");
	opts.optopt(
		"K",
		"key-output",
		"Key image artifact output, defaults to \"<OUTPUT> - key.png\"",
		"PATH",
	);
	opts.optopt(
		"a",
		"artifact",
		"Key image artifact, when -k is the original key image",
		"PATH",
	);
	opts.optopt("l", "algorithm", "Embed algorithm, defaults to lo1", "lo1");
	opts.optopt("", "kdf-memory", "Argon2 memory cost", "KiB");
	opts.optopt("", "kdf-time", "Argon2 passes", "N");
	opts.optopt("", "kdf-lanes", "Argon2 parallelism", "N");
	opts.optflag("", "verbose", "Print debug information to stderr");
	opts.optflag("h", "help", "Print this help menu");
	opts.optflag("v", "version", "Print program version and licenses");

	let matches = match opts.parse(&args[1..]) {
		Ok(m) => m,
		Err(f) => {
			eprintln!("{f}");
			return ExitCode::FAILURE;
		}
	};
	if matches.opt_present("v") {
		print_version();
		return ExitCode::SUCCESS;
	}
	if matches.opt_present("h") {
		print_usage(&program, opts);
		return ExitCode::SUCCESS;
	}
	init_logger(matches.opt_present("verbose"));

	// Get input file
	if matches.free.is_empty() {
		eprintln!("Missing input file");
		print_usage(&program, opts);
		return ExitCode::FAILURE;
	}
	let input_file = PathBuf::from(&matches.free[0]);

	// Check options
	let sources = ["e", "i", "g"]
		.into_iter()
		.filter(|name| matches.opt_present(name))
		.count();
	let modes =
		sources.min(1) + matches.opt_present("d") as usize + matches.opt_present("z") as usize;
	if sources > 1 || modes > 1 {
		eprintln!("Specify either `-e(--embed)`, `-i(--input)`, `-g(--generate)`, `-z(--info)` or `-d(--decode)`");
		return ExitCode::FAILURE;
	}

	let config = match Config::from_options(
		matches.opt_str("l").as_deref(),
		matches.opt_str("kdf-memory").as_deref(),
		matches.opt_str("kdf-time").as_deref(),
		matches.opt_str("kdf-lanes").as_deref(),
	) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("{e}");
			return ExitCode::FAILURE;
		}
	};

	let result = if sources == 1 {
		encode(input_file, &matches, &config)
	} else if matches.opt_present("d") {
		decode(input_file, &matches, &config)
	} else if matches.opt_present("z") {
		info(input_file, &config)
	} else {
		print_usage(&program, opts);
		return ExitCode::FAILURE;
	};

	if let Err(e) = result {
		eprintln!("{e}");
		return ExitCode::FAILURE;
	}

	ExitCode::SUCCESS
}
