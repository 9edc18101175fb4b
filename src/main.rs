use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use bmprle::{Algorithm, Bitmap, BmpError, CompressedBitmap};
use clap::builder::PossibleValue;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command, ValueEnum};
use log::{debug, error, info, warn, LevelFilter};
use thiserror::Error;

#[derive(Copy, Clone, Debug)]
struct AlgorithmArg(Algorithm);

impl ValueEnum for AlgorithmArg {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            AlgorithmArg(Algorithm::Buffered),
            AlgorithmArg(Algorithm::Streaming),
        ]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self.0 {
            Algorithm::Buffered => {
                PossibleValue::new("buffered").help("Encode the whole image into a token buffer")
            }
            Algorithm::Streaming => {
                PossibleValue::new("streaming").help("Push rows through the streaming encoder")
            }
        })
    }
}

#[derive(Error, Debug)]
enum Failure {
    #[error("could not open input image {path:?}: {source}")]
    OpenInput { path: PathBuf, source: io::Error },

    #[error("could not create output image {path:?}: {source}")]
    CreateOutput { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Bitmap(#[from] BmpError),
}

impl Failure {
    /// Distinct exit status per failure class, 2 is taken by usage errors.
    fn exit_code(&self) -> u8 {
        match self {
            Failure::CreateOutput { .. } => 3,
            Failure::OpenInput { .. } => 4,
            Failure::Bitmap(BmpError::Read { .. } | BmpError::Truncated { .. }) => 4,
            Failure::Bitmap(BmpError::Rle(_)) => 6,
            Failure::Bitmap(BmpError::Write { .. }) => 7,
            Failure::Bitmap(_) => 5,
        }
    }
}

#[rustfmt::skip]
fn create_cmd_args() -> Command {
    Command::new("bmprle")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Compress 8bpp BMP images using the RLE8 algorithm")
        .arg(Arg::new("input")
            .help("Input bitmap")
            .value_name("INFILE")
            .required(true)
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("output")
            .short('o')
            .long("output")
            .value_name("OUTFILE")
            .help("Output path of the compressed image")
            .required_unless_present("benchmark")
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("algorithm")
            .short('a')
            .long("algorithm")
            .help("Encoder implementation to use, all produce identical output")
            .value_parser(value_parser!(AlgorithmArg))
            .default_value("buffered"))
        .arg(Arg::new("benchmark")
            .short('b')
            .long("benchmark")
            .value_name("REPETITIONS")
            .help("Compress the image REPETITIONS times and display the average compression time")
            .long_help("Compress the image REPETITIONS times and display the average compression time,\nin addition to writing the compressed image to the output path (if specified)")
            .value_parser(value_parser!(u64).range(1..)))
        .arg(Arg::new("decompress")
            .short('d')
            .long("decompress")
            .action(ArgAction::SetTrue)
            .conflicts_with("benchmark")
            .help("Expand an RLE8 image back into an uncompressed one"))
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .action(ArgAction::Count)
            .help_heading("LOGGING")
            .help("Display more information, repeat for more (RUST_LOG takes precedence)"))
        .after_help("EXAMPLES:\n  bmprle -o ./output.bmp ./input.bmp\n  bmprle --algorithm streaming -o ./output.bmp ./input.bmp\n  bmprle -b 42 ./input.bmp\n  bmprle -d -o ./restored.bmp ./output.bmp")
}

fn setup_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn open(path: &Path) -> Result<BufReader<File>, Failure> {
    let file = File::open(path).map_err(|source| Failure::OpenInput {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Create `path` and run `write` on it, removing the file if writing fails.
fn write_output<F>(path: &Path, write: F) -> Result<(), Failure>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), BmpError>,
{
    let file = File::create(path).map_err(|source| Failure::CreateOutput {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    if let Err(err) = write(&mut writer) {
        drop(writer);
        if let Err(remove) = fs::remove_file(path) {
            warn!("could not remove partial output {path:?}: {remove}");
        }
        return Err(err.into());
    }
    Ok(())
}

/// Average wall-clock time of one encode.
fn benchmark(repetitions: u64, algorithm: Algorithm, bitmap: &Bitmap) -> Result<Duration, BmpError> {
    let (width, height) = (bitmap.width(), bitmap.height());
    let start = Instant::now();
    for _ in 0..repetitions {
        let tokens = algorithm.encode(&bitmap.pixels, width, height)?;
        std::hint::black_box(tokens);
    }
    Ok(Duration::from_secs_f64(
        start.elapsed().as_secs_f64() / repetitions as f64,
    ))
}

fn decompress(input: &Path, output: &Path) -> Result<(), Failure> {
    let compressed = CompressedBitmap::read_from(open(input)?)?;
    let bitmap = compressed.decompress()?;
    write_output(output, |writer| bitmap.write_to(writer))?;
    println!("Image has been successfully decompressed.");
    Ok(())
}

fn run(options: &ArgMatches) -> Result<(), Failure> {
    let input = options.get_one::<PathBuf>("input").unwrap();
    let output = options.get_one::<PathBuf>("output");

    // output is required unless benchmarking, which conflicts with decompress
    if let (true, Some(output)) = (options.get_flag("decompress"), output) {
        return decompress(input, output);
    }

    let algorithm = options.get_one::<AlgorithmArg>("algorithm").unwrap().0;
    info!("using {algorithm} algorithm");

    let bitmap = Bitmap::read_from(open(input)?)?;
    debug!(
        "{}x{} image, {} bytes of pixel data",
        bitmap.width(),
        bitmap.height(),
        bitmap.pixels.len()
    );

    if let Some(&repetitions) = options.get_one::<u64>("benchmark") {
        let average = benchmark(repetitions, algorithm, &bitmap)?;
        println!(
            "Average compression time of {repetitions} repetitions using {algorithm} algorithm is {:.2} ms.",
            average.as_secs_f64() * 1000.0
        );
    }

    let Some(output) = output else {
        return Ok(());
    };

    let compressed = bitmap.compress(algorithm)?;
    write_output(output, |writer| compressed.write_to(writer))?;

    let old_size = bitmap.file_header.file_size as f64;
    let new_size = compressed.file_header.file_size as f64;
    println!("Image has been successfully compressed.");
    println!("Compression ratio: {:.2}", old_size / new_size);
    println!("Space saving: {:.2}%", (1.0 - new_size / old_size) * 100.0);
    Ok(())
}

fn main() -> ExitCode {
    let options = create_cmd_args().get_matches();
    setup_logger(options.get_count("verbose"));

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!("{failure}");
            ExitCode::from(failure.exit_code())
        }
    }
}
