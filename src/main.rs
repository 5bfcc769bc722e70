use anyhow::{anyhow, bail, Context};
use bitveil::media::{self, WavContainer};
use bitveil::{AudioCarrier, Carrier, Depth, HiddenFile, ImageCarrier, SchedulerConfig, Stego, StegoConfig};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// bitveil - multi-threaded LSB steganography
///
/// Hides files in the least significant bits of PNG/BMP/TIFF images or WAV audio.
#[derive(Parser)]
#[command(name = "bitveil")]
#[command(version)]
#[command(about = "Multi-threaded LSB steganography", long_about = None)]
struct Cli {
    /// Worker threads (0 = all cores)
    #[arg(short, long, global = true, env = "BITVEIL_WORKERS", default_value_t = 0)]
    workers: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hide one or more files in a carrier
    Embed {
        /// Carrier image or WAV file
        #[arg(short, long)]
        carrier: PathBuf,

        /// Output path (lossless image format or .wav)
        #[arg(short, long)]
        output: PathBuf,

        /// Low-order bits used per channel (1-8)
        #[arg(short, long, default_value_t = 1)]
        depth: u8,

        /// Encrypt the payload with this password
        #[arg(short, long, env = "BITVEIL_PASSWORD")]
        password: Option<String>,

        /// Store files without zstd compression
        #[arg(long)]
        no_compress: bool,

        /// Files to hide
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Recover hidden files from a carrier
    Extract {
        /// Carrier image or WAV file
        #[arg(short, long)]
        carrier: PathBuf,

        /// Directory for the recovered files
        #[arg(short = 'O', long, default_value = ".")]
        output_dir: PathBuf,

        /// Password used while embedding
        #[arg(short, long, env = "BITVEIL_PASSWORD")]
        password: Option<String>,
    },
    /// Show carrier capacity per LSB depth
    Info {
        /// Carrier image or WAV file
        #[arg(short, long)]
        carrier: PathBuf,
    },
}

enum Loaded {
    Image(ImageCarrier),
    Audio(AudioCarrier, WavContainer),
}

impl Loaded {
    fn open(path: &Path) -> bitveil::Result<Self> {
        if media::is_wav(path) {
            let (carrier, container) = media::load_wav(path)?;
            Ok(Loaded::Audio(carrier, container))
        } else {
            Ok(Loaded::Image(media::load_image(path)?))
        }
    }

    fn carrier(&self) -> &dyn Carrier {
        match self {
            Loaded::Image(image) => image,
            Loaded::Audio(audio, _) => audio,
        }
    }

    fn save(self, path: &Path) -> bitveil::Result<()> {
        match self {
            Loaded::Image(image) => media::save_image(image, path),
            Loaded::Audio(audio, container) => media::save_wav(audio, &container, path),
        }
    }
}

/// File names are stored as given; only the final component is used on extract.
fn safe_name(name: &str) -> anyhow::Result<&str> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| anyhow!("refusing to write hidden file with unusable name {:?}", name))
}

/// The output is written in the carrier's own container, so the kinds must agree.
fn check_output_kind(carrier: &Path, output: &Path) -> anyhow::Result<()> {
    match (media::is_wav(carrier), media::is_wav(output)) {
        (true, false) => bail!("carrier {} is WAV audio but output {} is not .wav", carrier.display(), output.display()),
        (false, true) => bail!("carrier {} is an image but output {} is .wav", carrier.display(), output.display()),
        _ => Ok(()),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "bitveil=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let scheduler = SchedulerConfig::with_workers(cli.workers);

    match cli.command {
        Commands::Embed { carrier, output, depth, password, no_compress, files } => {
            let depth = Depth::new(depth)?;
            check_output_kind(&carrier, &output)?;
            if !media::is_wav(&output) {
                media::validate_lossless_format(&output)?;
            }

            let hidden = files
                .iter()
                .map(|path| {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;
                    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
                    Ok(HiddenFile::new(name, data))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            let loaded = Loaded::open(&carrier)?;
            let config = StegoConfig {
                depth,
                scheduler,
                compression_level: if no_compress { None } else { StegoConfig::default().compression_level },
            };
            let mut stego = Stego::with_config(config);
            if let Some(password) = &password {
                stego = stego.with_password(password);
            }

            let report = stego.embed(loaded.carrier(), &hidden)?;
            info!(
                used = report.required_bits,
                capacity = report.capacity_bits,
                "embedded {} file(s)",
                report.envelope.files.len()
            );
            loaded.save(&output)?;
            println!(
                "Embedded {} file(s) into {} ({} of {} bits used)",
                hidden.len(),
                output.display(),
                report.required_bits,
                report.capacity_bits
            );
        }

        Commands::Extract { carrier, output_dir, password } => {
            let loaded = Loaded::open(&carrier)?;
            let mut stego = Stego::with_config(StegoConfig { scheduler, ..StegoConfig::default() });
            if let Some(password) = &password {
                stego = stego.with_password(password);
            }

            let files = stego.extract(loaded.carrier())?;
            fs::create_dir_all(&output_dir)?;
            for file in &files {
                let path = output_dir.join(safe_name(&file.name)?);
                fs::write(&path, &file.data).with_context(|| format!("writing {}", path.display()))?;
                println!("{} ({} bytes)", path.display(), file.data.len());
            }
        }

        Commands::Info { carrier } => {
            let loaded = Loaded::open(&carrier)?;
            let view = loaded.carrier();
            println!("Carrier:  {}", carrier.display());
            println!("Units:    {} x {} channel(s)", view.units(), view.channels());
            for k in 1..=8 {
                let depth = Depth::new(k)?;
                println!(
                    "K={}: {:>12} bytes plain, {:>12} bytes encrypted",
                    k,
                    Stego::calculate_capacity(view, depth, false),
                    Stego::calculate_capacity(view, depth, true)
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_name_strips_directories() {
        assert_eq!(safe_name("notes.txt").unwrap(), "notes.txt");
        assert_eq!(safe_name("../../etc/passwd").unwrap(), "passwd");
        assert!(safe_name("").is_err());
        assert!(safe_name("..").is_err());
    }

    #[test]
    fn test_output_kind_must_match_carrier() {
        assert!(check_output_kind(Path::new("in.wav"), Path::new("out.WAV")).is_ok());
        assert!(check_output_kind(Path::new("in.png"), Path::new("out.bmp")).is_ok());
        assert!(check_output_kind(Path::new("in.wav"), Path::new("out.png")).is_err());
        assert!(check_output_kind(Path::new("in.png"), Path::new("out.wav")).is_err());
    }

    #[test]
    fn test_cli_parses_embed() {
        let cli = Cli::try_parse_from([
            "bitveil", "-w", "2", "embed", "-c", "in.png", "-o", "out.png", "-d", "3", "a.txt", "b.txt",
        ])
        .unwrap();
        assert_eq!(cli.workers, 2);
        match cli.command {
            Commands::Embed { depth, files, .. } => {
                assert_eq!(depth, 3);
                assert_eq!(files.len(), 2);
            }
            _ => panic!("expected embed"),
        }
    }
}
