use std::path::{Path, PathBuf};

use clap::{ArgAction, CommandFactory, ErrorKind, Parser, Subcommand};

use adspot::detect::{AdCatalog, DetectionEmitter, Detector, NearestFrames};
#[cfg(feature = "video")]
use adspot::detect::AdInfo;
#[cfg(feature = "video")]
use adspot::fingerprint::Analyzer;
use adspot::{fingerprint, Config};

#[derive(Debug, Subcommand)]
enum Commands {
    #[clap(after_help = "Displays info about adspot and its dependencies.")]
    Info,

    #[cfg(feature = "video")]
    #[clap(
        arg_required_else_help = true,
        after_help = "Decode one or more ad videos into descriptor files. One descriptor is written per video into the output directory, along with an ad directory file listing every ad. These are used by the 'match' and 'search' commands."
    )]
    Analyze {
        #[clap(
            required = true,
            multiple_values = true,
            value_parser = clap::value_parser!(PathBuf),
            help = "Video files or directories to analyze."
        )]
        paths: Vec<PathBuf>,

        #[clap(
            short,
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Directory to write descriptor files to."
        )]
        output: PathBuf,

        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Path of the ad directory file. Defaults to 'ad_directory.txt' in the output directory."
        )]
        directory: Option<PathBuf>,

        #[clap(
            long,
            help = "Only consider files with this extension when expanding directories. Defaults to the configured ad extension."
        )]
        extension: Option<String>,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Enable multi-threaded decoding in FFmpeg."
        )]
        threaded_decoding: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Re-analyze all videos and ignore any existing analysis records on disk."
        )]
        force: bool,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Find the nearest ad frame for every sampled frame of a broadcast and write the result to a nearest-frames file. The file can later be fed to the 'detect' command."
    )]
    Match {
        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Broadcast fingerprints: a descriptor file, an analysis record or (with video support) a video file."
        )]
        broadcast: PathBuf,

        #[clap(long, value_parser = clap::value_parser!(PathBuf), help = "Ad directory file.")]
        ads: PathBuf,

        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Directory containing one descriptor file per ad."
        )]
        descriptors: PathBuf,

        #[clap(
            short,
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Path of the nearest-frames file to write."
        )]
        output: PathBuf,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Run the per-ad sequence trackers over a nearest-frames file and write the detected ads to a results file."
    )]
    Detect {
        #[clap(long, value_parser = clap::value_parser!(PathBuf), help = "Nearest-frames file.")]
        nearest: PathBuf,

        #[clap(long, value_parser = clap::value_parser!(PathBuf), help = "Ad directory file.")]
        ads: PathBuf,

        #[clap(
            short,
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Path of the tab-separated results file to write."
        )]
        output: PathBuf,

        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Also write the detections as JSON to this path."
        )]
        json: Option<PathBuf>,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Do not display detected ads in stdout."
        )]
        no_display: bool,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Match a broadcast against all known ads and write the detected ads to a results file. This is 'match' followed by 'detect' without going through the nearest-frames file, unless one is requested."
    )]
    Search {
        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Broadcast fingerprints: a descriptor file, an analysis record or (with video support) a video file."
        )]
        broadcast: PathBuf,

        #[clap(long, value_parser = clap::value_parser!(PathBuf), help = "Ad directory file.")]
        ads: PathBuf,

        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Directory containing one descriptor file per ad."
        )]
        descriptors: PathBuf,

        #[clap(
            short,
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Path of the tab-separated results file to write."
        )]
        output: PathBuf,

        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Also write the intermediate nearest-frames file to this path."
        )]
        nearest_output: Option<PathBuf>,

        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Also write the detections as JSON to this path."
        )]
        json: Option<PathBuf>,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Do not display detected ads in stdout."
        )]
        no_display: bool,
    },
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        global = true,
        value_parser = clap::value_parser!(PathBuf),
        help = "JSON configuration file. Missing fields use the built-in defaults."
    )]
    config: Option<PathBuf>,

    #[clap(
        long,
        global = true,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "Run matching and tracking on a single thread."
    )]
    no_threading: bool,

    #[clap(
        short,
        long,
        global = true,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "Enable debug logging."
    )]
    verbose: bool,
}

impl Cli {
    fn load_config(&self) -> Config {
        let config = match &self.config {
            Some(path) => Config::from_path(path),
            None => Ok(Config::default()),
        };
        match config {
            Ok(config) => config,
            Err(e) => {
                let mut cmd = Cli::command();
                cmd.error(ErrorKind::InvalidValue, e.to_string()).exit();
            }
        }
    }

    fn threading(&self) -> bool {
        !self.no_threading
    }
}

fn emit(
    emitter: &DetectionEmitter,
    output: &Path,
    json: Option<&Path>,
    display: bool,
) -> adspot::Result<()> {
    emitter.write_results(output)?;
    if let Some(json) = json {
        emitter.write_json(json)?;
    }
    if display {
        emitter.display();
    }
    Ok(())
}

fn main() -> adspot::Result<()> {
    let args = Cli::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    #[cfg(feature = "video")]
    ffmpeg_next::init()?;

    let config = args.load_config();

    match args.command {
        #[cfg(feature = "video")]
        Commands::Analyze {
            ref paths,
            ref output,
            ref directory,
            ref extension,
            threaded_decoding,
            force,
        } => {
            let extension = extension.as_deref().unwrap_or(&config.ad_extension);
            let videos = adspot::util::find_video_files(paths, Some(extension), true)?;
            if videos.is_empty() {
                let mut cmd = Cli::command();
                cmd.error(
                    ErrorKind::InvalidValue,
                    format!("no '.{}' video files found in provided paths", extension),
                )
                .exit();
            }

            let analyzer = Analyzer::from_files(videos, threaded_decoding, force);
            let data = analyzer.run(&config, Some(output.as_path()), args.threading())?;
            let ads: Vec<AdInfo> = data
                .iter()
                .map(|(name, v)| AdInfo::new(name.as_str(), v.total_frames(), v.duration_ms()))
                .collect();

            let directory = directory
                .clone()
                .unwrap_or_else(|| output.join("ad_directory.txt"));
            AdCatalog::write_directory(&directory, &ads)?;
            println!(
                "Analyzed {} ads. Ad directory saved in {}",
                ads.len(),
                directory.display()
            );
        }
        Commands::Match {
            ref broadcast,
            ref ads,
            ref descriptors,
            ref output,
        } => {
            let catalog = AdCatalog::load(ads, descriptors, &config)?;
            let video = fingerprint::load(broadcast, &config)?;
            let name = fingerprint::video_name(broadcast);
            let detector = Detector::new(config, catalog).with_threading(args.threading());
            let nearest = detector.nearest_frames(&name, &video)?;
            nearest.write(output)?;
            println!("Nearest frames saved in {}", output.display());
        }
        Commands::Detect {
            ref nearest,
            ref ads,
            ref output,
            ref json,
            no_display,
        } => {
            let nearest = NearestFrames::from_path(nearest)?;
            let catalog =
                AdCatalog::from_directory(ads, &config.clone().with_sample_rate(nearest.sample_rate))?;
            let detector = Detector::new(config, catalog).with_threading(args.threading());
            let emitter = detector.detect(&nearest)?;
            if !no_display {
                println!("\n{}\n", nearest.broadcast);
            }
            emit(&emitter, output, json.as_deref(), !no_display)?;
        }
        Commands::Search {
            ref broadcast,
            ref ads,
            ref descriptors,
            ref output,
            ref nearest_output,
            ref json,
            no_display,
        } => {
            let catalog = AdCatalog::load(ads, descriptors, &config)?;
            let video = fingerprint::load(broadcast, &config)?;
            let name = fingerprint::video_name(broadcast);
            let detector = Detector::new(config, catalog).with_threading(args.threading());

            let nearest = detector.nearest_frames(&name, &video)?;
            if let Some(path) = nearest_output {
                nearest.write(path)?;
            }
            let emitter = detector.detect(&nearest)?;
            if !no_display {
                println!("\n{}\n", name);
            }
            emit(&emitter, output, json.as_deref(), !no_display)?;
        }
        Commands::Info => {
            println!("adspot version: {}", env!("CARGO_PKG_VERSION"));
            #[cfg(feature = "video")]
            println!(
                "FFmpeg version: {}",
                adspot::util::ffmpeg_version_string()
            );
            println!("Default configuration:");
            println!("{}", serde_json::to_string_pretty(&Config::default())?);
        }
    }

    Ok(())
}
