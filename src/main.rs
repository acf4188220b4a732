//! `ir-scope` command line entry point
//!
//! Views, dumps, summarises and re-records captured packet streams.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ir_scope_lib::analysis::{dump_frames, BrightnessSummary, DEFAULT_DUMP_FRAMES};
use ir_scope_lib::capture::{record_stream, save_frame, CaptureMetadata, DEFAULT_BYTE_LIMIT};
use ir_scope_lib::config::{DecodeMode, ViewerConfig, DEFAULT_SAVE_PATH};
use ir_scope_lib::frame_assembler::FrameReader;
use ir_scope_lib::replay::{replay_all_frames, ReplaySource};
use ir_scope_lib::viewer::{Command, DisplaySink, NullDisplay, PgmSink, Viewer};

#[derive(Parser, Debug)]
#[command(author, version, about = "Raw IR camera stream viewer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the filter pipeline over a capture and render accepted frames
    View(ViewArgs),
    /// Print per-frame analysis for the first frames of a capture
    Dump {
        /// Packet stream file
        capture: PathBuf,
        /// Frames to analyse
        #[arg(short, long, default_value_t = DEFAULT_DUMP_FRAMES)]
        frames: usize,
        /// Where to save the first frame's raw bytes
        #[arg(long, default_value = DEFAULT_SAVE_PATH)]
        save: PathBuf,
    },
    /// Copy a packet stream into a fresh capture with metadata
    Record {
        /// Packet stream to read
        input: PathBuf,
        /// Directory for `packets_<ts>.bin` and `metadata_<ts>.json`
        output_dir: PathBuf,
        /// Stop after this many bytes
        #[arg(long, default_value_t = DEFAULT_BYTE_LIMIT)]
        limit: u64,
        /// Free-form description stored in the metadata
        #[arg(long)]
        description: Option<String>,
    },
    /// Brightness summary over every frame of a capture
    Stats {
        /// Packet stream file
        capture: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug)]
struct ViewArgs {
    /// Packet stream file
    capture: PathBuf,
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Decode mode (raw, deint-even, deint-odd, 16bit-le)
    #[arg(short, long)]
    mode: Option<String>,
    /// Display width in pixels
    #[arg(short, long)]
    width: Option<usize>,
    /// Show interleaved frames too
    #[arg(long)]
    no_stripe_filter: bool,
    /// Disable size and brightness locking
    #[arg(long)]
    no_hold: bool,
    /// Stitch fragments up to --target-size bytes
    #[arg(long)]
    accumulate: bool,
    /// Accumulation target in bytes
    #[arg(long)]
    target_size: Option<usize>,
    /// Frames darker than this are rejected
    #[arg(long)]
    brightness_floor: Option<u32>,
    /// Write the last displayed frame to this PGM file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Save the first displayed frame
    #[arg(long)]
    save_first: bool,
    /// Key presses applied before the first frame, e.g. "mm+d"
    #[arg(long, default_value = "")]
    keys: String,
    /// Restart the capture when it ends
    #[arg(long = "loop")]
    loop_playback: bool,
}

impl ViewArgs {
    fn load_config(&self) -> Result<ViewerConfig> {
        let mut config = match &self.config {
            Some(path) => ViewerConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ViewerConfig::default(),
        };
        config.apply_env();

        if let Some(mode) = &self.mode {
            config.display.mode = DecodeMode::from_env_str(mode);
        }
        if let Some(width) = self.width {
            config.display.width = width;
            config.display.adjust_width(0);
        }
        if self.no_stripe_filter {
            config.filter.stripe_filter = false;
        }
        if self.no_hold {
            config.filter.frame_hold = false;
        }
        if self.accumulate {
            config.filter.accumulate = true;
        }
        if let Some(target) = self.target_size {
            config.filter.target_frame_size = target;
        }
        if let Some(floor) = self.brightness_floor {
            config.filter.brightness_floor = floor;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let running = AtomicBool::new(true);

    match cli.command {
        Commands::View(args) => view(&args, &running),
        Commands::Dump {
            capture,
            frames,
            save,
        } => dump(&capture, frames, &save, &running),
        Commands::Record {
            input,
            output_dir,
            limit,
            description,
        } => record(&input, &output_dir, limit, description, &running),
        Commands::Stats { capture, json } => stats(&capture, json),
    }
}

fn view(args: &ViewArgs, running: &AtomicBool) -> Result<()> {
    let config = args.load_config()?;
    let source = ReplaySource::load(&args.capture)
        .with_context(|| format!("Failed to load {}", args.capture.display()))?
        .with_looping(args.loop_playback);

    log::info!(
        "Viewing {} ({} packets, mode {}, width {})",
        args.capture.display(),
        source.packet_count(),
        config.display.mode,
        config.display.width
    );

    let mut commands = Command::parse_keys(&args.keys);
    if args.save_first {
        commands.push(Command::SaveNextFrame);
    }

    match &args.output {
        Some(path) => run_viewer(source, PgmSink::new(path), config, &commands, running),
        None => run_viewer(source, NullDisplay::new(), config, &commands, running),
    }
}

fn run_viewer<D: DisplaySink>(
    source: ReplaySource,
    display: D,
    config: ViewerConfig,
    commands: &[Command],
    running: &AtomicBool,
) -> Result<()> {
    let mut viewer = Viewer::new(source, display, config);
    for &command in commands {
        viewer.queue_command(command);
    }
    let status = viewer.run(running).context("Viewer stopped on a transport error")?;
    println!("{}", status);
    Ok(())
}

fn dump(capture: &Path, count: usize, save: &Path, running: &AtomicBool) -> Result<()> {
    let source = ReplaySource::load(capture)
        .with_context(|| format!("Failed to load {}", capture.display()))?;
    let mut reader = FrameReader::new(source);

    println!("\n[DUMP] Capturing frames with analysis...\n");
    let dump = dump_frames(&mut reader, count, running)?;
    for report in &dump.reports {
        println!("{}", report);
    }

    if let Some(first) = &dump.first_frame {
        save_frame(save, first)?;
        println!("           -> saved {}", save.display());
    }
    Ok(())
}

fn record(
    input: &Path,
    output_dir: &Path,
    limit: u64,
    description: Option<String>,
    running: &AtomicBool,
) -> Result<()> {
    let mut source = ReplaySource::load(input)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    let base = source.metadata().cloned().unwrap_or_default();
    let metadata = CaptureMetadata {
        description: description.unwrap_or_else(|| base.description.clone()),
        ..base
    };

    let summary = record_stream(
        &mut source,
        output_dir,
        metadata,
        limit,
        ViewerConfig::default().read_timeout(),
        running,
    )?;
    println!(
        "Recorded {} packets ({} bytes, {} frames) to {}",
        summary.metadata.total_packets,
        summary.metadata.total_bytes,
        summary.metadata.total_frames,
        summary.packets_path.display()
    );
    Ok(())
}

fn stats(capture: &Path, json: bool) -> Result<()> {
    let frames = replay_all_frames(capture)
        .with_context(|| format!("Failed to load {}", capture.display()))?;
    let summary = BrightnessSummary::from_frames(&frames);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("=== {} ===", capture.display());
        println!("{}", summary);
    }
    Ok(())
}
