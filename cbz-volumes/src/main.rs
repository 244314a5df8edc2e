//! cbz-volumes - Repack per-chapter comic archives into per-volume archives

mod chapter;
mod comicinfo;
mod config;
mod error;
mod extract;
mod packer;
mod title;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use config::PackerConfig;
use error::ExtractError;
use indicatif::{ProgressBar, ProgressStyle};
use packer::{PackOptions, PackSummary};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "cbz-volumes",
    about = "Repack per-chapter comic archives into per-volume archives",
    long_about = "Reads the ComicInfo.xml title of every .cbz chapter in SOURCE_DIR and writes \
                  one archive per volume to OUTPUT_DIR/<source name>/, splitting oversized volumes"
)]
#[command(version, args_conflicts_with_subcommands = true)]
struct Args {
    /// Directory with one .cbz archive per chapter
    source_dir: Option<PathBuf>,

    /// Directory to create the volume folder in
    output_dir: Option<PathBuf>,

    /// Volume size in bytes above which volumes are split (overrides config, 0 disables)
    #[arg(long)]
    max_volume_size: Option<u64>,

    /// Enable debug mode for verbose output
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// Configuration subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set the volume size in bytes above which volumes are split
    SetMaxVolumeSize {
        /// Size in bytes (0 disables splitting)
        bytes: u64,
    },
    /// Set how far past the maximum a volume must grow before it is split
    SetSplitMargin {
        /// Ratio, e.g. 1.33
        ratio: f64,
    },
}

/// How a run ended when no error occurred.
#[derive(Debug)]
enum Outcome {
    /// Some archives could not be parsed; nothing was packed.
    Unparsed(Vec<(String, ExtractError)>),
    /// All archives parsed and were packed.
    Packed(PackSummary),
}

#[tokio::main]
async fn main() {
    // Usage errors are informational, not failures
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return;
        }
    };

    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug {
        "cbz_volumes=debug"
    } else {
        "cbz_volumes=info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

async fn run(args: Args) -> Result<()> {
    if let Some(Commands::Config { action }) = &args.command {
        return handle_config_command(action);
    }

    let (Some(source_dir), Some(output_dir)) = (&args.source_dir, &args.output_dir) else {
        Args::command().print_help()?;
        return Ok(());
    };

    let config = PackerConfig::load().context("Failed to load configuration")?;
    let mut options = PackOptions::from(&config);
    if let Some(max_volume_size) = args.max_volume_size {
        options.max_volume_size = max_volume_size;
    }
    log::debug!("Options: {:?}", options);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message("reading metadata");

    let outcome = reorganize(source_dir, output_dir, &options, &pb).await;
    pb.finish_and_clear();

    match outcome? {
        Outcome::Unparsed(failures) => {
            eprintln!("Could not parse {} archive(s):", failures.len());
            for (name, reason) in &failures {
                eprintln!("  \"{}\": {}", name, reason);
            }
            eprintln!("Nothing was packed.");
        }
        Outcome::Packed(summary) => {
            let chapters: usize = summary.archives.iter().map(|a| a.chapters).sum();
            let bytes: u64 = summary.archives.iter().map(|a| a.bytes).sum();
            println!(
                "Packed {} chapter(s) into {} archive(s) ({:.1} MB) in {}",
                chapters,
                summary.archives.len(),
                bytes as f64 / (1024.0 * 1024.0),
                summary.output_dir.display()
            );
            for archive in &summary.archives {
                log::debug!(
                    "volume {} part {}: {} ({} chapter(s))",
                    archive.volume,
                    archive.sub_volume,
                    archive.path.display(),
                    archive.chapters
                );
            }
        }
    }

    Ok(())
}

/// Extract metadata for every chapter in `source_dir` and, if all of it
/// parsed, pack the chapters into volumes under `output_dir`.
///
/// `progress` is sized to the archive count and advanced per archive read.
async fn reorganize(
    source_dir: &Path,
    output_dir: &Path,
    options: &PackOptions,
    progress: &ProgressBar,
) -> Result<Outcome> {
    if !source_dir.is_dir() {
        anyhow::bail!("Source directory not found: {}", source_dir.display());
    }
    let source_dir = source_dir
        .canonicalize()
        .with_context(|| format!("Invalid directory: {}", source_dir.display()))?;

    let files = extract::find_cbz_files(&source_dir)?;
    progress.set_length(files.len() as u64);
    let results = extract::extract_archives(files, |_, _| progress.inc(1)).await;

    let chapters = match extract::into_chapters(results) {
        Ok(chapters) => chapters,
        Err(failures) => return Ok(Outcome::Unparsed(failures)),
    };

    let summary = packer::pack_volumes(&source_dir, output_dir, &chapters, options)?;
    Ok(Outcome::Packed(summary))
}

fn handle_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = PackerConfig::load()?;
            println!("Configuration file: {:?}", PackerConfig::config_path()?);
            println!();
            println!("max_volume_size = {}", config.max_volume_size);
            println!("split_margin = {}", config.split_margin);
        }
        ConfigAction::SetMaxVolumeSize { bytes } => {
            let mut config = PackerConfig::load()?;
            config.max_volume_size = *bytes;
            config.save()?;
            println!("Default max volume size set to: {} bytes", config.max_volume_size);
        }
        ConfigAction::SetSplitMargin { ratio } => {
            config::validate_split_margin(*ratio)?;
            let mut config = PackerConfig::load()?;
            config.split_margin = *ratio;
            config.save()?;
            println!("Default split margin set to: {}", config.split_margin);
        }
    }
    Ok(())
}
