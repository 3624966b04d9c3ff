use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use hyast::{config::EncodingConfig, shape::ShapeRegistry, tree::Tree};
use log::info;

/// Encode JSON syntax trees into hyast modules and back.
#[derive(Parser)]
#[command(name = "hyast", version)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode a JSON tree into a module
    Encode {
        /// Shape registry (TOML)
        #[arg(short, long)]
        shapes: PathBuf,
        /// Encoder configuration (TOML); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Input JSON document
        input: PathBuf,
        /// Output module
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Decode a module into a JSON tree
    Decode {
        /// Shape registry (TOML)
        #[arg(short, long)]
        shapes: PathBuf,
        /// Input module
        input: PathBuf,
        /// Output JSON document; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Print the header, directory and section sizes of a module
    Inspect {
        /// Input module
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .format_target(false)
        .init();

    match cli.command {
        Command::Encode {
            shapes,
            config,
            input,
            output,
        } => encode(&shapes, config.as_deref(), &input, &output),
        Command::Decode {
            shapes,
            input,
            output,
            pretty,
        } => decode(&shapes, &input, output.as_deref(), pretty),
        Command::Inspect { input } => inspect(&input),
    }
}

fn load_registry(path: &Path) -> Result<ShapeRegistry> {
    ShapeRegistry::load(path).with_context(|| format!("loading shapes from {}", path.display()))
}

fn encode(shapes: &Path, config: Option<&Path>, input: &Path, output: &Path) -> Result<()> {
    let registry = load_registry(shapes)?;
    let config = match config {
        Some(path) => EncodingConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EncodingConfig::default(),
    };

    let text = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", input.display()))?;
    let tree = Tree::from_json(&json, &registry)
        .with_context(|| format!("converting {}", input.display()))?;

    let bytes = hyast::encode(&tree, &registry, &config)
        .with_context(|| format!("encoding {}", input.display()))?;
    fs::write(output, &bytes).with_context(|| format!("writing {}", output.display()))?;
    info!(
        "{} -> {}: {} JSON bytes, {} module bytes",
        input.display(),
        output.display(),
        text.len(),
        bytes.len()
    );
    Ok(())
}

fn decode(shapes: &Path, input: &Path, output: Option<&Path>, pretty: bool) -> Result<()> {
    let registry = load_registry(shapes)?;
    let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let tree = hyast::decode(&bytes, &registry)
        .with_context(|| format!("decoding {}", input.display()))?;

    let json = tree.to_json(&registry);
    let mut text = if pretty {
        serde_json::to_string_pretty(&json)?
    } else {
        serde_json::to_string(&json)?
    };
    text.push('\n');

    match output {
        Some(path) => fs::write(path, text).with_context(|| format!("writing {}", path.display()))?,
        None => io::stdout().lock().write_all(text.as_bytes())?,
    }
    Ok(())
}

fn inspect(input: &Path) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let summary =
        hyast::inspect(&bytes).with_context(|| format!("inspecting {}", input.display()))?;
    print!("{summary}");
    Ok(())
}
