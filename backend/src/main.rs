//! salesdiff CLI - Stage and export retail sales tables
//!
//! # Main Commands
//!
//! ```bash
//! salesdiff serve                                   # Start HTTP server (port 3000)
//! salesdiff stage FACT_SALES.csv DIM_PRODUCT.xlsx   # Print the derived stage as CSV
//! salesdiff bundle FACT_SALES.csv -o out.zip        # Write a ZIP bundle
//! ```
//!
//! # Debug Commands (for development)
//!
//! ```bash
//! salesdiff parse DIM_PRODUCT.xlsx                  # Parse one file, print its summary
//! ```

use clap::{Parser, Subcommand};
use salesdiff::{
    bundle_stage, compute_named, ingest, parse_bytes, serialize, Batch, Config, Encoding,
    FileKind, ParseSummary, Role, Upload,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "salesdiff")]
#[command(about = "Preview retail sales uploads through a clean/join/derive pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse one file and print its summary as JSON
    Parse {
        /// Input file (csv, xlsx or xls)
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Ingest files, compute a stage and serialize it
    Stage {
        /// Input files, in submission order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Stage: raw, cleaned, joined or derived
        #[arg(short, long, default_value = "derived")]
        stage: String,

        /// Output format: csv or jsonl
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Ingest files and write a ZIP bundle for a stage
    Bundle {
        /// Input files, in submission order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Stage: raw, cleaned, joined or derived
        #[arg(short, long, default_value = "derived")]
        stage: String,

        /// Output ZIP file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Session directory (overrides SALESDIFF_DATA_DIR)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present) and the SALESDIFF_* variables
    let config = Config::from_env();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Parse { input, output } => cmd_parse(&input, output.as_deref()),

        Commands::Stage {
            inputs,
            stage,
            format,
            output,
        } => cmd_stage(&config, &inputs, &stage, &format, output.as_deref()).await,

        Commands::Bundle {
            inputs,
            stage,
            output,
        } => cmd_bundle(&config, &inputs, &stage, &output).await,

        Commands::Serve { port, data_dir } => cmd_serve(config, port, data_dir).await,
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_parse(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing: {}", input.display());

    let name = file_name(input);
    let kind = FileKind::from_filename(&name)
        .ok_or_else(|| format!("Unsupported file extension: {}", name))?;
    let bytes = fs::read(input)?;
    let table = parse_bytes(&bytes, kind)?;

    eprintln!("   Columns: {}", table.columns().join(", "));
    eprintln!("✅ Parsed {} rows", table.row_count());

    let summary = ParseSummary::of(&table, Role::Unclassified);
    let json = serde_json::to_string_pretty(&summary)?;
    write_output(json.as_bytes(), output)?;

    Ok(())
}

async fn cmd_stage(
    config: &Config,
    inputs: &[PathBuf],
    stage: &str,
    format: &str,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let encoding: Encoding = format.parse()?;
    let batch = load_batch(config, inputs).await?;

    let result = compute_named(&batch.roles, stage)?;
    eprintln!(
        "   Stage {}: {} → {} rows",
        result.stage,
        result.before.row_count(),
        result.after.row_count()
    );
    if let Some(rate) = result.match_rate {
        eprintln!("   Match rate: {:.1}%", rate);
    }
    for warning in &result.warnings {
        eprintln!("   ⚠️  {}", warning.message);
    }

    let bytes = serialize(&result.after, encoding)?;
    write_output(&bytes, output)?;

    Ok(())
}

async fn cmd_bundle(
    config: &Config,
    inputs: &[PathBuf],
    stage: &str,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let batch = load_batch(config, inputs).await?;

    let result = compute_named(&batch.roles, stage)?;
    let bytes = bundle_stage(&batch.roles, &result, chrono::Utc::now())?;
    write_output(&bytes, Some(output))?;

    Ok(())
}

async fn cmd_serve(
    mut config: Config,
    port: u16,
    data_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    salesdiff::server::start_server(config, port).await
}

/// Read and ingest files in the order given; per-file failures are reported
/// but do not stop the command.
async fn load_batch(config: &Config, inputs: &[PathBuf]) -> Result<Batch, Box<dyn std::error::Error>> {
    let mut uploads = Vec::with_capacity(inputs.len());
    for path in inputs {
        uploads.push(Upload::new(file_name(path), fs::read(path)?));
    }

    let batch = ingest(uploads, config.parse_timeout).await;
    for report in &batch.reports {
        if let Some(error) = report.error() {
            eprintln!("   ❌ {}: {} ({})", report.original_name, error.message, error.kind);
        }
    }
    Ok(batch)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn write_output(content: &[u8], path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(content)?;
        }
    }
    Ok(())
}
