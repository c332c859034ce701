//! leafdx server and CLI
//!
//! A binary for diagnosing leaf photographs via CLI or HTTP server.
//!
//! # Usage
//!
//! ## CLI Mode
//! ```bash
//! leafdx-server diagnose --file leaf.jpg --model models/mobilenetv2.onnx
//! leafdx-server diagnose --file leaf.jpg --report report.pdf --output json
//! leafdx-server check --model models/mobilenetv2.onnx
//! ```
//!
//! ## Server Mode
//! ```bash
//! leafdx-server serve --model models/mobilenetv2.onnx --history-db predictions.db --port 8080
//! ```

mod cli;
mod config;
mod diagnose;
mod server;

use clap::{Parser, Subcommand};
use config::{DEFAULT_MAX_UPLOAD_BYTES, PipelineArgs};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "leafdx-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Plant leaf disease diagnosis via CLI or HTTP server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diagnose a single image via CLI
    Diagnose {
        /// Local file path of the leaf image
        #[arg(long)]
        file: PathBuf,

        /// Also write a PDF report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Output format (json, pretty)
        #[arg(long, default_value = "pretty")]
        output: String,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, short, default_value = "8080", env = "LEAFDX_PORT")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0", env = "LEAFDX_HOST")]
        host: String,

        /// Directory for uploaded images
        #[arg(long = "upload-dir", default_value = "uploads", env = "LEAFDX_UPLOAD_DIR")]
        upload_dir: PathBuf,

        /// Directory to keep rendered reports in
        #[arg(long = "report-dir", env = "LEAFDX_REPORT_DIR")]
        report_dir: Option<PathBuf>,

        /// Maximum upload size in bytes
        #[arg(long = "max-upload-bytes", default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "LEAFDX_MAX_UPLOAD_BYTES")]
        max_upload_bytes: usize,

        /// Accepted file extensions
        #[arg(
            long = "allowed-extensions",
            value_delimiter = ',',
            default_value = "png,jpg,jpeg",
            env = "LEAFDX_ALLOWED_EXTENSIONS"
        )]
        allowed_extensions: Vec<String>,

        /// Delete uploads and kept reports older than this many hours (0 keeps them)
        #[arg(long = "retention-hours", default_value_t = 0, env = "LEAFDX_RETENTION_HOURS")]
        retention_hours: u64,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Verify that the model loads and matches the labels and knowledge table
    Check {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    leafdx::utils::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Diagnose {
            file,
            report,
            output,
            pipeline,
        } => {
            let config = pipeline.to_pipeline_config()?;
            info!("Processing file: {}", file.display());
            tokio::task::spawn_blocking(move || {
                cli::diagnose_file(&file, &config, report.as_deref(), &output)
            })
            .await??;
        }
        Commands::Serve {
            port,
            host,
            upload_dir,
            report_dir,
            max_upload_bytes,
            allowed_extensions,
            retention_hours,
            pipeline,
        } => {
            let config = config::ServerConfig {
                pipeline: pipeline.to_pipeline_config()?,
                host,
                port,
                upload_dir,
                report_dir,
                max_upload_bytes,
                allowed_extensions: allowed_extensions
                    .into_iter()
                    .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                    .filter(|ext| !ext.is_empty())
                    .collect(),
                retention: (retention_hours > 0)
                    .then(|| std::time::Duration::from_secs(retention_hours * 3600)),
            };

            info!("Starting server on {}:{}", config.host, config.port);
            server::run_server(config).await?;
        }
        Commands::Check { pipeline } => {
            let config = pipeline.to_pipeline_config()?;
            tokio::task::spawn_blocking(move || cli::check(&config)).await??;
        }
    }

    Ok(())
}
