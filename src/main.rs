//! Metrics uplink CLI
//!
//! Entry point for the `metrics-uplink` command-line tool.

use clap::{Parser, Subcommand};
use metrics_uplink::{
    collect_files, Environment, FailureHook, MetricsUploader, SiteConfig, UploadConfig, UploadMode,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "metrics-uplink")]
#[command(about = "Metrics upload sidecar for build orchestration", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload the metrics files found beneath the given roots
    Upload {
        /// Root directories or files to collect metrics from
        #[arg(required = true)]
        roots: Vec<PathBuf>,

        /// Block until the uploader exits instead of detaching
        #[arg(long)]
        sync: bool,

        /// Treat reported upload failures as fatal (implies --sync)
        #[arg(long)]
        strict: bool,

        /// Path to a site config file supplying the uploader
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// List the metrics files that would be uploaded
    Collect {
        /// Root directories or files to collect metrics from
        #[arg(required = true)]
        roots: Vec<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Verify the upload configuration
    Verify {
        /// Path to a site config file supplying the uploader
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Upload {
            roots,
            sync,
            strict,
            config,
        } => {
            run_upload(roots, sync, strict, config);
        }
        Commands::Collect { roots, json } => {
            run_collect(roots, json);
        }
        Commands::Verify { config } => {
            run_verify(config);
        }
    }
}

fn load_config(config_path: Option<PathBuf>) -> UploadConfig {
    let mut config = UploadConfig::from_environment(Environment::from_process());
    if let Some(path) = config_path {
        match SiteConfig::from_file(&path) {
            Ok(site) => config = config.with_site_config(&site),
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                process::exit(1);
            }
        }
    }
    config
}

fn run_upload(roots: Vec<PathBuf>, sync: bool, strict: bool, config_path: Option<PathBuf>) {
    let config = load_config(config_path);
    if !config.is_enabled() {
        eprintln!("[metrics-upload] no uploader configured, nothing to do");
        return;
    }

    let hook = Arc::new(FailureHook::logging());
    let uploader = MetricsUploader::new(config).with_failure_hook(Arc::clone(&hook));

    let mode = if sync || strict {
        UploadMode::Synchronous
    } else {
        UploadMode::Detached
    };
    uploader.upload(&roots, mode);

    if strict && hook.has_failures() {
        process::exit(1);
    }
}

fn run_collect(roots: Vec<PathBuf>, json: bool) {
    let outcome = collect_files(&roots);
    for err in &outcome.errors {
        eprintln!("[metrics-upload] {}", err);
    }

    if json {
        let files: Vec<String> = outcome
            .files
            .iter()
            .map(|f| f.display().to_string())
            .collect();
        match serde_json::to_string_pretty(&files) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        for file in &outcome.files {
            println!("{}", file.display());
        }
    }
}

fn run_verify(config_path: Option<PathBuf>) {
    let config = load_config(config_path);

    if !config.is_enabled() {
        println!("Metrics upload disabled (no uploader configured)");
        return;
    }

    let uploader = Path::new(config.uploader());
    if !uploader.exists() {
        eprintln!("Uploader not found: {}", uploader.display());
        process::exit(1);
    }

    println!("Configuration valid");
    println!();
    println!("  Uploader: {}", uploader.display());
    println!("  Output dir: {}", config.out_dir().display());
    if !config.build_timestamp().is_empty() {
        println!("  Build timestamp: {}", config.build_timestamp());
    }
}
