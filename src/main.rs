// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::Level;

use modelfetch::catalog::Catalog;
use modelfetch::config::Config;
use modelfetch::download::{DownloadManager, ManagerSnapshot, ModelStatus};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// Success - every requested model was downloaded
    pub const SUCCESS: i32 = 0;
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// I/O error - a download ended in error
    pub const IO_ERR: i32 = 74;
    /// Configuration error - unknown model, unreadable config or catalog
    pub const CONFIG: i32 = 78;
    /// Interrupted with Ctrl+C
    pub const INTERRUPTED: i32 = 130;
}

use exit_codes::*;

/// modelfetch - download local inference models one at a time
#[derive(Parser)]
#[command(name = "modelfetch")]
#[command(version = VERSION)]
#[command(about = "Queued model downloads for local inference.")]
#[command(long_about = "modelfetch - queued model downloads\n\n\
    List models:        modelfetch list\n\
    Download models:    modelfetch download Gemma3-4B-Q4 KeyBert\n\
    Set a token:        modelfetch token set hf_xxx\n\
    Configure:          modelfetch config show")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode: warnings and errors only, no progress bars
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog models with their size and install status
    ///
    /// Example:
    ///   modelfetch list
    #[command(alias = "ls")]
    List,

    /// Download one or more models, in the order given
    ///
    /// Models past the first wait in the queue. Ctrl+C stops the active
    /// download and drops the rest.
    ///
    /// Example:
    ///   modelfetch download Gemma3-4B-Q4 KeyBert
    #[command(alias = "dl")]
    Download {
        /// Catalog model names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// View or change configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },

    /// Manage the bearer token sent to the model host
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set the directory finished models are moved into
    ///
    /// Example:
    ///   modelfetch config set-models-path ~/models
    SetModelsPath { path: PathBuf },

    /// Set the root for per-download staging directories
    ///
    /// Must be on the same filesystem as the models directory.
    SetStagingPath { path: PathBuf },

    /// Use a JSON catalog instead of the built-in model list
    SetCatalog { path: PathBuf },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Persist a token (the HF_TOKEN environment variable still wins)
    Set { token: String },

    /// Remove the persisted token
    Clear,
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{}...", prefix)
}

fn handle_config(command: Option<ConfigCommands>) -> Result<()> {
    let mut config = Config::load()?;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("{}", "=== modelfetch configuration ===".bright_cyan().bold());
            println!();
            println!("  Models path:    {}", config.models_dir().display());
            println!("  Staging path:   {}", config.staging_dir().display());
            let catalog = config
                .catalog_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(built-in)".dimmed().to_string());
            println!("  Catalog:        {}", catalog);
            let token = config
                .hf_token
                .as_deref()
                .map(mask_token)
                .unwrap_or_else(|| "(not set)".dimmed().to_string());
            println!("  Token:          {}", token);
            if std::env::var_os(modelfetch::credentials::HF_TOKEN_ENV).is_some() {
                println!("  {}", "HF_TOKEN is set and overrides the stored token".yellow());
            }
            println!();
            println!("Config file: {}", Config::default_path()?.display());
            println!();
        }
        Some(ConfigCommands::SetModelsPath { path }) => {
            config.models_path = Some(path.clone());
            config.save()?;
            println!("{} Models path set to: {}", "[✓]".green(), path.display());
        }
        Some(ConfigCommands::SetStagingPath { path }) => {
            config.staging_path = Some(path.clone());
            config.save()?;
            println!("{} Staging path set to: {}", "[✓]".green(), path.display());
        }
        Some(ConfigCommands::SetCatalog { path }) => {
            let catalog = match Catalog::load(&path) {
                Ok(catalog) => catalog,
                Err(e) => {
                    eprintln!("{} Invalid catalog {}: {}", "[!]".red(), path.display(), e);
                    std::process::exit(CONFIG);
                }
            };
            config.catalog_path = Some(path.clone());
            config.save()?;
            println!(
                "{} Catalog set to: {} ({} models)",
                "[✓]".green(),
                path.display(),
                catalog.len()
            );
        }
    }
    Ok(())
}

fn handle_token(command: TokenCommands) -> Result<()> {
    let mut config = Config::load()?;
    match command {
        TokenCommands::Set { token } => {
            let token = token.trim().to_string();
            if token.is_empty() {
                eprintln!("{} Token must not be empty", "[!]".red());
                std::process::exit(CONFIG);
            }
            config.hf_token = Some(token);
            config.save()?;
            println!("{} Token saved", "[✓]".green());
        }
        TokenCommands::Clear => {
            config.hf_token = None;
            config.save()?;
            println!("{} Token cleared", "[✓]".green());
        }
    }
    Ok(())
}

fn build_manager(config: &Config) -> Result<DownloadManager> {
    let catalog = config.catalog()?;
    let manager = DownloadManager::new(
        catalog,
        config.download_settings(),
        Arc::new(config.credentials()),
    )
    .context("Failed to start download manager")?;
    Ok(manager)
}

/// Build the manager, reporting a bad catalog the way a bad config is reported.
fn manager_or_exit(config: &Config) -> DownloadManager {
    match build_manager(config) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("{} {:#}", "[!]".red(), e);
            std::process::exit(CONFIG);
        }
    }
}

fn status_label(status: ModelStatus) -> colored::ColoredString {
    match status {
        ModelStatus::Downloaded => "installed".green(),
        ModelStatus::Downloading => "downloading".cyan(),
        ModelStatus::Queued => "queued".cyan(),
        ModelStatus::Paused => "paused".yellow(),
        ModelStatus::Error => "error".red(),
        ModelStatus::NotDownloaded => "not installed".dimmed(),
    }
}

async fn list_models(config: &Config) -> Result<()> {
    let manager = manager_or_exit(config);
    manager.sync_installed().await;

    println!();
    println!("{}", "=== Models ===".bright_cyan().bold());
    println!();
    for model in manager.snapshots() {
        println!(
            "  {:<24} {:>10}   {}",
            model.name.bold(),
            model.display_size,
            status_label(model.status)
        );
    }
    println!();
    println!("Models path: {}", manager.models_dir().display());
    println!();
    Ok(())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:<24} [{bar:40.cyan/blue}] {pos:>3}% | {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

/// Move each bar to its model's state. Returns true once every requested
/// model has settled.
fn render(snapshot: &ManagerSnapshot, bars: &HashMap<String, ProgressBar>) -> bool {
    let mut settled = true;
    for (name, bar) in bars {
        if bar.is_finished() {
            continue;
        }
        let Some(model) = snapshot.model(name) else {
            continue;
        };
        bar.set_position(model.progress as u64);
        match model.status {
            ModelStatus::Queued => {
                let position = snapshot.queue_position(name).map_or(0, |p| p + 1);
                bar.set_message(format!("queued (#{})", position));
                settled = false;
            }
            ModelStatus::Downloading => {
                bar.set_message("downloading");
                settled = false;
            }
            ModelStatus::Downloaded => bar.finish_with_message("done".green().to_string()),
            ModelStatus::Error => {
                let error = model.error.clone().unwrap_or_else(|| "failed".to_string());
                bar.abandon_with_message(error.red().to_string());
            }
            ModelStatus::Paused => bar.abandon_with_message("paused".yellow().to_string()),
            ModelStatus::NotDownloaded => bar.abandon_with_message("stopped".yellow().to_string()),
        }
    }
    settled
}

async fn download_models(config: &Config, names: Vec<String>, quiet: bool) -> Result<i32> {
    let manager = manager_or_exit(config);

    let unknown: Vec<&String> = names.iter().filter(|n| !manager.contains(n)).collect();
    if !unknown.is_empty() {
        for name in unknown {
            eprintln!("{} Unknown model: {}", "[!]".red(), name);
        }
        eprintln!("    Run `modelfetch list` to see available models.");
        return Ok(CONFIG);
    }

    manager.sync_installed().await;

    let progress = if quiet {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    } else {
        MultiProgress::new()
    };
    let mut bars = HashMap::new();
    for name in &names {
        if bars.contains_key(name) {
            continue;
        }
        if manager.status(name) == Some(ModelStatus::Downloaded) {
            if !quiet {
                println!("  {} {} already downloaded", "[✓]".green(), name);
            }
            continue;
        }
        let bar = progress.add(ProgressBar::new(100));
        bar.set_style(bar_style());
        bar.set_prefix(name.clone());
        bars.insert(name.clone(), bar);
    }

    let mut updates = manager.subscribe();
    for name in &names {
        if bars.contains_key(name) {
            manager.download_model(name);
        }
    }

    let mut interrupted = false;
    loop {
        let snapshot = updates.borrow_and_update().clone();
        if render(&snapshot, &bars) {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                manager.shutdown().await;
                render(&manager.state(), &bars);
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    if interrupted {
        eprintln!("{} Interrupted, downloads stopped", "[!]".yellow());
        return Ok(INTERRUPTED);
    }

    let failed: Vec<String> = manager
        .snapshots()
        .into_iter()
        .filter(|m| bars.contains_key(&m.name) && m.status == ModelStatus::Error)
        .map(|m| m.name)
        .collect();
    if failed.is_empty() {
        if !quiet {
            println!(
                "{} Models are in {}",
                "[✓]".green(),
                manager.models_dir().display()
            );
        }
        Ok(SUCCESS)
    } else {
        eprintln!("{} Failed: {}", "[X]".red(), failed.join(", "));
        Ok(IO_ERR)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let quiet = cli.quiet;
    let needs_runtime = matches!(cli.command, Commands::List | Commands::Download { .. });

    if !needs_runtime {
        let result = match cli.command {
            Commands::Config { command } => handle_config(command),
            Commands::Token { command } => handle_token(command),
            _ => Ok(()),
        };
        if let Err(e) = result {
            eprintln!("{} {:#}", "[!]".red(), e);
            std::process::exit(CONFIG);
        }
        return Ok(());
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "[!]".red(), e);
            std::process::exit(CONFIG);
        }
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let code = runtime.block_on(async {
        match cli.command {
            Commands::List => list_models(&config).await.map(|_| SUCCESS),
            Commands::Download { names } => download_models(&config, names, quiet).await,
            _ => Ok(SUCCESS),
        }
    });

    match code {
        Ok(SUCCESS) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "[!]".red(), e);
            std::process::exit(ERROR);
        }
    }
}
