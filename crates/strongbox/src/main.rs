use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strongbox_keychain::{Keychain, KeychainError, Registry, SecurityCli, WriteOptions};
use tracing_subscriber::EnvFilter;

mod config;

use config::StrongboxConfig;

/// Strongbox - secure notes in macOS keychains
#[derive(Parser, Debug)]
#[command(name = "strongbox")]
#[command(about = "Read and write secure notes stored in macOS keychains")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ~/.config/strongbox/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keychain to use, matched case-insensitively against keychain paths
    #[arg(short, long, global = true)]
    keychain: Option<String>,

    /// Unlock the keychain for the operation and lock it again afterwards
    #[arg(long, global = true)]
    unlock: bool,

    /// Log every invocation of the security utility
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List keychains on the search list
    List,

    /// Show the default keychain
    Default,

    /// Find a keychain by name
    Find {
        /// Case-insensitive part of the keychain path
        name: String,
    },

    /// Print the contents of a secure note
    Read {
        /// Label of the entry
        key: String,

        /// Print entry attributes and secret as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create or replace a secure note
    Write {
        /// Service name of the entry
        key: String,

        /// Note contents (read from stdin when omitted)
        data: Option<String>,

        /// Entry type
        #[arg(long = "type")]
        entry_type: Option<String>,

        /// Account name (default: empty)
        #[arg(long)]
        account: Option<String>,

        /// Service name (default: KEY)
        #[arg(long)]
        service: Option<String>,

        /// Label (default: the service name)
        #[arg(long)]
        label: Option<String>,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write a configuration file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the configuration file location
    Path,
}

/// Settings after layering command-line flags over the configuration file
struct Settings {
    config_path: PathBuf,
    config: StrongboxConfig,
    keychain: Option<String>,
    unlock: bool,
}

impl Settings {
    fn resolve(cli: &Cli) -> Result<Self> {
        let config_path = config_path(cli);
        let config = StrongboxConfig::load_or_default(&config_path)
            .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

        if let Err(errors) = config.validate() {
            anyhow::bail!(
                "Invalid configuration in {:?}:\n  {}",
                config_path,
                errors.join("\n  ")
            );
        }

        Ok(Self {
            keychain: cli.keychain.clone().or_else(|| config.keychain.clone()),
            unlock: cli.unlock || config.unlock,
            config_path,
            config,
        })
    }

    fn registry(&self) -> Registry {
        Registry::new(SecurityCli::new(&self.config.security_path))
    }

    /// Keychain named on the command line or in the config, else the default
    fn keychain(&self) -> Result<Keychain> {
        let registry = self.registry();
        match &self.keychain {
            Some(name) => Ok(registry.find(name)?),
            None => Ok(registry.default_keychain()?),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            // Lookup misses get their own exit code so scripts can branch on them.
            match e.downcast_ref::<KeychainError>() {
                Some(KeychainError::NotFound(_)) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "strongbox={default_level},strongbox_keychain={default_level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Configuration file named on the command line, else the default location
fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(StrongboxConfig::default_path)
}

fn run(cli: Cli) -> Result<()> {
    // Resolved per command: `config` must still work when the file is invalid.
    let settings = || Settings::resolve(&cli);

    match &cli.command {
        Commands::List => {
            for keychain in settings()?.registry().list()? {
                println!("{}\t{}", keychain.name(), keychain.path().display());
            }
            Ok(())
        }
        Commands::Default => {
            let keychain = settings()?.registry().default_keychain()?;
            println!("{}\t{}", keychain.name(), keychain.path().display());
            Ok(())
        }
        Commands::Find { name } => {
            let keychain = settings()?.registry().find(name)?;
            println!("{}\t{}", keychain.name(), keychain.path().display());
            Ok(())
        }
        Commands::Read { key, json } => run_read(&settings()?, key, *json),
        Commands::Write {
            key,
            data,
            entry_type,
            account,
            service,
            label,
        } => {
            let overrides = WriteOptions {
                entry_type: entry_type.clone(),
                account_name: account.clone(),
                service_name: service.clone(),
                label: label.clone(),
            };
            run_write(&settings()?, key, data.clone(), &overrides)
        }
        Commands::Config { action } => run_config(&config_path(&cli), action),
    }
}

fn run_read(settings: &Settings, key: &str, json: bool) -> Result<()> {
    let keychain = settings.keychain()?;
    tracing::debug!(keychain = %keychain, key, "Reading entry");

    let entry = if settings.unlock {
        keychain.with_open(|k| k.read(key))?
    } else {
        keychain.read(key)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!("{}", entry.secret_text());
    }
    Ok(())
}

fn run_write(
    settings: &Settings,
    key: &str,
    data: Option<String>,
    overrides: &WriteOptions,
) -> Result<()> {
    let data = match data {
        Some(data) => data,
        None => read_stdin().context("Failed to read note contents from stdin")?,
    };
    let options = settings.config.write.merge(overrides);
    let keychain = settings.keychain()?;

    if settings.unlock {
        keychain.with_open(|k| k.write(key, &data, &options))?;
    } else {
        keychain.write(key, &data, &options)?;
    }

    eprintln!("Saved \"{}\" to {}", key, keychain);
    Ok(())
}

fn run_config(config_path: &Path, action: &ConfigCommand) -> Result<()> {
    match action {
        ConfigCommand::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
        ConfigCommand::Init { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "Configuration already exists at {:?} (use --force to overwrite)",
                    config_path
                );
            }
            StrongboxConfig::default().save(config_path)?;
            println!("{}", config_path.display());
            Ok(())
        }
    }
}

/// Read all of stdin, dropping the single trailing newline `echo` adds
fn read_stdin() -> Result<String> {
    let mut data = String::new();
    std::io::stdin().read_to_string(&mut data)?;
    if data.ends_with('\n') {
        data.pop();
        if data.ends_with('\r') {
            data.pop();
        }
    }
    Ok(data)
}
