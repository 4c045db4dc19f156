//! mercurio CLI - send files over the network with a pool of rsync workers

use clap::Parser;
use mercurio::config::{default_authorized_keys, parse_remote_path, CliArgs, Commands, LogFormat, OutputFormat, PoolConfig};
use mercurio::core::{detect_rsync, RsyncStatus, WorkerPool};
use mercurio::error::{MercurioError, Result};
use mercurio::fs::PathEnumerator;
use mercurio::keys::{AuthorizedKeys, DestinationTemplate, KeySelector, PublicKey};
use mercurio::progress::ProgressReporter;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    init_logging(args.verbose, args.log_format);

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// Install the subscriber; RUST_LOG wins over -v
fn init_logging(verbose: u8, format: LogFormat) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(args: CliArgs) -> Result<()> {
    let authorized_keys = args.authorized_keys.clone().unwrap_or_else(default_authorized_keys);

    match &args.command {
        command @ Commands::Send {
            paths,
            destination,
            progress,
            output_format,
            ..
        } => {
            let config = PoolConfig::from_send_args(command).map_err(MercurioError::ConfigError)?;
            cmd_send(paths, destination, config, *progress, *output_format)
        }
        Commands::Authorize {
            key_file,
            destdir,
            owner,
        } => cmd_authorize(&authorized_keys, key_file, destdir, owner.as_deref()),
        Commands::Revoke { key_file, owner } => {
            let selector = match (key_file, owner) {
                (Some(key_file), _) => KeySelector::Key(PublicKey::from_file(key_file)?),
                (None, Some(owner)) => KeySelector::Owner(owner.clone()),
                (None, None) => return Err(MercurioError::config("either --key-file or --owner is required")),
            };
            cmd_revoke(&authorized_keys, &selector)
        }
    }
}

fn cmd_send(
    paths: &[String],
    destination: &str,
    config: PoolConfig,
    show_progress: bool,
    output_format: OutputFormat,
) -> Result<()> {
    match detect_rsync(&config.tool.program) {
        RsyncStatus::Available => {}
        RsyncStatus::NotInstalled => {
            return Err(MercurioError::config(format!("'{}' was not found", config.tool.program)));
        }
        RsyncStatus::ValidationFailed => {
            tracing::warn!("'{}' does not look like rsync", config.tool.program);
        }
    }

    match parse_remote_path(destination) {
        Some((user, host, path)) => tracing::info!("sending to '{}' on {} as {}", path, host, user),
        None => tracing::info!("sending to '{}'", destination),
    }

    let enumerator = PathEnumerator::with_config(paths, config.enumerator.clone());
    let mut pool = WorkerPool::new(enumerator, destination, config);
    if show_progress {
        pool = pool.with_progress(ProgressReporter::new());
    }

    let summary = pool.run()?;

    match output_format {
        OutputFormat::Text => summary.print_summary(),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }

    Ok(())
}

fn cmd_authorize(authorized_keys: &Path, key_file: &Path, destdir: &str, owner: Option<&str>) -> Result<()> {
    let public_key = PublicKey::from_file(key_file)?;
    let template = DestinationTemplate::new(destdir);

    let authorization = AuthorizedKeys::new(authorized_keys).authorize(public_key, &template, owner)?;

    if authorization.owner_guessed {
        if let Some(owner) = &authorization.entry.public_key.owner {
            println!("Guessed the owner of the key: {}", owner);
        }
    }
    println!("Authorized {} to use '{}'", authorization.entry.public_key, authorization.destdir);

    Ok(())
}

fn cmd_revoke(authorized_keys: &Path, selector: &KeySelector) -> Result<()> {
    let revocation = AuthorizedKeys::new(authorized_keys).revoke(selector)?;

    if revocation.revoked.is_empty() {
        println!("No matching key found");
        return Ok(());
    }

    println!("Revoked {} key(s):", revocation.revoked.len());
    for entry in &revocation.revoked {
        println!("{}", entry);
    }
    if let Some(backup) = &revocation.backup {
        println!("Previous file saved as {}", backup.display());
    }

    Ok(())
}
