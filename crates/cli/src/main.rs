//! `droplab-pm` — plugin manager CLI for the DropLab suite.
//!
//! Thin wrapper over [`droplab_plugins::PluginManager`]; each subcommand
//! maps 1:1 onto a manager operation. Logs go to stderr so stdout stays
//! machine-readable.

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::error,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    droplab_config::Layout,
    droplab_plugins::{Error, PluginManager},
};

#[derive(Parser)]
#[command(name = "droplab-pm", about = "DropLab plugin manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Conda prefix override (default: $DROPLAB_PREFIX, then $CONDA_PREFIX).
    #[arg(long, global = true, env = "DROPLAB_PREFIX")]
    prefix: Option<PathBuf>,

    /// Print lists as JSON arrays instead of one name per line.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install plugin packages (version specs allowed).
    Install {
        /// Package names, e.g. droplab.dropgen.
        #[arg(required = true)]
        packages: Vec<String>,
        /// Conda channels to search, in priority order.
        #[arg(short, long)]
        channel: Vec<String>,
    },
    /// Uninstall plugin packages.
    Uninstall {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Enable installed plugins by directory name.
    Enable {
        #[arg(required = true)]
        plugins: Vec<String>,
    },
    /// Disable enabled plugins.
    Disable {
        #[arg(required = true)]
        plugins: Vec<String>,
    },
    /// Update installed plugins (all of them when none are named).
    Update {
        packages: Vec<String>,
        #[arg(short, long)]
        channel: Vec<String>,
    },
    /// Roll the environment back to the revision before the last action.
    Rollback {
        #[arg(short, long)]
        channel: Vec<String>,
    },
    /// List installed plugins.
    List,
    /// List enabled plugins.
    Enabled {
        /// Include dev-mode entries and plugins unknown to conda.
        #[arg(long)]
        all: bool,
    },
    /// Query the channels for available plugin packages.
    Search,
    /// Print installed plugins in requirements format.
    Freeze,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let layout = match &cli.prefix {
        Some(prefix) => Layout::new(prefix.clone()),
        None => Layout::from_env()?,
    };
    let manager = PluginManager::new(layout);

    match &cli.command {
        Commands::Install { packages, channel } => {
            // Best-effort batch: one bad package does not block the rest.
            for package in packages {
                match manager.install(&[package.clone()], some_channels(channel), &[]) {
                    Ok(log) => report_install(package, &log),
                    Err(e) => error!(%package, %e, "install failed"),
                }
            }
        },
        Commands::Uninstall { packages } => {
            for package in packages {
                match manager.uninstall(&[package.clone()], &[]) {
                    Ok(_) => println!("Uninstalled {package}"),
                    Err(e @ Error::PluginNotFound { .. }) => error!(%e, "skipping"),
                    Err(e) => return Err(e.into()),
                }
            }
        },
        Commands::Enable { plugins } => {
            let enabled_now = manager.enable(plugins)?;
            // Report only the plugins this call actually enabled.
            let newly: Vec<String> = enabled_now
                .into_iter()
                .filter_map(|(name, fresh)| fresh.then_some(name))
                .collect();
            dump_list(&newly, cli.json);
        },
        Commands::Disable { plugins } => match manager.disable(plugins) {
            Ok(()) => {
                let mut sorted = plugins.clone();
                sorted.sort();
                dump_list(&sorted, cli.json);
            },
            Err(e @ Error::PluginNotFound { .. }) => {
                // At least one plugin was missing; nothing was disabled.
                error!(%e, "disable failed");
                dump_list(&[], cli.json);
            },
            Err(e) => return Err(e.into()),
        },
        Commands::Update { packages, channel } => {
            let names = (!packages.is_empty()).then_some(packages.as_slice());
            let log = manager.update(names, some_channels(channel), &[])?;
            report_update(&log);
        },
        Commands::Rollback { channel } => {
            let (revision, log) = manager.rollback(some_channels(channel), &[])?;
            match log {
                Some(_) => println!("Rolled back to revision {revision}"),
                None => println!("Nothing to roll back (current revision {revision})"),
            }
        },
        Commands::List => {
            let names: Vec<String> = manager
                .installed_plugins()
                .iter()
                .map(|p| p.plugin_name.clone())
                .collect();
            dump_list(&names, cli.json);
        },
        Commands::Enabled { all } => {
            let names: Vec<String> = manager
                .enabled_plugins(!all)?
                .iter()
                .map(|p| p.plugin_name.clone())
                .collect();
            dump_list(&names, cli.json);
        },
        Commands::Search => {
            let packages = manager.available_packages();
            println!("{}", serde_json::to_string_pretty(&packages)?);
        },
        Commands::Freeze => {
            for plugin in manager.installed_plugins() {
                println!("{}=={}", plugin.package_name, plugin.version);
            }
        },
    }
    Ok(())
}

fn some_channels(channels: &[String]) -> Option<&[String]> {
    (!channels.is_empty()).then_some(channels)
}

/// One name per line for shell consumption, or a JSON array with `--json`.
fn dump_list(names: &[String], json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string(names).unwrap_or_else(|_| "[]".into())
        );
    } else {
        for name in names {
            println!("{name}");
        }
    }
}

fn report_install(package: &str, log: &serde_json::Value) {
    if log.get("actions").is_some() {
        println!("Installed {package}");
    } else {
        println!("{package} is already up to date");
    }
}

/// Surface what changed: conda's LINK list is the new versions, UNLINK the
/// replaced ones.
fn report_update(log: &serde_json::Value) {
    let actions = log.get("actions");
    match actions {
        Some(actions) => {
            for (label, key) in [("removed", "UNLINK"), ("installed", "LINK")] {
                if let Some(entries) = actions.get(key).and_then(|v| v.as_array()) {
                    for entry in entries {
                        println!("{label}: {}", render_dist(entry));
                    }
                }
            }
        },
        None => println!("All plugins are up to date"),
    }
}

/// conda renders dists either as strings ("droplab.dropgen-1.2.0-0") or
/// as objects with name/version fields.
fn render_dist(entry: &serde_json::Value) -> String {
    if let Some(s) = entry.as_str() {
        return s.to_string();
    }
    let name = entry.get("name").and_then(|v| v.as_str()).unwrap_or("?");
    let version = entry.get("version").and_then(|v| v.as_str()).unwrap_or("?");
    format!("{name}-{version}")
}
