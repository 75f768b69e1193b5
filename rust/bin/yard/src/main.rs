//! `yard`: operator CLI over a local, offline-first inventory store.
//!
//! Inspects and edits platforms, pushes pending changes to the server,
//! and runs integrity and recovery passes.

mod commands;
mod config;

use clap::{Parser, Subcommand};

use commands::Settings;

/// Yard inventory CLI.
#[derive(Parser, Debug)]
#[command(name = "yard", about = "Offline-first inventory CLI")]
struct Cli {
    /// Path to client config file (default: ~/.yard/config.toml).
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Output format: table or json.
    #[arg(long = "output", short = 'o', global = true, default_value = "table")]
    output: String,

    // The overrides below go before the subcommand: `yard --user bob list`.
    /// Override the context's data directory.
    #[arg(long = "data-dir")]
    data_dir: Option<String>,

    /// Override the context's server URL.
    #[arg(long = "server")]
    server: Option<String>,

    /// Override the context's user.
    #[arg(long = "user")]
    user: Option<String>,

    /// Byte budget for the primary store.
    #[arg(long = "quota")]
    quota: Option<u64>,

    /// Never contact the server.
    #[arg(long = "offline")]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage contexts.
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },

    /// Switch the current context.
    Use { name: String },

    /// Show sync status.
    Status,

    /// List platforms.
    List,

    /// Show one platform with its pieces.
    Show { id: String },

    /// Create a platform.
    Create {
        /// JSON body.
        #[arg(long = "json")]
        json_body: Option<String>,
        /// Read JSON from file.
        #[arg(short = 'f', long = "file")]
        file: Option<String>,
    },

    /// Update a platform (partial JSON).
    Update {
        id: String,
        #[arg(long = "json")]
        json_body: String,
    },

    /// Add pieces to a platform.
    AddPiece {
        id: String,
        /// One or more lengths.
        #[arg(required = true)]
        lengths: Vec<f64>,
        #[arg(long)]
        material: Option<String>,
    },

    /// Remove a piece from a platform.
    DeletePiece { id: String, piece_id: String },

    /// Change a platform's standard width.
    Width { id: String, width: f64 },

    /// Delete a platform.
    Delete {
        id: String,
        /// Skip confirmation.
        #[arg(long = "yes", short = 'y')]
        yes: bool,
    },

    /// Push every platform flagged for sync.
    Sync,

    /// Fetch platforms from the server that are missing locally.
    Pull,

    /// Check stored data for integrity problems.
    Verify,

    /// Fix every integrity problem that has a safe default.
    Repair,

    /// Fold emergency records back into the primary store.
    Recover,

    /// Show version.
    Version,
}

#[derive(Subcommand, Debug)]
enum ContextAction {
    /// Create a new context.
    Create {
        name: String,
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        user: Option<String>,
        /// Data directory (default: ~/.yard/data/<name>).
        #[arg(long)]
        data_dir: Option<String>,
    },
    /// List all contexts.
    List,
    /// Set properties on a context.
    Set {
        name: String,
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        token: Option<String>,
    },
    /// Delete a context.
    Delete { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(config::ClientConfig::default_path);

    let mut overrides = Vec::new();
    if let Some(dir) = &cli.data_dir {
        overrides.push(format!("--data-dir={}", dir));
    }
    if let Some(server) = &cli.server {
        overrides.push(format!("--server={}", server));
    }
    if let Some(user) = &cli.user {
        overrides.push(format!("--user={}", user));
    }
    if let Some(quota) = cli.quota {
        overrides.push(format!("--quota={}", quota));
    }
    let json = cli.output == "json";
    let open = || -> anyhow::Result<yard_inventory::InventoryEngine> {
        let settings = Settings::resolve(&config_path, &overrides, cli.offline)?;
        commands::open_engine(&settings)
    };

    match cli.command {
        Commands::Context { action } => match action {
            ContextAction::Create {
                name,
                server,
                user,
                data_dir,
            } => {
                commands::context::create(
                    &name,
                    server.as_deref(),
                    user.as_deref(),
                    data_dir.as_deref(),
                    &config_path,
                )?;
            }
            ContextAction::List => commands::context::list(&config_path)?,
            ContextAction::Set {
                name,
                server,
                user,
                token,
            } => {
                commands::context::set(
                    &name,
                    server.as_deref(),
                    user.as_deref(),
                    token.as_deref(),
                    &config_path,
                )?;
            }
            ContextAction::Delete { name } => commands::context::delete(&name, &config_path)?,
        },

        Commands::Use { name } => commands::context::use_context(&name, &config_path)?,

        Commands::Status => commands::maintenance::status(&open()?, json)?,
        Commands::List => commands::platform::list(&open()?, json)?,
        Commands::Show { id } => commands::platform::show(&open()?, &id, json)?,

        Commands::Create { json_body, file } => {
            let body = if let Some(path) = file {
                std::fs::read_to_string(&path)?
            } else if let Some(body) = json_body {
                body
            } else {
                anyhow::bail!("Provide --json or -f <file>.");
            };
            commands::platform::create(&open()?, &body).await?;
        }

        Commands::Update { id, json_body } => {
            commands::platform::update(&open()?, &id, &json_body).await?;
        }

        Commands::AddPiece {
            id,
            lengths,
            material,
        } => {
            commands::platform::add_pieces(&open()?, &id, &lengths, material.as_deref()).await?;
        }

        Commands::DeletePiece { id, piece_id } => {
            commands::platform::delete_piece(&open()?, &id, &piece_id).await?;
        }

        Commands::Width { id, width } => {
            commands::platform::set_width(&open()?, &id, width).await?;
        }

        Commands::Delete { id, yes } => {
            if !yes {
                eprint!("Are you sure? [y/N]: ");
                let mut s = String::new();
                std::io::stdin().read_line(&mut s)?;
                if !s.trim().eq_ignore_ascii_case("y") {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            commands::platform::delete(&open()?, &id).await?;
        }

        Commands::Sync => commands::maintenance::sync(&open()?).await?,
        Commands::Pull => commands::maintenance::pull(&open()?).await?,
        Commands::Verify => commands::maintenance::verify(&open()?)?,
        Commands::Repair => commands::maintenance::repair(&open()?)?,
        Commands::Recover => commands::maintenance::recover(&open()?)?,

        Commands::Version => {
            println!("yard cli v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
