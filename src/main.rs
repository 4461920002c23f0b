use clap::{Args, Parser, Subcommand};
use graph_chat_export::auth::{
    CachedTokenProvider, CommandTokenSource, FileTokenSource, StaticTokenSource, TokenProvider,
};
use graph_chat_export::{
    ChatExporter, Config, Error, ExportMode, Result, list_available_exports, run_with_shutdown,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Export private chats and their attachments from Microsoft Graph.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file; command line options override it
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Graph API base URL
    #[arg(long, env = "GRAPH_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Directory for export files and attachments
    #[arg(long, env = "OUTPUT_DIR", value_name = "DIR", global = true)]
    output_dir: Option<PathBuf>,

    #[command(flatten)]
    token: TokenArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct TokenArgs {
    /// Access token (static; cannot be refreshed)
    #[arg(long, env = "GRAPH_ACCESS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// File holding the access token, re-read on every refresh
    #[arg(long, env = "GRAPH_TOKEN_FILE", value_name = "PATH", global = true)]
    token_file: Option<PathBuf>,

    /// Command printing an access token, run on every refresh
    #[arg(long, env = "GRAPH_TOKEN_COMMAND", value_name = "CMD", global = true)]
    token_command: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Check the credentials and show the signed-in user
    Whoami,

    /// Export chats (and, unless disabled, their attachments)
    Export {
        /// `test` exports the first chat only
        #[arg(long, env = "MODE")]
        mode: Option<ExportMode>,

        /// Export at most this many chats
        #[arg(long, value_name = "N")]
        max_chats: Option<usize>,

        /// Download attachments while exporting
        #[arg(
            long,
            env = "EXPORT_ATTACHMENTS",
            value_name = "BOOL",
            value_parser = clap::builder::BoolishValueParser::new()
        )]
        attachments: Option<bool>,

        /// Concurrent attachment downloads per chat
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
    },

    /// Download the attachments referenced by an earlier export
    Attachments {
        /// Export file to read (default: the newest one in the output directory)
        #[arg(long, value_name = "PATH")]
        from: Option<PathBuf>,

        /// Only list the available export files
        #[arg(long)]
        list: bool,

        /// Concurrent attachment downloads per chat
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.code(), error = %e, "Failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_ref())?;
    if let Some(endpoint) = cli.endpoint {
        config.graph.endpoint = endpoint;
    }
    if let Some(output_dir) = cli.output_dir {
        config.export.output_dir = output_dir;
    }

    match cli.command {
        Command::Whoami => {
            let exporter = ChatExporter::new(config, token_provider(&cli.token)?)?;
            let me = exporter.test_connection().await?;
            println!("{} <{}>", me.display_name, me.user_principal_name);
        }
        Command::Export {
            mode,
            max_chats,
            attachments,
            concurrency,
        } => {
            if let Some(mode) = mode {
                config.export.mode = mode;
            }
            if max_chats.is_some() {
                config.export.max_chats = max_chats;
            }
            if let Some(attachments) = attachments {
                config.export.download_attachments = attachments;
            }
            if let Some(concurrency) = concurrency {
                config.export.max_concurrent_downloads = concurrency;
            }

            let exporter = ChatExporter::new(config, token_provider(&cli.token)?)?;
            let summary =
                run_with_shutdown(exporter.cancellation_token(), exporter.export_all()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Attachments {
            from,
            list,
            concurrency,
        } => {
            let available = list_available_exports(&config.export.output_dir).await?;
            if list {
                for path in &available {
                    println!("{}", path.display());
                }
                return Ok(());
            }

            let export_file = match from.or_else(|| available.into_iter().next()) {
                Some(path) => path,
                None => {
                    return Err(Error::Other(format!(
                        "no export files found in '{}'; run `export` first or pass --from",
                        config.export.output_dir.display()
                    )));
                }
            };
            if let Some(concurrency) = concurrency {
                config.export.max_concurrent_downloads = concurrency;
            }

            let exporter = ChatExporter::new(config, token_provider(&cli.token)?)?;
            let tally = run_with_shutdown(
                exporter.cancellation_token(),
                exporter.download_from_export(&export_file),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&tally)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let raw = std::fs::read(path).map_err(|e| {
        Error::config(
            "config",
            format!("failed to read '{}': {}", path.display(), e),
        )
    })?;
    serde_json::from_slice(&raw).map_err(|e| {
        Error::config(
            "config",
            format!("failed to parse '{}': {}", path.display(), e),
        )
    })
}

/// Refreshable sources win over a static token
fn token_provider(args: &TokenArgs) -> Result<Arc<dyn TokenProvider>> {
    if let Some(command) = &args.token_command {
        return Ok(Arc::new(CachedTokenProvider::new(CommandTokenSource::new(
            command.clone(),
        ))));
    }
    if let Some(path) = &args.token_file {
        return Ok(Arc::new(CachedTokenProvider::new(FileTokenSource::new(
            path.clone(),
        ))));
    }
    if let Some(token) = &args.token {
        return Ok(Arc::new(CachedTokenProvider::new(StaticTokenSource::new(
            token.clone(),
        ))));
    }
    Err(Error::config(
        "token",
        "no credentials: set GRAPH_TOKEN_COMMAND, GRAPH_TOKEN_FILE or GRAPH_ACCESS_TOKEN",
    ))
}
