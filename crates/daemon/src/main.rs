//! Filegate Daemon
//!
//! Admin CLI that serves file operations over the configured directory
//! mappings, through the same router remote clients use.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::protocol::messages::{
    CopyRequest, DeleteRequest, ExportChunkRequest, ExportRequest, ListRequest, MkdirRequest,
    MoveRequest, QuotaRequest, ReadRequest, StatRequest, UploadRequest,
};
use daemon::protocol::{format_size, Envelope, FileRecord, Message};
use daemon::RequestRouter;

/// Filegate Daemon - virtual directory mapping with scoped tokens and quotas.
#[derive(Parser, Debug)]
#[command(name = "filegate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Access token restricting the request to the directories it grants
    #[arg(long, global = true, env = "FILEGATE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Validate the configuration and print the mappings
    Check,
    /// List a virtual directory
    Ls {
        /// Virtual path
        #[arg(default_value = "/")]
        path: String,
        /// Include dot files
        #[arg(long, short)]
        all: bool,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Show metadata for a path
    Stat {
        /// Virtual path
        path: String,
    },
    /// Write a file's contents to stdout
    Cat {
        /// Virtual path
        path: String,
    },
    /// Upload a local file into a virtual directory
    Put {
        /// Local file to upload
        file: PathBuf,
        /// Virtual destination directory
        directory: String,
        /// Name to store the file under (defaults to the local name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Create a directory
    Mkdir {
        /// Virtual path
        path: String,
    },
    /// Delete a file or directory tree
    Rm {
        /// Virtual path
        path: String,
    },
    /// Move or rename a path
    Mv {
        /// Virtual source path
        source: String,
        /// Virtual destination path
        destination: String,
    },
    /// Copy a file or directory tree
    Cp {
        /// Virtual source path
        source: String,
        /// Virtual destination path
        destination: String,
    },
    /// Show quota usage
    Quota,
    /// Export paths into a zip archive
    Zip {
        /// Virtual paths to include
        #[arg(required = true)]
        paths: Vec<String>,
        /// Output archive
        #[arg(long, short, default_value = "export.zip")]
        output: PathBuf,
    },
}

/// Sends messages to the router as a remote client would.
struct Session {
    router: RequestRouter,
    token: Option<String>,
    sequence: u64,
}

impl Session {
    async fn call(&mut self, message: Message) -> anyhow::Result<Message> {
        self.sequence += 1;
        let mut envelope = Envelope::new(self.sequence, message);
        if let Some(token) = &self.token {
            envelope = envelope.with_bearer(token);
        }

        match self.router.handle(envelope).await.map(|reply| reply.payload) {
            Some(Message::Error(err)) => anyhow::bail!("{}", err.message),
            Some(reply) => Ok(reply),
            None => anyhow::bail!("no response from router"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Initialize tracing on stderr so `cat` output stays clean
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter.as_str())
        .with_writer(std::io::stderr)
        .init();

    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    let router = RequestRouter::from_config(&config)?;

    if let Commands::Check = cli.command {
        print_check(&config)?;
        return Ok(());
    }

    let mut session = Session {
        router,
        token: cli.token,
        sequence: 0,
    };

    match cli.command {
        Commands::Check => {}
        Commands::Ls { path, all, json } => {
            let reply = session
                .call(Message::ListRequest(ListRequest {
                    path,
                    include_hidden: all,
                }))
                .await?;
            let Message::ListResponse(listing) = reply else {
                anyhow::bail!("unexpected reply: {reply:?}");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&listing.entries)?);
            } else {
                print_listing(&listing.entries);
            }
        }
        Commands::Stat { path } => {
            let reply = session
                .call(Message::StatRequest(StatRequest { path }))
                .await?;
            let Message::StatResponse(stat) = reply else {
                anyhow::bail!("unexpected reply: {reply:?}");
            };
            println!("{}", serde_json::to_string_pretty(&stat)?);
        }
        Commands::Cat { path } => {
            let mut stdout = std::io::stdout().lock();
            let mut offset = 0;
            loop {
                let reply = session
                    .call(Message::ReadRequest(ReadRequest {
                        path: path.clone(),
                        offset,
                        length: 0,
                    }))
                    .await?;
                let Message::ReadResponse(chunk) = reply else {
                    anyhow::bail!("unexpected reply: {reply:?}");
                };
                stdout.write_all(&chunk.data)?;
                offset += chunk.data.len() as u64;
                if chunk.is_last || chunk.data.is_empty() {
                    break;
                }
            }
            stdout.flush()?;
        }
        Commands::Put {
            file,
            directory,
            name,
        } => {
            let filename = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .with_context(|| format!("{} has no file name", file.display()))?,
            };
            let data = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let reply = session
                .call(Message::UploadRequest(UploadRequest {
                    directory,
                    filename,
                    data,
                }))
                .await?;
            print_complete(&reply);
        }
        Commands::Mkdir { path } => {
            let reply = session
                .call(Message::MkdirRequest(MkdirRequest { path }))
                .await?;
            print_complete(&reply);
        }
        Commands::Rm { path } => {
            let reply = session
                .call(Message::DeleteRequest(DeleteRequest { path }))
                .await?;
            print_complete(&reply);
        }
        Commands::Mv {
            source,
            destination,
        } => {
            let reply = session
                .call(Message::MoveRequest(MoveRequest {
                    source,
                    destination,
                }))
                .await?;
            print_complete(&reply);
        }
        Commands::Cp {
            source,
            destination,
        } => {
            let reply = session
                .call(Message::CopyRequest(CopyRequest {
                    source,
                    destination,
                }))
                .await?;
            print_complete(&reply);
        }
        Commands::Quota => {
            let reply = session
                .call(Message::QuotaRequest(QuotaRequest {}))
                .await?;
            let Message::QuotaResponse(info) = reply else {
                anyhow::bail!("unexpected reply: {reply:?}");
            };
            println!("Used:      {}", format_size(info.used));
            if info.limit == 0 {
                println!("Limit:     unlimited");
            } else {
                println!("Limit:     {}", format_size(info.limit));
                println!("Available: {}", format_size(info.available.max(0) as u64));
            }
        }
        Commands::Zip { paths, output } => {
            let mut file = std::fs::File::create(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            let mut request = Message::ExportRequest(ExportRequest {
                paths,
                chunk_size: 0,
            });
            loop {
                let reply = session.call(request).await?;
                let Message::ExportChunk(chunk) = reply else {
                    anyhow::bail!("unexpected reply: {reply:?}");
                };
                file.write_all(&chunk.data)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                if chunk.is_last || chunk.data.is_empty() {
                    println!(
                        "Wrote {} ({} files, {} skipped)",
                        output.display(),
                        chunk.files,
                        chunk.skipped
                    );
                    break;
                }
                request = Message::ExportChunkRequest(ExportChunkRequest {
                    export_id: chunk.export_id,
                    offset: chunk.offset + chunk.data.len() as u64,
                    chunk_size: 0,
                });
            }
        }
    }

    Ok(())
}

fn print_check(config: &Config) -> anyhow::Result<()> {
    println!("Configuration OK");
    let limit = config.quota_limit()?;
    if limit == 0 {
        println!("  Quota:    unlimited");
    } else {
        println!("  Quota:    {}", format_size(limit));
    }
    println!(
        "  Tokens:   {}",
        match (config.token_validator().is_some(), config.auth.require_token) {
            (true, true) => "required",
            (true, false) => "accepted",
            (false, _) => "disabled",
        }
    );
    if config.storage.mappings.is_empty() {
        println!("  No mappings configured.");
    }
    for mapping in config.mapping_set().iter() {
        println!(
            "  {:<20} -> {}",
            mapping.virtual_path,
            mapping.source.display()
        );
    }
    Ok(())
}

fn print_listing(entries: &[FileRecord]) {
    if entries.is_empty() {
        println!("(empty)");
        return;
    }
    for entry in entries {
        let kind = if entry.is_directory { 'd' } else { '-' };
        let size = if entry.is_directory {
            String::new()
        } else {
            format_size(entry.size)
        };
        println!("{kind} {size:>12}  {}", entry.name);
    }
}

fn print_complete(reply: &Message) {
    match reply {
        Message::OperationComplete(done) => println!("{}", done.path),
        other => println!("{other:?}"),
    }
}
