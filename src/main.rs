//! Courier CLI entry point.
//!
//! Provides `init`, `thread`, `send`, `messages`, `jobs` and `run`
//! subcommands for creating the database, managing threads, composing and
//! queueing messages, inspecting the queue and draining it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use courier::config::{config_dir, load_config, Config};
use courier::context::Context;
use courier::jobs::transport::LoggingTransport;
use courier::outgoing::drafts::LinkPreviewDraft;
use courier::outgoing::intents::TracingIntentDonor;
use courier::outgoing::{DataSource, MessageDraft, SendableAttachment};
use courier::store::threads::{self, ThreadRecord};
use courier::store::{messages, Store};
use courier::types::{MessageBody, RenderingFlag, ThreadId};

/// Courier: outgoing message preparation and durable send queue.
#[derive(Parser)]
#[command(name = "courier", version, about)]
struct Cli {
    /// Config file (default: ~/.courier/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Create the database and apply the schema.
    Init,
    /// Manage threads.
    Thread {
        /// Thread action.
        #[command(subcommand)]
        action: ThreadAction,
    },
    /// Compose a message and queue it for sending.
    Send(SendArgs),
    /// List the messages of a thread, oldest first.
    Messages {
        /// Thread identifier.
        thread: String,
        /// Maximum number of messages.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List send jobs.
    Jobs,
    /// Drain the send queue until interrupted.
    Run,
}

/// Thread subcommands.
#[derive(Subcommand)]
enum ThreadAction {
    /// Create a thread and print its identifier.
    Create {
        /// Display title.
        title: String,
        /// Disappearing-message timer in seconds.
        #[arg(long)]
        disappearing: Option<u32>,
    },
    /// List threads.
    List,
}

/// Arguments of `send`.
#[derive(clap::Args)]
struct SendArgs {
    /// Thread identifier.
    thread: String,
    /// Body text.
    text: Option<String>,
    /// Attach a file. Repeatable.
    #[arg(long = "attach")]
    attachments: Vec<PathBuf>,
    /// Send the single attachment as a voice note.
    #[arg(long)]
    voice: bool,
    /// Make the single attachment view-once.
    #[arg(long)]
    view_once: bool,
    /// Edit the message with this row id instead of sending a new one.
    #[arg(long)]
    edit: Option<i64>,
    /// Attach a link preview for this https URL.
    #[arg(long)]
    link: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Command::Init => handle_init(config).await,
        Command::Thread { action } => handle_thread(config, action).await,
        Command::Send(args) => handle_send(config, args).await,
        Command::Messages { thread, limit } => handle_messages(config, &thread, limit).await,
        Command::Jobs => handle_jobs(config).await,
        Command::Run => handle_run(config).await,
    }
}

fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config_dir()?.join("config.toml"),
    };
    load_config(&path)
}

async fn open_store(config: &Config) -> anyhow::Result<Store> {
    Store::open(
        &config.storage.database_path,
        config.storage.max_connections,
        config.outgoing.writer_channel_capacity,
    )
    .await
    .with_context(|| {
        format!(
            "failed to open database {}",
            config.storage.database_path.display()
        )
    })
}

async fn handle_init(config: Config) -> anyhow::Result<()> {
    courier::logging::init_cli();
    let store = open_store(&config).await?;
    store.shutdown().await;
    println!("{}", config.storage.database_path.display());
    Ok(())
}

async fn handle_thread(config: Config, action: ThreadAction) -> anyhow::Result<()> {
    courier::logging::init_cli();
    let store = open_store(&config).await?;

    match action {
        ThreadAction::Create {
            title,
            disappearing,
        } => {
            let thread = ThreadRecord::new(title);
            let id = thread.id.clone();
            store
                .write(move |mut tx| {
                    Box::pin(async move {
                        threads::insert_thread(tx.conn(), &thread).await?;
                        if let Some(seconds) = disappearing {
                            threads::set_disappearing_duration(tx.conn(), &thread.id, seconds)
                                .await?;
                        }
                        Ok((tx, ()))
                    })
                })
                .await
                .context("failed to create thread")?;
            println!("{id}");
        }
        ThreadAction::List => {
            let mut read = store.read().await?;
            let all = threads::list_threads(read.conn()).await?;
            read.close().await?;
            for thread in all {
                println!("{}\t{}", thread.id, thread.title);
            }
        }
    }

    store.shutdown().await;
    Ok(())
}

async fn handle_send(config: Config, args: SendArgs) -> anyhow::Result<()> {
    courier::logging::init_cli();
    let ctx = Context::init(config, Arc::new(TracingIntentDonor)).await?;

    let mut attachments = Vec::with_capacity(args.attachments.len());
    for path in &args.attachments {
        let mut attachment = SendableAttachment::new(
            DataSource::File(path.clone()),
            guess_content_type(path),
        );
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            attachment = attachment.with_filename(name);
        }
        if args.voice {
            attachment = attachment.with_rendering(RenderingFlag::VoiceMessage);
        }
        if args.view_once {
            attachment = attachment.view_once();
        }
        attachments.push(attachment);
    }

    let link_preview = match args.link.as_deref() {
        Some(url) => Some(LinkPreviewDraft::new(url, None)?),
        None => None,
    };

    let draft = MessageDraft {
        thread_id: ThreadId::new(args.thread),
        body: args.text.map(MessageBody::new),
        attachments,
        quoted_reply: None,
        link_preview,
        edit_target: args.edit,
    };

    let sending = ctx.send(draft).await?;
    let persisted = sending.persisted.await;
    ctx.shutdown().await;

    match persisted {
        Ok(persisted) => {
            println!("{}", persisted.message_id);
            Ok(())
        }
        Err(_) => Err(anyhow::anyhow!("message was not persisted; see log output")),
    }
}

async fn handle_messages(config: Config, thread: &str, limit: usize) -> anyhow::Result<()> {
    courier::logging::init_cli();
    let store = open_store(&config).await?;
    let mut read = store.read().await?;
    let rows = messages::list_thread_messages(read.conn(), &ThreadId::new(thread), limit).await?;
    read.close().await?;

    for message in rows {
        let edit = message
            .edit_target_id
            .map(|id| format!(" (edit of {id})"))
            .unwrap_or_default();
        println!(
            "{}\t{}\t{}{}\t{}",
            message.id,
            message.timestamp,
            message.status.as_str(),
            edit,
            message.body.unwrap_or_default()
        );
    }

    store.shutdown().await;
    Ok(())
}

async fn handle_jobs(config: Config) -> anyhow::Result<()> {
    courier::logging::init_cli();
    let store = open_store(&config).await?;
    let mut read = store.read().await?;
    let jobs = courier::jobs::list_jobs(read.conn()).await?;
    read.close().await?;

    for job in jobs {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            job.id,
            job.message_id,
            job.status.as_str(),
            job.attempts,
            job.last_error.unwrap_or_default()
        );
    }

    store.shutdown().await;
    Ok(())
}

async fn handle_run(config: Config) -> anyhow::Result<()> {
    let _logging_guard = courier::logging::init_production(config.logging.logs_dir.as_deref())?;
    let ctx = Context::init(config, Arc::new(TracingIntentDonor)).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = ctx.job_runner(Arc::new(LoggingTransport));
    let handle = tokio::spawn(runner.run(shutdown_rx));

    info!(
        database = %ctx.config.storage.database_path.display(),
        "courier running, press Ctrl-C to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C, shutting down");
    }
    let _ = shutdown_tx.send(true);
    if let Err(e) = handle.await {
        warn!(error = %e, "job runner task failed");
    }
    ctx.shutdown().await;
    Ok(())
}

fn guess_content_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_owned()
}
