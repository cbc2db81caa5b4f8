use clap::{Parser, Subcommand};
use dash_dl::{
    Config, Event, JsonTaskStore, Status, StreamSelection, TaskId, TaskOptions, TaskScheduler,
    TaskStore, wait_for_signal,
};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "dash-dl")]
#[command(about = "Download DASH video and audio streams and mux them into one file")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more pages and wait until they finish
    Add {
        /// Content page URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Destination directory (defaults to the configured download directory)
        #[arg(short, long)]
        dest: Option<PathBuf>,

        /// Streams to fetch: full, video or audio
        #[arg(short = 't', long = "type", default_value = "full")]
        selection: StreamSelection,

        /// Treat each URL as the first part of a series
        #[arg(short, long)]
        series: bool,

        /// Output title instead of the page title
        #[arg(long)]
        title: Option<String>,
    },
    /// Print the persisted task table
    List,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        error!(error = %e, "dash-dl failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

async fn run(args: Args) -> dash_dl::Result<()> {
    let config = match args.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::default(),
    };

    match args.command {
        Commands::Add {
            urls,
            dest,
            selection,
            series,
            title,
        } => {
            let options = TaskOptions {
                title,
                destination_dir: dest,
                stream_selection: selection,
                series,
            };
            add(config, &urls, options).await
        }
        Commands::List => list(config).await,
    }
}

async fn add(config: Config, urls: &[String], options: TaskOptions) -> dash_dl::Result<()> {
    let scheduler = TaskScheduler::new(config).await?;
    let dest = options
        .destination_dir
        .clone()
        .unwrap_or_else(|| scheduler.get_config().download_dir().clone());
    info!(dest = %dest.display(), tasks = urls.len(), "starting downloads");

    let mut events = scheduler.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    let mut ids = Vec::with_capacity(urls.len());
    for url in urls {
        ids.push(scheduler.submit(url, options.clone()).await?);
    }

    tokio::select! {
        _ = wait_for_submitted(&scheduler, &ids) => {
            info!("all submitted tasks finished");
        }
        _ = wait_for_signal() => {
            info!("interrupted, pausing running tasks");
        }
    }
    scheduler.shutdown().await?;

    let mut failed = 0;
    for id in &ids {
        let task = scheduler.get_task(id).await?;
        if task.status == Status::Failed {
            failed += 1;
        }
        println!("{}  {:<9}  {}", task.id, task.status, task.display_title());
    }
    if failed > 0 {
        eprintln!("{} of {} tasks failed", failed, ids.len());
        process::exit(2);
    }
    Ok(())
}

async fn wait_for_submitted(scheduler: &TaskScheduler, ids: &[TaskId]) {
    loop {
        let mut done = true;
        for id in ids {
            match scheduler.get_task(id).await {
                Ok(task) if !task.status.is_terminal() => {
                    done = false;
                    break;
                }
                _ => {}
            }
        }
        if done {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn list(config: Config) -> dash_dl::Result<()> {
    let store = JsonTaskStore::new(config.persistence.tasks_file.clone());
    let tasks = store.load().await?;
    if tasks.is_empty() {
        println!("no tasks in {}", store.path().display());
        return Ok(());
    }

    println!(
        "{:<26}  {:<9}  {:>6}  {:<16}  TITLE",
        "ID", "STATUS", "DONE", "UPDATED"
    );
    for task in &tasks {
        println!(
            "{:<26}  {:<9}  {:>5.1}%  {:<16}  {}",
            task.id,
            task.status,
            task.overall_progress,
            task.updated_at.format("%Y-%m-%d %H:%M"),
            task.display_title()
        );
        if !task.last_error.is_empty() {
            println!("{:<26}  error: {}", "", task.last_error);
        }
    }
    Ok(())
}

fn print_event(event: &Event) {
    match event {
        Event::Added { id, title } => println!("[{}] added: {}", id, title),
        Event::StatusChanged {
            id,
            status,
            message,
        } => {
            if message.is_empty() {
                println!("[{}] {}", id, status);
            } else {
                println!("[{}] {}: {}", id, status, message);
            }
        }
        Event::Progress {
            id,
            percent,
            message,
        } => println!("[{}] {:>5.1}% {}", id, percent, message),
        Event::TitleResolved { id, title } => println!("[{}] title: {}", id, title),
        Event::Log { id: Some(id), text } => println!("[{}] {}", id, text),
        Event::Log { id: None, text } => println!("{}", text),
        // Per-stream updates are too chatty for a terminal
        Event::StreamProgress { .. } => {}
        Event::Removed { .. } | Event::MaxConcurrentChanged { .. } | Event::Shutdown => {}
    }
}
