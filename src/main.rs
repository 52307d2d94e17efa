//! GitShelve - a content-addressable blob store in a Git branch
//!
//! This is the main entry point for the gitshelve command-line interface.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::Level;

use gitshelve::{ContentHash, FetchReport, PushReport, RemoteEndpoint, Replicator, ShelveConfig};

#[derive(Parser)]
#[command(
    name = "gitshelve",
    about = "Content-addressable blob store kept in a Git branch",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the backing repository
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// Branch holding the shelve
    #[arg(short, long, global = true)]
    branch: Option<String>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Remote store to replicate with (repeatable)
    #[arg(short, long = "remote", global = true)]
    remotes: Vec<String>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Store a file (or stdin) and print its hash
    Put(PutArgs),
    /// Write a stored blob to stdout
    Get(GetArgs),
    /// List every stored hash
    List,
    /// Show the branch history
    Log(LogArgs),
    /// Fetch from all remotes
    Fetch,
    /// Fetch from, then push to, all remotes
    Push,
    /// Check the store for dangling or missing objects
    Verify(VerifyArgs),
}

#[derive(Args)]
struct PutArgs {
    /// File to store; reads stdin when omitted
    file: Option<PathBuf>,
}

#[derive(Args)]
struct GetArgs {
    hash: String,
    /// Do not fetch from remotes when the blob is missing locally
    #[arg(long)]
    no_fetch: bool,
}

#[derive(Args)]
struct LogArgs {
    /// Number of commits to show
    #[arg(short = 'n', long)]
    limit: Option<usize>,
}

#[derive(Args)]
struct VerifyArgs {
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    let config = load_config(&cli)?;
    let replicator = Replicator::open(&config)
        .with_context(|| format!("opening store {}", config.store.display()))?;

    run_command(cli.command, &replicator)
}

fn load_config(cli: &Cli) -> anyhow::Result<ShelveConfig> {
    let mut config = match &cli.config {
        Some(path) => ShelveConfig::load(path).with_context(|| format!("reading {}", path.display()))?,
        None => ShelveConfig::default(),
    };
    if let Some(store) = &cli.store {
        config.store = store.clone();
    }
    if let Some(branch) = &cli.branch {
        config.branch = branch.clone();
    }
    for remote in &cli.remotes {
        config.remotes.push(RemoteEndpoint::new(remote.as_str())?);
    }
    Ok(config)
}

fn run_command(command: Command, replicator: &Replicator<gitshelve::GitObjectStore>) -> anyhow::Result<()> {
    let shelve = replicator.shelve();
    match command {
        Command::Put(args) => {
            let hash = match args.file {
                Some(path) => {
                    let mut file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
                    shelve.put_reader(&mut file)?
                }
                None => shelve.put_reader(&mut io::stdin().lock())?,
            };
            println!("{}", hash);
        }
        Command::Get(args) => {
            let hash = ContentHash::from_hex(&args.hash)?;
            let mut stdout = io::stdout().lock();
            replicator.get_with(hash, !args.no_fetch, |source| io::copy(source, &mut stdout))?;
            stdout.flush()?;
        }
        Command::List => {
            for hash in shelve.list()? {
                println!("{}", hash);
            }
        }
        Command::Log(args) => {
            for commit in shelve.history(args.limit)? {
                println!(
                    "{} {} {}",
                    commit.id.short(),
                    commit.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    commit.summary()
                );
            }
        }
        Command::Fetch => report_fetch(&replicator.fetch())?,
        Command::Push => report_push(&replicator.push())?,
        Command::Verify(args) => {
            let report = shelve.verify()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{} objects, {} reachable", report.objects, report.reachable);
                for line in &report.broken {
                    println!("broken: {}", line);
                }
                for oid in &report.dangling {
                    println!("dangling: {}", oid);
                }
            }
            if !report.is_clean() {
                bail!("store has {} broken and {} dangling objects", report.broken.len(), report.dangling.len());
            }
        }
    }
    Ok(())
}

fn report_fetch(report: &FetchReport) -> anyhow::Result<()> {
    for (remote, result) in &report.results {
        match result {
            Ok(Some(head)) => println!("{}: {}", remote, head.short()),
            Ok(None) => println!("{}: no branch", remote),
            Err(e) => println!("{}: failed ({})", remote, e),
        }
    }
    if !report.is_ok() {
        bail!("{} remote(s) failed", report.failures().count());
    }
    Ok(())
}

fn report_push(report: &PushReport) -> anyhow::Result<()> {
    for (remote, result) in &report.results {
        match result {
            Ok(()) => println!("{}: pushed", remote),
            Err(e) => println!("{}: failed ({})", remote, e),
        }
    }
    if !report.is_ok() {
        bail!("{} remote(s) failed", report.failures().count());
    }
    Ok(())
}
