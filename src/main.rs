//! ionflow - command-line runner for saved filter trees
//!
//! Loads a filter tree, refreshes it on the worker thread through an
//! analysis session and prints what every leaf filter produced.
//!
//! # Usage
//!
//! ```text
//! ionflow run <STATE_FILE> [--strip-hazardous | --allow-hazardous] [--no-cache]
//! ionflow demo [--ions N] [--save PATH]
//! ionflow config [--write]
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use ionflow::config::EngineConfig;
use ionflow::pipeline::filters::{BoundingBoxFilter, DataLoadFilter, RangeFilter, SpectrumPlotFilter};
use ionflow::pipeline::{
    FilterTree, PropertyValue, RefreshEvent, RefreshMessage, RefreshStatus, TreeState,
};
use ionflow::session::AnalysisSession;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ranges used by the demo tree.
const DEMO_RANGES: &str = "Bl#3366ff:0..9;Pl#ff6633:20..33";

/// Refresh saved filter trees from the command line.
#[derive(Parser)]
#[command(name = "ionflow", version, about)]
struct Cli {
    /// Engine configuration file (TOML). Defaults to the app data directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to daily rotated files in this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a saved filter tree, refresh it and print the leaf outputs.
    Run {
        /// Tree state file (`.json` or `.toml`).
        state_file: PathBuf,

        /// Remove filters that run external programs before refreshing.
        #[arg(long)]
        strip_hazardous: bool,

        /// Run filters that execute external programs.
        #[arg(long, conflicts_with = "strip_hazardous")]
        allow_hazardous: bool,

        /// Disable output caching for this run.
        #[arg(long)]
        no_cache: bool,
    },

    /// Build and refresh a small range-split demo tree.
    Demo {
        /// Number of synthetic ions.
        #[arg(long, default_value_t = 100)]
        ions: usize,

        /// Save the demo tree to this state file.
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Print the effective engine configuration.
    Config {
        /// Write it to the default location.
        #[arg(long)]
        write: bool,
    },
}

fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ionflow=debug"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ionflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_dir.as_deref());

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_or_default(),
    };

    match cli.command {
        Command::Run {
            state_file,
            strip_hazardous,
            allow_hazardous,
            no_cache,
        } => {
            let tree = load_tree(&config, &state_file, strip_hazardous, allow_hazardous)?;
            if no_cache {
                tree.budget().set_enabled(false);
            }
            refresh_and_print(&config, tree)
        }
        Command::Demo { ions, save } => {
            let tree = demo_tree(&config, ions)?;
            if let Some(path) = save {
                TreeState::capture(&tree)?
                    .save(&path)
                    .with_context(|| format!("Failed to save {}", path.display()))?;
                println!("Saved demo tree to {}", path.display());
            }
            refresh_and_print(&config, tree)
        }
        Command::Config { write } => {
            print!("{}", toml::to_string_pretty(&config)?);
            if write {
                let path = config.save()?;
                println!("# written to {}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_tree(
    config: &EngineConfig,
    path: &Path,
    strip_hazardous: bool,
    allow_hazardous: bool,
) -> anyhow::Result<FilterTree> {
    let mut state = TreeState::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    if state.has_hazardous() {
        if strip_hazardous {
            let removed = state.strip_hazardous();
            println!("Removed {removed} filter(s) that run external programs");
        } else if !allow_hazardous {
            anyhow::bail!(
                "{} contains filters that run external programs; \
                 pass --strip-hazardous to remove them or --allow-hazardous to run them",
                path.display()
            );
        }
    }

    let base_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tree = state.build(config.cache_budget(), base_dir)?;
    tree.set_max_undo_depth(config.history.max_undo_depth);
    Ok(tree)
}

fn demo_tree(config: &EngineConfig, ions: usize) -> anyhow::Result<FilterTree> {
    let mut tree = config.new_tree();
    let src = tree.add_filter(Box::new(DataLoadFilter::synthetic(ions)), None)?;
    let range = tree.add_filter(Box::new(RangeFilter::new()), Some(src))?;
    tree.set_filter_property(range, "ranges", &PropertyValue::from(DEMO_RANGES))?;
    tree.add_filter(Box::new(SpectrumPlotFilter::new()), Some(range))?;
    tree.add_filter(Box::new(BoundingBoxFilter::new()), Some(range))?;
    tree.clear_history();
    Ok(tree)
}

fn refresh_and_print(config: &EngineConfig, tree: FilterTree) -> anyhow::Result<ExitCode> {
    let mut session = AnalysisSession::new(tree, config.refresh.clone());
    session.request_refresh();

    let status = loop {
        let report = session.tick()?;
        for message in session.take_messages() {
            print_message(&message);
        }
        if let Some(status) = report.finished {
            break status;
        }
        if let Some(progress) = session.progress() {
            tracing::trace!(
                "{}/{} filters, {}%",
                progress.total_progress,
                progress.total_num_filters,
                (progress.fraction() * 100.0) as u32
            );
        }
        std::thread::sleep(config.refresh.monitor_interval());
    };

    let Some(outcome) = session.last_outcome() else {
        anyhow::bail!("Refresh finished without a result");
    };
    for output in &outcome.outputs {
        println!("{} ({}):", output.label, output.filter);
        for stream in &output.streams {
            println!("  {stream}");
        }
    }
    println!(
        "{} refreshed, {} from cache in {:?}",
        outcome.stats.refreshed, outcome.stats.cache_hits, outcome.stats.elapsed
    );

    Ok(match status {
        RefreshStatus::Completed => ExitCode::SUCCESS,
        RefreshStatus::Failed | RefreshStatus::Aborted => ExitCode::FAILURE,
    })
}

fn print_message(message: &RefreshMessage) {
    match message {
        RefreshMessage::Event(RefreshEvent::Console(line)) => {
            println!("[{}] {}", line.label, line.text);
        }
        RefreshMessage::Event(RefreshEvent::Failed(failure)) => {
            eprintln!("{}", failure.verbose_message);
        }
        RefreshMessage::Event(event) => tracing::trace!("{:?}", event),
        RefreshMessage::Finished { status, .. } => tracing::debug!("Refresh {:?}", status),
    }
}
