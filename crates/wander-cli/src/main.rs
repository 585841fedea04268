use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::{env, io};

use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use tokio::runtime;
use wander_crawler::adapters::{
    import_csv, CsvRecordStore, CsvWriterConfig, FileBlacklist, GraphLayout, LogTelemetry,
    MemoryBlacklist, MemoryRecordStore, OfflineGraph, ScriptClassifier,
};
use wander_crawler::{
    Blacklist, Classifier, Collaborators, ExplorationIndex, OnError, Origin, RecordStore,
    RunOutcome, SelectionMode, Supervisor, TraversalConfig,
};

/// Group-diversifying traversal of recommendation graphs
#[derive(Debug, Parser)]
#[clap(version)]
pub struct Args {
    #[clap(subcommand)]
    pub cmd: SubCommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum SubCommand {
    #[clap(name = "simulate")]
    Simulate(SimulateArgs),
    #[clap(name = "stats")]
    Stats(StatsArgs),
    #[clap(hide = true)]
    Completion,
}

/// Run traversals over a recorded graph
#[derive(Debug, clap::Args)]
pub struct SimulateArgs {
    /// Path to the yaml graph to traverse
    #[clap(parse(from_os_str), long, short)]
    pub graph: PathBuf,
    /// Number of successful transitions each run must complete
    #[clap(long, short, default_value = "10")]
    pub transitions: usize,
    /// Number of concurrent runs sharing the index
    #[clap(long, default_value = "1")]
    pub runs: usize,
    /// Where candidates come from: related, feed or search:<query>
    #[clap(long, default_value = "related")]
    pub origin: String,
    /// Optional csv file where collected records are appended
    #[clap(parse(from_os_str), long, short)]
    pub output_file: Option<PathBuf>,
    /// Optional file of blacklisted node ids, one per line
    #[clap(parse(from_os_str), long)]
    pub blacklist: Option<PathBuf>,
    /// Classify titles as cyrillic instead of latin
    #[clap(long)]
    pub cyrillic: bool,
    /// Optional default traversal yaml configuration file
    #[clap(env = "WANDER_CONFIG", parse(from_os_str), long)]
    pub config: Option<PathBuf>,
    /// Override the selection mode
    #[clap(arg_enum, long)]
    pub mode: Option<SelectionMode>,
    /// Override attempts per transition
    #[clap(long)]
    pub max_attempts: Option<usize>,
    /// Override the no progress streak limit
    #[clap(long)]
    pub max_streak: Option<usize>,
    /// Override the pause after a reload, in milliseconds
    #[clap(long)]
    pub reload_pause_ms: Option<u64>,
    /// Override the delay between transitions, in milliseconds
    #[clap(long)]
    pub transition_delay_ms: Option<u64>,
    /// Override record store error handling strategy
    #[clap(arg_enum, long)]
    pub on_store_error: Option<OnError>,
    /// No SIGINT handling, runs are not cancelled on ctrl-c
    #[clap(long)]
    pub no_sigint: bool,
    /// When quiet no logs are outputted
    #[clap(long, short)]
    pub quiet: bool,
}

impl TryFrom<&SimulateArgs> for TraversalConfig {
    type Error = anyhow::Error;

    fn try_from(args: &SimulateArgs) -> Result<Self, Self::Error> {
        let mut conf = if let Some(file) = args.config.as_ref().map(File::open) {
            serde_yaml::from_reader(file?)?
        } else {
            TraversalConfig::default()
        };
        if let Some(mode) = args.mode {
            conf.mode = mode;
        }
        if let Some(max_attempts) = args.max_attempts {
            conf.max_attempts_per_transition = max_attempts;
        }
        if let Some(max_streak) = args.max_streak {
            conf.max_no_progress_streak = max_streak;
        }
        if let Some(reload_pause_ms) = args.reload_pause_ms {
            conf.reload_pause_ms = reload_pause_ms;
        }
        if let Some(transition_delay_ms) = args.transition_delay_ms {
            conf.transition_delay_ms = transition_delay_ms;
        }
        if let Some(on_store_error) = args.on_store_error {
            conf.on_store_error = on_store_error;
        }
        Ok(conf)
    }
}

fn parse_origin(origin: &str) -> anyhow::Result<Origin> {
    match origin {
        "related" => Ok(Origin::Related),
        "feed" => Ok(Origin::Feed),
        _ => match origin.strip_prefix("search:") {
            Some(query) if !query.trim().is_empty() => {
                Ok(Origin::Search(query.trim().to_string()))
            }
            _ => anyhow::bail!(
                "Invalid origin {origin}, expected related, feed or search:<query>"
            ),
        },
    }
}

pub fn simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let conf: TraversalConfig = (&args).try_into()?;
    let mode = conf.mode;
    let origin = parse_origin(&args.origin)?;
    let layout: GraphLayout = serde_yaml::from_reader(File::open(&args.graph)?)?;
    let graph = Arc::new(OfflineGraph::new(layout));

    let store: Arc<dyn RecordStore> = match &args.output_file {
        Some(path) => Arc::new(CsvRecordStore::new(path, CsvWriterConfig::default())),
        None => Arc::new(MemoryRecordStore::new()),
    };
    let blacklist: Arc<dyn Blacklist> = match &args.blacklist {
        Some(path) => Arc::new(FileBlacklist::open(path)?),
        None => Arc::new(MemoryBlacklist::new()),
    };
    let classifier: Arc<dyn Classifier> = if args.cyrillic {
        Arc::new(ScriptClassifier::cyrillic())
    } else {
        Arc::new(ScriptClassifier::latin())
    };
    let collab = Collaborators {
        collector: graph.clone(),
        navigator: graph.clone(),
        probe: graph.clone(),
        blacklist,
        store,
        telemetry: Arc::new(LogTelemetry),
    };

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async {
        let supervisor = Supervisor::new(conf, collab, classifier);
        let seeded = supervisor.seed_from_store().await?;
        if seeded > 0 {
            println!("Seeded index with {seeded} records");
        }

        for _ in 0..args.runs.max(1) {
            supervisor.start_run(args.transitions, mode, origin.clone());
        }

        let results = if args.no_sigint {
            supervisor.wait_all().await
        } else {
            let waiting = supervisor.wait_all();
            tokio::pin!(waiting);
            tokio::select! {
                results = &mut waiting => results,
                _ = tokio::signal::ctrl_c() => {
                    supervisor.cancel_all();
                    waiting.await
                }
            }
        };

        let mut failed = 0;
        for (id, result) in results {
            match result {
                Ok(RunOutcome::Completed(report)) => println!(
                    "{id} completed {}/{} transitions in {} attempts: {}",
                    report.completed_transitions,
                    report.target_transitions,
                    report.attempts,
                    report.path.join(" -> ")
                ),
                Ok(RunOutcome::Cancelled(report)) => println!(
                    "{id} cancelled after {}/{} transitions",
                    report.completed_transitions, report.target_transitions
                ),
                Err(e) => {
                    failed += 1;
                    eprintln!("{id} failed: {e}");
                }
            }
        }

        let snapshot = supervisor.index_snapshot();
        println!(
            "Index: {} groups, {} items, {} visited nodes, {} navigations",
            snapshot.unique_group_count(),
            snapshot.total_unique_item_count(),
            snapshot.visited.len(),
            graph.navigations()
        );
        println!(
            "Thematic ratio (rolling): {}%",
            supervisor.metrics().rolling_average()
        );

        if failed > 0 {
            anyhow::bail!("{failed} runs failed");
        }
        Ok(())
    })
}

/// Print exploration statistics of stored records
#[derive(Debug, clap::Args)]
pub struct StatsArgs {
    /// Csv files of collected records, gzipped files are supported
    #[clap(parse(from_os_str), required = true)]
    pub files: Vec<PathBuf>,
    /// Number of least represented groups to show
    #[clap(long, default_value = "10")]
    pub least: usize,
}

pub fn stats(args: StatsArgs) -> anyhow::Result<()> {
    let conf = CsvWriterConfig::default();
    let mut records = vec![];
    for file in &args.files {
        records.extend(import_csv(file, &conf)?);
    }

    let index = ExplorationIndex::new();
    index.initialize(&records);
    let snapshot = index.snapshot();

    println!("Records: {}", records.len());
    println!("Visited nodes: {}", snapshot.visited.len());
    println!("Unique groups: {}", snapshot.unique_group_count());
    println!("Unique items: {}", snapshot.total_unique_item_count());
    println!("Least represented groups:");
    for (group, count) in snapshot.least_represented(args.least) {
        println!("  {group}\t{count}");
    }
    Ok(())
}

/// `RUST_LOG` wins over the command's default filter.
fn log_filter(from_env: Option<String>, default: &str) -> String {
    from_env
        .filter(|filter| !filter.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn init_logger(default: &str) {
    env_logger::Builder::new()
        .parse_filters(&log_filter(env::var("RUST_LOG").ok(), default))
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.cmd {
        SubCommand::Simulate(args) => {
            if !args.quiet {
                init_logger("wander_crawler=info,wander=info");
            }
            simulate(args)
        }
        SubCommand::Stats(args) => {
            init_logger("wander_crawler=warn");
            stats(args)
        }
        SubCommand::Completion => {
            generate(Shell::Bash, &mut Args::command(), "wander", &mut io::stdout());
            Ok(())
        }
    }
}
