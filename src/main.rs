use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use dataset_master::config::{find_config_file, load_config, write_default_config, Config};
use dataset_master::mcp::McpServer;
use dataset_master::models::{sort_datasets, DatasetFilter, DatasetRecord, SortBy, SortOrder, SourceType};
use dataset_master::ui::{self, Spinner, Status};
use dataset_master::unified::{AggregateResponse, DatasetClient};
use dataset_master::utils::{find_cross_source_duplicates, DatasetCache, SyncReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Dataset Master - fetch and search neuroscience dataset metadata
#[derive(Parser, Debug)]
#[command(name = "dataset-master")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fetch and search dataset metadata from OpenNeuro, DANDI, PhysioNet and Zenodo", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Auto)]
    format: OutputFormat,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Request timeout in seconds (overrides http.timeout_secs)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Table on a terminal, JSON otherwise
    Auto,
    /// Table format (human-readable)
    Table,
    /// JSON format (machine-readable)
    Json,
    /// One line per dataset
    Plain,
}

impl OutputFormat {
    fn resolve(self) -> OutputFormat {
        match self {
            OutputFormat::Auto if ui::is_terminal() => OutputFormat::Table,
            OutputFormat::Auto => OutputFormat::Json,
            other => other,
        }
    }
}

/// Repository selection
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SourceArg {
    #[value(name = "openneuro")]
    OpenNeuro,
    #[value(name = "dandi")]
    Dandi,
    #[value(name = "physionet")]
    PhysioNet,
    #[value(name = "zenodo")]
    Zenodo,
    #[value(name = "all")]
    All,
}

impl SourceArg {
    fn source_type(self) -> Option<SourceType> {
        match self {
            SourceArg::OpenNeuro => Some(SourceType::OpenNeuro),
            SourceArg::Dandi => Some(SourceType::Dandi),
            SourceArg::PhysioNet => Some(SourceType::PhysioNet),
            SourceArg::Zenodo => Some(SourceType::Zenodo),
            SourceArg::All => None,
        }
    }
}

/// Expand `-s` flags; an empty list or `all` selects every source
fn selected_sources(args: &[SourceArg]) -> Vec<SourceType> {
    if args.contains(&SourceArg::All) {
        return Vec::new();
    }
    args.iter().filter_map(|s| s.source_type()).collect()
}

/// Sort field for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SortField {
    Downloads,
    Views,
    Subjects,
    Size,
    Name,
    Created,
    Modified,
}

impl From<SortField> for SortBy {
    fn from(field: SortField) -> Self {
        match field {
            SortField::Downloads => SortBy::Downloads,
            SortField::Views => SortBy::Views,
            SortField::Subjects => SortBy::Subjects,
            SortField::Size => SortBy::Size,
            SortField::Name => SortBy::Name,
            SortField::Created => SortBy::Created,
            SortField::Modified => SortBy::Modified,
        }
    }
}

/// Sort order
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Order {
    Asc,
    Desc,
}

impl From<Order> for SortOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Asc => SortOrder::Ascending,
            Order::Desc => SortOrder::Descending,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List datasets from one or more repositories
    #[command(alias = "f")]
    Fetch {
        /// Sources to fetch from (repeatable, default: all)
        #[arg(long, short, value_enum)]
        source: Vec<SourceArg>,

        /// Maximum number of datasets in total (0 = all)
        #[arg(long, short = 'n', default_value_t = 100)]
        limit: usize,

        /// Write the datasets as a JSON array to this file
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Filter expression (e.g. "modality:eeg subjects>=20")
        #[arg(long)]
        filter: Option<String>,

        /// Sort by field
        #[arg(long, value_enum)]
        sort_by: Option<SortField>,

        /// Sort order
        #[arg(long, value_enum, default_value_t = Order::Desc)]
        order: Order,

        /// Report datasets that appear in more than one repository
        #[arg(long)]
        show_duplicates: bool,
    },

    /// Search dataset titles and descriptions
    #[command(alias = "s")]
    Search {
        /// Search query string
        query: String,

        /// Source to search (default: all)
        #[arg(long, short, value_enum, default_value_t = SourceArg::All)]
        source: SourceArg,

        /// Maximum number of datasets in total
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,

        /// Write the datasets as a JSON array to this file
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Sort by field
        #[arg(long, value_enum)]
        sort_by: Option<SortField>,

        /// Sort order
        #[arg(long, value_enum, default_value_t = Order::Desc)]
        order: Order,
    },

    /// List available repositories
    Sources {
        /// Show descriptions and capabilities
        #[arg(long)]
        detailed: bool,
    },

    /// Show one dataset
    Info {
        /// Source-scoped dataset id (e.g. ds000001, 000003, eegmmidb)
        id: String,

        /// Repository the id belongs to
        #[arg(long, short, value_enum)]
        source: SourceArg,
    },

    /// Manage the local dataset cache
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },

    /// Run the MCP server
    Serve {
        /// Serve over streamable HTTP instead of stdio
        #[arg(long)]
        http: bool,

        /// Host to bind in HTTP mode
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind in HTTP mode
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Write it to this file instead
        #[arg(long)]
        write: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long, requires = "write")]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    /// Create the cache directory
    Init,

    /// Refresh the cache from one or more repositories
    Sync {
        /// Sources to sync (repeatable, default: all)
        #[arg(long, short, value_enum)]
        source: Vec<SourceArg>,

        /// Maximum datasets per source (0 = all)
        #[arg(long, short = 'n', default_value_t = 0)]
        limit: usize,
    },

    /// Query cached datasets without network access
    Query {
        /// Filter expression (e.g. "source:dandi modality:ecephys")
        expr: Option<String>,

        /// Maximum number of datasets
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,

        /// Write the datasets as a JSON array to this file
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Sort by field
        #[arg(long, value_enum)]
        sort_by: Option<SortField>,

        /// Sort order
        #[arg(long, value_enum, default_value_t = Order::Desc)]
        order: Order,
    },

    /// Show record counts and sync times
    Stats,

    /// Delete every cached snapshot
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().or_else(find_config_file);
    let mut config = load_config(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("failed to load configuration from {}", path.display()),
        None => "failed to load configuration".to_string(),
    })?;
    if let Some(timeout) = cli.timeout {
        config.http.timeout_secs = timeout;
    }

    init_tracing(&cli, &config);
    if let Some(path) = &config_path {
        tracing::info!("Using config file: {}", path.display());
    }

    let format = cli.format.resolve();
    let quiet = cli.quiet;

    match cli.command {
        Commands::Fetch {
            source,
            limit,
            output,
            filter,
            sort_by,
            order,
            show_duplicates,
        } => {
            let client = DatasetClient::from_config(&config)?;
            let filter = match filter {
                Some(expr) => expr.parse::<DatasetFilter>()?,
                None => DatasetFilter::default(),
            };
            let max = (limit > 0).then_some(limit);

            let spinner = Spinner::for_output("Fetching datasets...", quiet);
            let response = client
                .fetch_all_datasets(max, &selected_sources(&source), &filter)
                .await;
            let mut response = finish_spinner(&spinner, response)?;
            report_failures(&response, quiet);

            if let Some(field) = sort_by {
                sort_datasets(&mut response.datasets, field.into(), order.into());
            }
            if let Some(path) = &output {
                write_datasets(path, &response.datasets, quiet)?;
            }
            output_datasets(&response.datasets, format)?;

            if show_duplicates {
                print_duplicates(&response.datasets);
            }
        }

        Commands::Search {
            query,
            source,
            limit,
            output,
            sort_by,
            order,
        } => {
            let client = DatasetClient::from_config(&config)?;

            let spinner = Spinner::for_output(&format!("Searching for '{}'...", query), quiet);
            let response = client.search(&query, source.source_type(), Some(limit)).await;
            let mut response = finish_spinner(&spinner, response)?;
            report_failures(&response, quiet);

            if let Some(field) = sort_by {
                sort_datasets(&mut response.datasets, field.into(), order.into());
            }
            if let Some(path) = &output {
                write_datasets(path, &response.datasets, quiet)?;
            }
            output_datasets(&response.datasets, format)?;
        }

        Commands::Sources { detailed } => {
            let client = DatasetClient::from_config(&config)?;
            let sources = client.list_sources();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sources)?),
                OutputFormat::Plain => {
                    for s in &sources {
                        println!("{}\t{}", s.id, s.name);
                    }
                }
                _ => println!("{}", ui::sources_table(&sources, detailed)),
            }
        }

        Commands::Info { id, source } => {
            let Some(source) = source.source_type() else {
                bail!("'info' needs a single source, not 'all'");
            };
            let client = DatasetClient::from_config(&config)?;

            let spinner = Spinner::for_output(&format!("Looking up {}:{}...", source.id(), id), quiet);
            let dataset = finish_spinner(&spinner, client.get_dataset(source, &id).await)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&dataset)?),
                OutputFormat::Plain => println!("{}", ui::datasets_plain(&[dataset])),
                _ => println!("{}", ui::dataset_details(&dataset)),
            }
        }

        Commands::Db { command } => run_db(command, &config, format, quiet).await?,

        Commands::Serve { http, host, port } => {
            let client = Arc::new(DatasetClient::from_config(&config)?);
            let cache = Arc::new(DatasetCache::from_config(&config));
            let server = McpServer::new(client, cache)?;

            if http {
                let addr = format!("{}:{}", host, port);
                let (bound_addr, handle) = server.run_http(&addr).await?;
                tracing::info!("MCP server listening on {}", bound_addr);
                handle
                    .await
                    .map_err(|e| anyhow::anyhow!("Server task failed: {}", e))?;
            } else {
                server.run().await?;
            }
        }

        Commands::Config { write, force } => match write {
            Some(path) => {
                write_default_config(&path, &config, force)?;
                if !quiet {
                    ui::print_status(Status::Success, &format!("Wrote {}", path.display()));
                }
            }
            None => print!("{}", toml::to_string_pretty(&config)?),
        },

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "dataset-master", &mut std::io::stdout());
        }
    }

    Ok(())
}

async fn run_db(command: DbCommands, config: &Config, format: OutputFormat, quiet: bool) -> Result<()> {
    let cache = DatasetCache::from_config(config);

    match command {
        DbCommands::Init => {
            cache.init()?;
            if !quiet {
                ui::print_status(
                    Status::Success,
                    &format!("Cache initialized at {}", cache.store_dir().display()),
                );
            }
        }

        DbCommands::Sync { source, limit } => {
            let client = DatasetClient::from_config(config)?;
            let sources = client.registry().resolve(&selected_sources(&source))?;
            let max = (limit > 0).then_some(limit);

            let mut reports: Vec<(SourceType, SyncReport)> = Vec::new();
            let mut failed = 0;
            for source in &sources {
                let spinner = Spinner::for_output(&format!("Syncing {}...", source.name()), quiet);
                match cache.sync(source.as_ref(), max).await {
                    Ok(report) => {
                        spinner.finish_with_success(&format!(
                            "{}: {} datasets",
                            source.id(),
                            report.total
                        ));
                        reports.push((source.source_type(), report));
                    }
                    Err(e) => {
                        spinner.finish();
                        tracing::warn!("Sync of {} failed: {}", source.id(), e);
                        if !quiet {
                            ui::print_status(Status::Warning, &format!("{} failed: {}", source.id(), e));
                        }
                        failed += 1;
                    }
                }
            }

            if !sources.is_empty() && failed == sources.len() {
                bail!("sync failed for every selected source");
            }
            match format {
                OutputFormat::Json => {
                    let by_source: serde_json::Map<String, serde_json::Value> = reports
                        .iter()
                        .map(|(s, r)| serde_json::to_value(r).map(|v| (s.id().to_string(), v)))
                        .collect::<Result<_, serde_json::Error>>()?;
                    println!("{}", serde_json::to_string_pretty(&by_source)?);
                }
                OutputFormat::Plain => {
                    for (s, r) in &reports {
                        println!("{}\t{}", s.id(), r.total);
                    }
                }
                _ => println!("{}", ui::sync_table(&reports)),
            }
        }

        DbCommands::Query {
            expr,
            limit,
            output,
            sort_by,
            order,
        } => {
            let mut datasets = cache.query_expr(expr.as_deref().unwrap_or_default())?;
            if let Some(field) = sort_by {
                sort_datasets(&mut datasets, field.into(), order.into());
            }
            if limit > 0 {
                datasets.truncate(limit);
            }
            if let Some(path) = &output {
                write_datasets(path, &datasets, quiet)?;
            }
            output_datasets(&datasets, format)?;
        }

        DbCommands::Stats => {
            let stats = cache.stats()?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Plain => {
                    for s in &stats.sources {
                        println!("{}\t{}", s.source.id(), s.records);
                    }
                }
                _ => {
                    println!("{}", ui::stats_table(&stats));
                    if !stats.initialized && !quiet {
                        ui::print_status(Status::Info, "Cache not initialized; run `dataset-master db init`");
                    }
                }
            }
        }

        DbCommands::Clear => {
            cache.clear()?;
            if !quiet {
                ui::print_status(Status::Success, "Cache cleared");
            }
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli, config: &Config) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dataset_master={}", level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logs() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn finish_spinner<T, E>(spinner: &Spinner, result: Result<T, E>) -> Result<T, E> {
    match &result {
        Ok(_) => spinner.finish(),
        Err(_) => spinner.finish_with_error("Failed"),
    }
    result
}

fn report_failures(response: &AggregateResponse, quiet: bool) {
    if quiet {
        return;
    }
    for failure in &response.failures {
        ui::print_status(Status::Warning, &format!("{} unavailable: {}", failure.source.id(), failure.message));
    }
}

fn write_datasets(path: &Path, datasets: &[DatasetRecord], quiet: bool) -> Result<()> {
    let json = serde_json::to_string_pretty(datasets)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    if !quiet {
        ui::print_status(
            Status::Success,
            &format!("Wrote {} datasets to {}", datasets.len(), path.display()),
        );
    }
    Ok(())
}

fn output_datasets(datasets: &[DatasetRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(datasets)?),
        OutputFormat::Plain => {
            if !datasets.is_empty() {
                println!("{}", ui::datasets_plain(datasets));
            }
        }
        _ if datasets.is_empty() => ui::print_status(Status::Info, "No datasets found"),
        _ => println!("{}", ui::datasets_table(datasets)),
    }
    Ok(())
}

fn print_duplicates(datasets: &[DatasetRecord]) {
    let groups = find_cross_source_duplicates(datasets);
    if groups.is_empty() {
        ui::print_status(Status::Info, "No cross-source duplicates found");
        return;
    }

    ui::print_status(
        Status::Info,
        &format!("{} dataset(s) appear in more than one repository:", groups.len()),
    );
    for group in groups {
        let members: Vec<String> = group
            .iter()
            .filter_map(|&i| datasets.get(i))
            .map(|d| format!("{}:{}", d.source.id(), d.id))
            .collect();
        let title = group
            .first()
            .and_then(|&i| datasets.get(i))
            .map(|d| ui::truncate_with_ellipsis(&d.name, 60))
            .unwrap_or_default();
        eprintln!("  {}  ({})", title, members.join(", "));
    }
}
