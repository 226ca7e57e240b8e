use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use gazetteer::config::{self, DatasetLocations, DatasetPaths, PipelineConfig};
use gazetteer::pipeline::{self, RunSummary};
use gazetteer::sink::{BatchingSink, JsonLinesWriter, SearchIndexConfig, SearchIndexWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "gazetteer")]
#[command(about = "Join GeoNames dumps into deduplicated city records for a search index")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and extract every dataset without importing
    Fetch(DatasetArgs),
    /// Fetch the datasets, then build and upload the city records
    Import(ImportArgs),
}

#[derive(Args)]
struct DatasetArgs {
    /// Admin1 codes file (URL or local path)
    #[arg(long, env = "GAZETTEER_ADMIN1", default_value = config::ADMIN1_URL)]
    admin1: String,

    /// Admin2 codes file (URL or local path)
    #[arg(long, env = "GAZETTEER_ADMIN2", default_value = config::ADMIN2_URL)]
    admin2: String,

    /// Country info file (URL or local path)
    #[arg(long, env = "GAZETTEER_COUNTRY", default_value = config::COUNTRY_URL)]
    country: String,

    /// Postal codes file or zip archive (URL or local path)
    #[arg(long, env = "GAZETTEER_POSTAL_CODE", default_value = config::POSTAL_CODE_URL)]
    postal_code: String,

    /// Hierarchy file or zip archive (URL or local path)
    #[arg(long, env = "GAZETTEER_HIERARCHY", default_value = config::HIERARCHY_URL)]
    hierarchy: String,

    /// Primary place file or zip archive (URL or local path)
    #[arg(long, env = "GAZETTEER_CITIES", default_value = config::CITIES_URL)]
    cities: String,

    /// Directory for downloads and extracted archives
    #[arg(long, default_value = config::DEFAULT_WORK_DIR)]
    work_dir: PathBuf,

    /// Download again even when a previous download is present
    #[arg(long)]
    force_download: bool,

    /// Max concurrent downloads
    #[arg(long, default_value_t = config::MAX_PARALLEL_FETCHES)]
    max_parallel_fetches: usize,
}

#[derive(Args)]
struct ImportArgs {
    #[command(flatten)]
    datasets: DatasetArgs,

    /// Feature class a record needs to count as a city
    #[arg(long, default_value = config::DEFAULT_CITY_FEATURE_CLASS)]
    city_class: String,

    /// Feature codes that are never imported (comma separated)
    #[arg(long, value_delimiter = ',', default_values_t = config::DEFAULT_IGNORED_FEATURE_CODES.iter().map(|c| c.to_string()))]
    ignore_codes: Vec<String>,

    /// Records per sink batch
    #[arg(long, default_value_t = config::SINK_BATCH_SIZE)]
    batch_size: usize,

    /// Capacity of the per-dataset record channels
    #[arg(long, default_value_t = config::CHANNEL_CAPACITY)]
    channel_capacity: usize,

    /// Write every rejected or duplicate record to this TSV file
    #[arg(long)]
    rejects: Option<PathBuf>,

    /// Write city records to a JSON lines file instead of a search index
    #[arg(short, long, conflicts_with = "index_url")]
    output: Option<PathBuf>,

    /// Search index base URL
    #[arg(long)]
    index_url: Option<String>,

    /// Search index name
    #[arg(long, default_value = "cities")]
    index_name: String,

    /// Search index application id
    #[arg(long, env = "GAZETTEER_APP_ID", hide_env_values = true)]
    app_id: Option<String>,

    /// Search index API key
    #[arg(long, env = "GAZETTEER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

impl DatasetArgs {
    fn into_config(self) -> PipelineConfig {
        PipelineConfig {
            datasets: DatasetLocations {
                admin1: self.admin1,
                admin2: self.admin2,
                country: self.country,
                postal_code: self.postal_code,
                hierarchy: self.hierarchy,
                cities: self.cities,
            },
            work_dir: self.work_dir,
            force_download: self.force_download,
            max_parallel_fetches: self.max_parallel_fetches,
            ..PipelineConfig::default()
        }
    }
}

fn fetch_datasets(config: &PipelineConfig) -> Result<DatasetPaths> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.max_parallel_fetches.max(1))
        .thread_name("gazetteer-fetch-worker")
        .enable_io()
        .enable_time()
        .build()?;
    rt.block_on(gazetteer::fetch::fetch_all(config))
}

fn run_fetch(args: DatasetArgs) -> Result<()> {
    let config = args.into_config();
    let start = Instant::now();
    let paths = fetch_datasets(&config)?;

    println!();
    println!("=== Datasets ===");
    for dataset in gazetteer::models::DatasetId::ALL {
        println!("{:<12} {}", dataset.as_str(), paths.get(dataset).display());
    }
    println!("Fetch time:  {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn run_import(args: ImportArgs) -> Result<()> {
    let mut config = args.datasets.into_config();
    config.city_feature_class = args.city_class;
    config.ignored_feature_codes = args.ignore_codes.into_iter().collect();
    config.batch_size = args.batch_size;
    config.channel_capacity = args.channel_capacity;
    config.rejects_path = args.rejects;

    // Open the destination before spending time on downloads.
    let sink = match (args.output, args.index_url) {
        (Some(path), _) => BatchingSink::spawn(
            JsonLinesWriter::create(&path)?,
            config.batch_size,
            config.channel_capacity,
        )?,
        (None, Some(base_url)) => {
            let index = SearchIndexConfig {
                base_url,
                index_name: args.index_name,
                app_id: args.app_id.context("--app-id (or GAZETTEER_APP_ID) is required")?,
                api_key: args
                    .api_key
                    .context("--api-key (or GAZETTEER_API_KEY) is required")?,
            };
            BatchingSink::spawn(
                SearchIndexWriter::connect(&index)?,
                config.batch_size,
                config.channel_capacity,
            )?
        }
        (None, None) => bail!("Nothing to import into: pass --output or --index-url"),
    };

    let start_fetch = Instant::now();
    let paths = fetch_datasets(&config)?;
    let fetch_duration = start_fetch.elapsed();
    info!(
        duration_secs = fetch_duration.as_secs_f64(),
        "Fetch complete"
    );

    let summary = pipeline::run(&paths, &config, sink)?;
    print_summary(&summary, fetch_duration.as_secs_f64());
    Ok(())
}

fn print_summary(summary: &RunSummary, fetch_secs: f64) {
    let stats = &summary.stats;
    println!();
    println!("=== Summary ===");
    println!("Fetch time:         {:.2}s", fetch_secs);
    println!(
        "Loading time:       {:.2}s",
        summary.loading_time.as_secs_f64()
    );
    println!(
        "Ingestion time:     {:.2}s",
        summary.ingestion_time.as_secs_f64()
    );
    println!(
        "Total time:         {:.2}s",
        fetch_secs + summary.total_time.as_secs_f64()
    );
    println!();
    println!("Admin1 regions:     {}", summary.tables.admin1);
    println!("Admin2 regions:     {}", summary.tables.admin2);
    println!("Countries:          {}", summary.tables.countries);
    println!("Postal codes:       {}", summary.tables.postal_codes);
    println!("Hierarchy edges:    {}", summary.tables.hierarchy_edges);
    println!();
    println!("Records read:       {}", stats.records_read);
    println!("Invalid records:    {}", stats.records_invalid);
    println!("Filtered out:       {}", stats.records_filtered);
    println!("Emitted directly:   {}", stats.cities_emitted);
    println!("Dup candidates:     {}", stats.duplicate_candidates);
    println!("Resolved emitted:   {}", stats.candidates_resolved);
    println!("Duplicates dropped: {}", stats.duplicates_dropped);
    println!("Cities emitted:     {}", stats.total_emitted());
    println!("Sink written:       {}", summary.sink.written);
    println!();
    println!("Validation errors:  {}", summary.errors.validation);
    println!("Parse errors:       {}", summary.errors.parse);
    println!("Read errors:        {}", summary.errors.read);
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Fetch(args) => run_fetch(args),
        Commands::Import(args) => run_import(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
