use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cmip_data_retriever::app::{App, DownloadOptions};
use cmip_data_retriever::config::ConfigLoader;
use cmip_data_retriever::error::CmipError;
use cmip_data_retriever::esgf::EsgfHttpClient;
use cmip_data_retriever::fetch::{Fetcher, HttpTransport, RetryPolicy};
use cmip_data_retriever::output::{ConsoleOutput, JsonOutput};
use cmip_data_retriever::region::{Region, RegionSpec};
use cmip_data_retriever::report::write_csv;
use cmip_data_retriever::store::DataStore;

#[derive(Parser)]
#[command(name = "cmip-dr")]
#[command(about = "Discover, filter, and download CMIP6 model output from the ESGF archive")]
#[command(version, author)]
struct Cli {
    /// Path to the config file (defaults to cmip-dr.json in the current
    /// directory).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the model catalog as JSON")]
    Catalog(CatalogArgs),
    #[command(about = "Write the model summary table as CSV")]
    Table(TableArgs),
    #[command(about = "Download all files matching the filtered catalog")]
    Download(DownloadArgs),
}

#[derive(Args)]
struct CatalogArgs {
    /// Apply the completeness filter before printing.
    #[arg(long)]
    filtered: bool,
}

#[derive(Args)]
struct TableArgs {
    #[arg(long, default_value = "model_info.csv")]
    out: PathBuf,
}

#[derive(Args)]
struct DownloadArgs {
    /// Models to exclude from the download.
    #[arg(long)]
    skip: Vec<String>,

    /// Restrict the download to these models.
    #[arg(long)]
    select: Vec<String>,

    /// Crop region name, overriding the config entry.
    #[arg(long)]
    region: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(cmip) = report.downcast_ref::<CmipError>() {
            return ExitCode::from(map_exit_code(cmip));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CmipError) -> u8 {
    match error {
        CmipError::MissingConfig
        | CmipError::ConfigRead(_)
        | CmipError::ConfigParse(_)
        | CmipError::EmptyRequest(_)
        | CmipError::UnknownRegion(_)
        | CmipError::InvalidRegion(_) => 2,
        CmipError::SearchHttp(_)
        | CmipError::SearchStatus { .. }
        | CmipError::SearchParse(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    let search = EsgfHttpClient::new()?;
    let transport = HttpTransport::new()?;
    let fetcher = Fetcher::new(transport, RetryPolicy::default());
    let store = DataStore::new(config.data_root.clone());
    let mut app = App::new(search, fetcher, store, config);

    match cli.command {
        Commands::Catalog(args) => {
            let catalog = if args.filtered {
                app.filtered_catalog()?
            } else {
                app.catalog()?
            };
            JsonOutput::print(catalog).into_diagnostic()?;
        }
        Commands::Table(args) => {
            let rows = app.summary()?;
            write_csv(&rows, &args.out)?;
            println!("wrote {} rows to {}", rows.len(), args.out.display());
        }
        Commands::Download(args) => {
            let region = match args.region {
                Some(name) => Some(Region::resolve(&RegionSpec::Named(name))?),
                None => app.config().region.clone(),
            };
            let options = DownloadOptions {
                skip: args.skip,
                select: args.select,
                region,
            };
            app.download(&options, &ConsoleOutput)?;
        }
    }
    Ok(())
}
