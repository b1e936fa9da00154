use crate::infra::build_pipeline;
use crate::report;
use crate::server;
use clap::{Args, Parser, Subcommand, ValueEnum};
use valorimob::config::AppConfig;
use valorimob::error::AppError;
use valorimob::telemetry;
use valorimob::SourceKind;

#[derive(Parser, Debug)]
#[command(
    name = "valorimob",
    about = "Run the neighborhood valuation pipeline and serve its ranking",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every stage in order (default command)
    Run,
    /// Fetch raw partitions and stage the raw datasets
    Ingest(IngestArgs),
    /// Derive the analysis table from the staged raw datasets
    Derive,
    /// Train the valuation model and score the held-out rows
    Train,
    /// Rank neighborhoods from the scored rows
    Rank,
    /// Serve the staged ranking over HTTP
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Which source to ingest
    #[arg(long, value_enum, default_value_t = SourceSelection::All)]
    source: SourceSelection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SourceSelection {
    Listings,
    Historical,
    All,
}

impl SourceSelection {
    fn kind(self) -> Option<SourceKind> {
        match self {
            SourceSelection::Listings => Some(SourceKind::Listings),
            SourceSelection::Historical => Some(SourceKind::Historical),
            SourceSelection::All => None,
        }
    }
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    match command {
        Command::Serve(args) => return server::run(config, args).await,
        Command::Run => report::render_run(&build_pipeline(&config)?.run().await?),
        Command::Ingest(args) => {
            let pipeline = build_pipeline(&config)?;
            report::render_sources(&pipeline.ingest(args.source.kind()).await?)
        }
        Command::Derive => report::render_derived(&build_pipeline(&config)?.derive().await?),
        Command::Train => report::render_trained(&build_pipeline(&config)?.train().await?),
        Command::Rank => report::render_ranking(&build_pipeline(&config)?.rank().await?),
    }
    Ok(())
}
