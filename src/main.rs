use clap::{Parser, Subcommand, ValueEnum};
use htf_imputation::config::Config;
use htf_imputation::model::MetricKind;
use htf_imputation::pipeline::Pipeline;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "htf-imputation",
    version,
    about = "Tide-gauge to coastal-county high tide flooding imputation"
)]
struct Cli {
    /// Path to the YAML configuration
    #[arg(short, long, default_value = "config/config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assign gauges to reference points and write the county mapping
    Map,
    /// Combine a saved mapping with a metric feed into county estimates
    Aggregate {
        #[arg(long, value_enum)]
        kind: Kind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Historical,
    Projected,
}

impl From<Kind> for MetricKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Historical => MetricKind::Historical,
            Kind::Projected => MetricKind::Projected,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,htf_imputation=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration: {}\n\n\
             Make sure:\n\
             1. {} exists (or pass --config)\n\
             2. All referenced environment variables are set\n\
             3. Create a .env file if needed",
            e,
            cli.config.display()
        )
    })?;
    info!("Configuration loaded from {}", cli.config.display());

    let pipeline = Pipeline::new(config)?;

    match cli.command {
        Command::Map => {
            pipeline.run_mapping().map_err(|e| {
                anyhow::anyhow!(
                    "Mapping run failed: {}\n\n\
                     Check that inputs.reference_points and inputs.stations point at \
                     readable files and that the station filter leaves enough stations \
                     for the selection mode.",
                    e
                )
            })?;
        }
        Command::Aggregate { kind } => {
            let kind = MetricKind::from(kind);
            pipeline.run_aggregation(kind).map_err(|e| {
                anyhow::anyhow!(
                    "{} aggregation failed: {}\n\n\
                     Run `htf-imputation map` first if {} does not exist yet.",
                    kind,
                    e,
                    pipeline.store().mapping_path().display()
                )
            })?;
        }
    }

    Ok(())
}
