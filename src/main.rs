use clap::{Parser, Subcommand, builder::styling};
use eyre::Result;
use owo_colors::OwoColorize;
use shopify_extractor::{
    cli::{run_extraction, test_authorization},
    config::RunConfig,
};
use std::path::PathBuf;

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// Shopify Extractor: --{shopex}-> flattens orders, products and customers into CSV tables
#[derive(Parser)]
#[command(name = "shopex", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source credentials from
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test authorization to a Shopify shop
    Auth,

    /// Extract resources from a Shopify shop into tables
    Run {
        /// A YAML run configuration; defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Start of the period, overriding the configuration
        #[arg(long)]
        since: Option<String>,

        /// End of the period, overriding the configuration
        #[arg(long)]
        until: Option<String>,

        /// Directory to write tables to, overriding the configuration
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(e) = dotenvy::from_filename(&cli.env)
        && !e.not_found()
    {
        return Err(e.into());
    }

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    match cli.command {
        Commands::Auth => {
            log::info!("Testing authorization");
            test_authorization().await?;
        }
        Commands::Run {
            config,
            since,
            until,
            output_dir,
        } => {
            let mut run_config = RunConfig::load(config.as_ref())?;
            if let Some(since) = since {
                run_config.date_since = since;
            }
            if let Some(until) = until {
                run_config.date_to = until;
            }
            if let Some(output_dir) = output_dir {
                run_config.output_dir = output_dir;
            }
            run_config.validate()?;

            log::info!(
                "Running extraction with {}",
                config
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "default settings".to_string())
                    .bright_black()
            );
            run_extraction(&run_config).await?;
        }
    }

    Ok(())
}
