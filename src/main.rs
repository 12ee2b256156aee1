//! Command-line interface for seal-runner
//!
//! # Usage Examples
//!
//! ## Run jobs
//! ```bash
//! # Consume "vehicles" and "trips", routing each topic to a service
//! seal-runner serve \
//!   --brokers localhost:9092 \
//!   --schema-registries http://localhost:8081 \
//!   --topics vehicles,trips \
//!   --route vehicles=cars --route trips=routes
//!
//! # Same, with settings from a file and failing messages left unmarked
//! seal-runner --config runner.toml serve --on-error stop --max-retries 5
//! ```
//!
//! ## Publish
//! ```bash
//! # String value with the "string" schema on topic "test"
//! seal-runner kafka producer key-1 hello
//!
//! # Record value as JSON
//! seal-runner kafka producer trip-1 '{"from":"Oslo","to":"Bergen","stops":[]}' \
//!   --topic trips --schema "$(cat route.avsc)"
//! ```
//!
//! ## Exit Codes
//! - `0`: clean shutdown
//! - `1`: startup or runtime error
//! - `2`: the Kafka transport could not be closed

use clap::{Parser, Subcommand};
use seal_runner::commands::{produce, serve, services};
use seal_runner::{ConfigFile, GlobalOpts, LogSettings, ProduceArgs, ServeArgs};

#[derive(Parser)]
#[command(name = "seal-runner")]
#[command(about = "Runs jobs for Avro messages consumed from Kafka")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the configured topics and run a job per message
    Serve(ServeArgs),

    /// Kafka tools
    Kafka {
        #[command(subcommand)]
        command: KafkaCommand,
    },

    /// Inspect the built-in services
    Services {
        #[command(subcommand)]
        command: ServicesCommand,
    },
}

#[derive(Subcommand)]
enum KafkaCommand {
    /// Publish one message
    Producer(ProduceArgs),
}

#[derive(Subcommand)]
enum ServicesCommand {
    /// Print every service manifest as JSON
    List,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(seal_runner::exit_code(&e));
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file = ConfigFile::load_optional(cli.global.config.as_deref())?;
    seal_runner::logging::init(&LogSettings::resolve(&cli.global.log, &file.log))?;

    match cli.command {
        Commands::Serve(args) => serve::run(&args, &file).await,
        Commands::Kafka {
            command: KafkaCommand::Producer(args),
        } => produce::run(&args, &file).await,
        Commands::Services {
            command: ServicesCommand::List,
        } => {
            println!("{}", services::list(&file)?);
            Ok(())
        }
    }
}
