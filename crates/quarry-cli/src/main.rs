use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quarry_core::QuarryConfig;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "quarry.yaml";

#[derive(Parser, Debug)]
#[command(name = "quarry", version, about = "Quarry query synthesis and validation engine")]
struct Cli {
    /// Path to quarry.yaml. Defaults to ./quarry.yaml when present.
    #[arg(long, short, global = true, env = "QUARRY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a structured request (YAML or JSON) to SQL and apply the rewrite passes.
    Synthesize {
        /// Request file.
        request: PathBuf,

        /// Print the synthesized SQL before rewriting.
        #[arg(long, default_value_t = false)]
        raw: bool,
    },

    /// Rewrite a SQL statement and run the read-only guard on the result.
    Rewrite {
        /// Statement text. Read from --file or stdin when omitted.
        sql: Option<String>,

        #[arg(long, conflicts_with = "sql")]
        file: Option<PathBuf>,
    },

    /// Build a validated query against a schema snapshot.
    Build {
        /// Schema snapshot (YAML or JSON).
        #[arg(long)]
        schema: PathBuf,

        /// Structured request file.
        #[arg(long, conflicts_with = "text", required_unless_present = "text")]
        request: Option<PathBuf>,

        /// Free-text request for the model path.
        #[arg(long)]
        text: Option<String>,

        /// Model id (defaults to ai.default_model).
        #[arg(long)]
        model: Option<String>,

        /// Print the full build result as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Suggest the column a rejected identifier most likely meant.
    Repair {
        /// The identifier the database rejected.
        name: String,

        /// Relation the identifier belongs to.
        #[arg(long)]
        relation: String,

        /// Schema snapshot (YAML or JSON).
        #[arg(long)]
        schema: PathBuf,
    },

    /// Validate configuration, policy and an optional schema snapshot.
    Check {
        #[arg(long)]
        schema: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<QuarryConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => PathBuf::from(DEFAULT_CONFIG_FILE),
        None => return Ok(QuarryConfig::default()),
    };
    QuarryConfig::load_with_context(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        // `check` reports config problems itself instead of failing to start.
        Command::Check { schema } => {
            init_tracing("warn");
            commands::check::run_check(cli.config.as_deref(), schema.as_deref())?;
        }
        cmd => {
            let config = load_config(cli.config.as_deref())?;
            init_tracing(&config.logging.level);
            run(cmd, &config).await?;
        }
    }

    Ok(())
}

async fn run(cmd: Command, config: &QuarryConfig) -> Result<()> {
    match cmd {
        Command::Synthesize { request, raw } => commands::query::run_synthesize(config, &request, raw),
        Command::Rewrite { sql, file } => commands::query::run_rewrite(config, sql, file.as_deref()),
        Command::Build {
            schema,
            request,
            text,
            model,
            json,
        } => {
            let input = commands::query::BuildInput {
                schema,
                request,
                text,
                model,
                json,
            };
            commands::query::run_build(config, input).await
        }
        Command::Repair {
            name,
            relation,
            schema,
        } => commands::query::run_repair(&name, &relation, &schema),
        Command::Check { schema } => {
            commands::check::report(&commands::check::check_config(config, schema.as_deref()))
        }
    }
}
