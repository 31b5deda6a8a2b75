use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use gsec::authz::{AccessOptions, AccessRequest, Principal};
use gsec::data::NoInstances;
use gsec::store::SqlitePolicyStore;
use gsec::{db, security, GroupSecurity, ModelRegistry, SecurityOptions};

#[derive(Parser, Debug)]
#[command(author, version, about = "group-scoped access control tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile security settings and print the resulting profiles as JSON
    Compile {
        /// Security options file; falls back to GSEC_CONFIG
        #[arg(long)]
        options: Option<PathBuf>,
        /// Model definitions file
        #[arg(long)]
        models: PathBuf,
    },
    /// Apply policy-store migrations to DATABASE_URL
    Migrate,
    /// Evaluate one access decision against the store in DATABASE_URL
    Check {
        #[arg(long)]
        options: Option<PathBuf>,
        #[arg(long)]
        models: PathBuf,
        #[arg(long)]
        principal: Option<String>,
        #[arg(long)]
        model: String,
        #[arg(long)]
        method: String,
        #[arg(long)]
        id: Option<String>,
        /// JSON payload of the call
        #[arg(long)]
        payload: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile { options, models } => {
            let registry = ModelRegistry::from_file(&models)?;
            let policy = security::compile(&registry, load_options(options)?)?;
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }
        Commands::Migrate => {
            db::init().await?;
            println!("Migrations applied");
        }
        Commands::Check {
            options,
            models,
            principal,
            model,
            method,
            id,
            payload,
        } => {
            let registry = ModelRegistry::from_file(&models)?;
            let pool = db::init().await?;
            let sec = GroupSecurity::boot(
                registry,
                load_options(options)?,
                Arc::new(SqlitePolicyStore::new(pool)),
                Arc::new(NoInstances),
            )
            .await?;

            let mut request = AccessRequest::new(model, method).with_options(AccessOptions::default());
            request.principal = principal.map(Principal::new);
            request.instance_id = id;
            if let Some(payload) = payload {
                request.payload = Some(serde_json::from_str(&payload).context("payload is not valid JSON")?);
            }

            let decision = sec.check_access(&request).await?;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
    }

    Ok(())
}

fn load_options(path: Option<PathBuf>) -> anyhow::Result<SecurityOptions> {
    let options = match path {
        Some(path) => SecurityOptions::from_file(&path)
            .with_context(|| format!("failed to load options from {}", path.display()))?,
        None => SecurityOptions::from_env()?,
    };
    Ok(options)
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
