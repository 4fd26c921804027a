mod repl;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strainwise_config::AppConfig;
use strainwise_llm::OpenAiClient;
use strainwise_runtime::kv::API_KEY_KEY;
use strainwise_runtime::{ChatEngine, FileDocumentStore, FileKvStore, KvStore};

#[derive(Debug, Parser)]
#[command(
    name = "strainwise",
    version,
    about = "Cannabis genetics assistant with a cached conversation memory"
)]
struct Cli {
    /// Config file path. Defaults to <data-dir>/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// User identity the memory and analytics are keyed on.
    #[arg(long, default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive chat session (the default).
    Chat,
    /// Print cache statistics for the user and exit.
    Stats,
    /// Store the completion-API key in the local key-value store.
    SetKey {
        #[arg(value_name = "KEY")]
        key: String,
    },
    /// Write the default config file and exit.
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(".strainwise").join("config.toml"));
    let config = AppConfig::load_from(&config_path)
        .with_context(|| format!("load config from {}", config_path.display()))?;

    init_tracing(&config);

    let data_dir = PathBuf::from(&config.storage.data_dir);
    let kv = Arc::new(FileKvStore::open(data_dir.join("kv.json"))?);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::InitConfig => {
            config.save_to(&config_path)?;
            println!("wrote {}", config_path.display());
            Ok(())
        }
        Commands::SetKey { key } => {
            kv.set(API_KEY_KEY, &key).await?;
            println!("API key stored");
            Ok(())
        }
        Commands::Stats => {
            let engine = build_engine(config, &data_dir, kv, &cli.user).await?;
            let stats = engine.cache_stats().await?;
            print!("{}", repl::render_stats(&stats));
            Ok(())
        }
        Commands::Chat => {
            let engine = build_engine(config, &data_dir, kv, &cli.user).await?;
            repl::run(engine).await
        }
    }
}

async fn build_engine(
    config: AppConfig,
    data_dir: &Path,
    kv: Arc<FileKvStore>,
    user: &str,
) -> Result<ChatEngine> {
    let store = Arc::new(
        FileDocumentStore::open(data_dir)
            .with_context(|| format!("open document store in {}", data_dir.display()))?,
    );

    // Env credential wins over the stored one.
    let api_key = match env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Some(key),
        _ => kv.get(API_KEY_KEY).await?,
    };
    let client = Arc::new(OpenAiClient::new(config.llm.clone(), api_key));

    Ok(ChatEngine::new(config, store, client, kv, user))
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.telemetry.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
