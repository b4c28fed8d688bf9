use clap::{Parser, Subcommand};
use guild_store::{
    error::{ProviderError, ProviderResult},
    DataProvider, LogEvents, RedisStore, Scope, Settings, SledStore, StoreClient,
};
use serde_json::Value;
use std::sync::Arc;

/// guild_store: inspect and edit bot data from the command line.
#[derive(Parser)]
#[command(name = "guild_store", version, about, long_about = None)]
struct Cli {
    /// Guild to operate on. Omit for the global scope.
    #[arg(short, long, global = true)]
    guild: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value stored under a key.
    Get {
        key: String,

        /// JSON value to print when the key is missing.
        #[arg(short, long)]
        default: Option<String>,
    },

    /// Store a JSON value under a key.
    Set { key: String, value: String },

    /// Delete a key and print the value it held.
    Delete { key: String },

    /// Delete every key in the scope.
    Clear,
}

fn parse_json(raw: &str) -> ProviderResult<Value> {
    serde_json::from_str(raw)
        .map_err(|e| ProviderError::Validation(format!("'{}' is not valid JSON: {}", raw, e)))
}

fn print_value(value: Option<Value>) {
    match value {
        Some(value) => println!("{}", value),
        None => log::info!("No value found"),
    }
}

async fn run<S: StoreClient>(cli: Cli, provider: &DataProvider<S>) -> ProviderResult<()> {
    let scope = Scope::from(cli.guild.as_deref());

    match cli.command {
        Commands::Get { key, default } => {
            let value = match default {
                Some(default) => Some(provider.get_or(scope, &key, parse_json(&default)?).await?),
                None => provider.get_value(scope, &key).await?,
            };
            print_value(value);
        }
        Commands::Set { key, value } => {
            provider.set_value(scope, &key, Some(parse_json(&value)?)).await?;
        }
        Commands::Delete { key } => {
            print_value(provider.delete_value(scope, &key).await?);
        }
        Commands::Clear => provider.clear(scope).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ProviderResult<()> {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();

    // Load settings
    let settings = Settings::load()?;

    match settings.redis_options() {
        Some(options) => {
            let provider: DataProvider<RedisStore> = DataProvider::new(Arc::new(LogEvents), options);
            session(cli, &provider).await
        }
        None => {
            let provider: DataProvider<SledStore> =
                DataProvider::new(Arc::new(LogEvents), settings.sled_options());
            session(cli, &provider).await
        }
    }
}

async fn session<S: StoreClient>(cli: Cli, provider: &DataProvider<S>) -> ProviderResult<()> {
    provider.init().await?;

    let result = run(cli, provider).await;
    provider.destroy().await?;

    result
}
