use std::path::PathBuf;

use clap::{Parser, Subcommand};

use txshield::abi_provider::StaticAbiProvider;
use txshield::config::{CliOverrides, ReplayConfig};
use txshield::onchain::rpc::JsonRpcClient;
use txshield::orchestrator;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a transaction, mutate it, and print the emitted protection
    /// rules as JSON.
    Replay(ReplayArgs),
    /// Reserved for the synchronizer integration; not yet implemented.
    Serve(ServeArgs),
}

#[derive(Parser, Debug)]
struct ReplayArgs {
    /// Transaction hash to replay, as a 0x-prefixed 32-byte hex string.
    tx_hash: String,

    /// Path to a TOML config file layered over the hard-coded defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a JSON ABI document used to resolve typed parameter schemas.
    #[arg(long)]
    abi: Option<PathBuf>,

    #[arg(long)]
    rpc_endpoint: Option<String>,

    #[arg(long)]
    chain_id: Option<u64>,

    #[arg(long)]
    worker_count: Option<usize>,

    #[arg(long)]
    deadline_secs: Option<u64>,

    #[arg(long)]
    max_success: Option<usize>,

    #[arg(long)]
    similarity_threshold: Option<f64>,
}

#[derive(Parser, Debug)]
struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,
}

fn parse_tx_hash(raw: &str) -> Result<[u8; 32], String> {
    let trimmed = raw.trim_start_matches("0x");
    let bytes = hex::decode(trimmed).map_err(|e| format!("invalid tx hash: {e}"))?;
    bytes
        .try_into()
        .map_err(|_| "tx hash must be 32 bytes".to_string())
}

fn replay_main(args: ReplayArgs) {
    let tx_hash = match parse_tx_hash(&args.tx_hash) {
        Ok(hash) => hash,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let mut config = match ReplayConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };
    config.apply_overrides(CliOverrides {
        rpc_endpoint: args.rpc_endpoint,
        chain_id: args.chain_id,
        worker_count: args.worker_count,
        deadline_secs: args.deadline_secs,
        max_success: args.max_success,
        similarity_threshold: args.similarity_threshold,
    });

    let abi_provider = args.abi.as_deref().map(|path| {
        StaticAbiProvider::from_file(path).unwrap_or_else(|e| {
            eprintln!("failed to load abi: {e}");
            std::process::exit(1);
        })
    });

    let rpc = JsonRpcClient::new(config.rpc_endpoint.clone());

    match orchestrator::run(
        tx_hash,
        &rpc,
        abi_provider.as_ref().map(|p| p as &dyn txshield::abi::AbiProvider),
        &config,
    ) {
        Ok(rules) => match serde_json::to_string_pretty(&rules) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("failed to serialize rules: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("replay failed: {e}");
            std::process::exit(1);
        }
    }
}

fn serve_main(args: ServeArgs) {
    eprintln!(
        "serve is reserved for the synchronizer integration and is not yet implemented (listen={})",
        args.listen
    );
    std::process::exit(1);
}

fn main() {
    txshield::logger::init();

    let args = Cli::parse();
    match args.command {
        Commands::Replay(args) => replay_main(args),
        Commands::Serve(args) => serve_main(args),
    }
}
