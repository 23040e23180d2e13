use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use ferrum_core::{Account, AccountId, Genesis, Tx};
use ferrum_wallet::WalletStore;

#[derive(Parser)]
#[command(name = "ferrum", version, about = "ferrum node and wallet CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Genesis file management.
    Genesis {
        #[command(subcommand)]
        cmd: GenesisCmd,
    },
    /// Node operations.
    Node {
        #[command(subcommand)]
        cmd: NodeCmd,
    },
    /// Wallet key management and transaction submission.
    Wallet {
        #[command(subcommand)]
        cmd: WalletCmd,
    },
}

#[derive(Subcommand)]
enum GenesisCmd {
    /// Write an example genesis file to the given path.
    Init {
        #[arg(long, default_value = "genesis.json")]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum NodeCmd {
    /// Start the node: loads `ferrum-config` from the environment, loads
    /// the genesis file, and runs until shutdown.
    Start {
        #[arg(long, default_value = "genesis.json")]
        genesis: PathBuf,
    },
}

#[derive(Subcommand)]
enum WalletCmd {
    /// Generate a new key file.
    New {
        #[arg(long)]
        name: String,
    },
    /// List every key file in the wallet directory.
    List,
    /// Build, sign, and submit a transaction to a node's public API.
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        value: u64,
        #[arg(long, default_value_t = 0)]
        tip: u64,
        #[arg(long)]
        chain_id: u16,
        #[arg(long, default_value = "http://0.0.0.0:3000")]
        node: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Genesis { cmd } => match cmd {
            GenesisCmd::Init { path } => genesis_init(path)?,
        },
        Commands::Node { cmd } => match cmd {
            NodeCmd::Start { genesis } => {
                let rt = tokio::runtime::Runtime::new()?;
                rt.block_on(async move {
                    let config = ferrum_config::FerrumConfig::load()?;
                    ferrum_node::run(config, genesis).await
                })?;
            }
        },
        Commands::Wallet { cmd } => match cmd {
            WalletCmd::New { name } => {
                let store = WalletStore::new(wallet_dir()?)?;
                let wallet = store.create(&name)?;
                println!("created wallet {} address {}", wallet.name, wallet.account_id);
            }
            WalletCmd::List => {
                let store = WalletStore::new(wallet_dir()?)?;
                for w in store.list()? {
                    println!("{} -> {}", w.name, w.account_id);
                }
            }
            WalletCmd::Send { from, to, value, tip, chain_id, node } => {
                let rt = tokio::runtime::Runtime::new()?;
                rt.block_on(wallet_send(from, to, value, tip, chain_id, node))?;
            }
        },
    }
    Ok(())
}

fn genesis_init(path: PathBuf) -> Result<()> {
    if path.exists() {
        println!("genesis file already exists at {path:?}");
        return Ok(());
    }
    let genesis = Genesis {
        date: chrono::Utc::now().to_rfc3339(),
        chain_id: 1,
        transactions_per_block: 100,
        difficulty: 2,
        mining_reward: 100,
        gas_price: 1,
        balances: Default::default(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(&genesis)?)
        .with_context(|| format!("writing genesis file {path:?}"))?;
    println!("wrote genesis file to {path:?}");
    Ok(())
}

/// Loads the signing key by name, reads the sender's current nonce from the
/// node's public API, builds and signs a `Tx`, and POSTs it for submission.
async fn wallet_send(from: String, to: String, value: u64, tip: u64, chain_id: u16, node: String) -> Result<()> {
    let store = WalletStore::new(wallet_dir()?)?;
    let wallet = store.load(&from)?;

    let client = reqwest::Client::new();
    let account: Account = client
        .get(format!("{node}/v1/accounts/{}", wallet.account_id))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let tx = Tx {
        chain_id,
        nonce: account.nonce + 1,
        from: wallet.account_id.clone(),
        to: AccountId::new(to)?,
        value,
        tip,
        data: Vec::new(),
    };
    let signed = tx.sign(&wallet.secret_key).map_err(|e| anyhow!(e.to_string()))?;

    let resp = client
        .post(format!("{node}/v1/tx/submit"))
        .json(&signed)
        .send()
        .await?;

    if resp.status().is_success() {
        println!("submitted tx from {} nonce {}", wallet.account_id, signed.tx.nonce);
        Ok(())
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(anyhow!("node rejected tx: {status}: {body}"))
    }
}

fn wallet_dir() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".ferrum")
        .join("wallets");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
