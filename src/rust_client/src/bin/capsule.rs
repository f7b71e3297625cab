use std::{env, path::PathBuf};

use anyhow::{bail, Context, Result};
use capsule_client::{
    address::parse_account_id,
    dispatch::{decode_destination_address, evm_address},
    lifecycle::CapsuleState,
    registry::{CreatedCapsule, DiscoveredCapsule},
    rpc::lamports_to_sol,
    wallet::read_keypair,
    AddressDeriver, AddressScheme, CapsuleRegistryClient, ClientConfig, DispatchCoordinator,
    EndpointResolver, LedgerRpc, WalletSigner,
};
use chrono::{TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use solana_client::rpc_client::RpcClient;
use solana_program::clock::UnixTimestamp;
use solana_sdk::signature::Keypair;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "capsule")]
#[command(about = "Create, list and unlock Time Capsules", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// JSON client configuration; built-in devnet defaults when absent
    #[arg(long, global = true, env = "CAPSULE_CONFIG")]
    config: Option<PathBuf>,

    /// Keypair file in the Solana CLI format (default ~/.config/solana/id.json)
    #[arg(long, global = true, env = "CAPSULE_KEYPAIR")]
    keypair: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Release {
    /// Seconds from now until the capsule can be unlocked
    #[arg(long, conflicts_with = "unlock_at")]
    unlock_in: Option<i64>,

    /// Unix timestamp from which the capsule can be unlocked
    #[arg(long)]
    unlock_at: Option<UnixTimestamp>,

    /// Destination chain notified on unlock (default from the config)
    #[arg(long)]
    chain: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the program's manager account if it does not exist
    Init,

    /// Lock a text message
    CreateText {
        message: String,

        #[command(flatten)]
        release: Release,
    },

    /// Lock SPL tokens from the wallet's associated token account
    CreateToken {
        #[arg(long)]
        mint: String,

        /// Amount in base units
        #[arg(long)]
        amount: u64,

        #[command(flatten)]
        release: Release,
    },

    /// List the capsules of an owner
    List {
        /// Owner to list (default: the keypair's account)
        #[arg(long)]
        owner: Option<String>,
    },

    /// Unlock a capsule and notify its destination chain
    Unlock { address: String },

    /// Print derived addresses and the wallet balance
    Address {
        #[arg(long)]
        owner: Option<String>,

        /// Print the indexed capsule address at this index
        #[arg(long)]
        index: Option<u64>,
    },

    /// List the configured destination chains
    Chains,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load(cli.config.as_deref()).context("loading configuration")?;
    debug!(endpoints = ?config.endpoints, "configuration loaded");

    match cli.command {
        Commands::Chains => {
            let deriver = AddressDeriver::new(config.program_id()?);
            let dispatch = DispatchCoordinator::new(&config, deriver)?;
            for (key, wire_chain_id, has_receiver) in dispatch.chains() {
                let marker = if key == config.default_chain { "*" } else { " " };
                let receiver = if has_receiver { "" } else { " (no receiver contract)" };
                println!("{marker} {key:<20} {wire_chain_id}{receiver}");
            }
        }
        Commands::Address { owner, index } => {
            let owner = match owner {
                Some(owner) => parse_account_id(&owner)?,
                None => load_wallet(cli.keypair)?.pubkey(),
            };
            let deriver = AddressDeriver::new(config.program_id()?);
            println!("Owner:           {owner}");
            println!("Manager:         {}", deriver.manager_address());
            println!("Simple capsule:  {}", deriver.simple_capsule_address(&owner));
            if let Some(index) = index {
                println!("Capsule #{index:<6}  {}", deriver.capsule_address(&owner, index));
            }
            let connection = EndpointResolver::from_config(&config).resolve()?;
            let balance = connection.ledger.balance(&owner)?;
            println!("Balance:         {} SOL", lamports_to_sol(balance));
        }
        Commands::Init => {
            let (wallet, client) = connect(&config, cli.keypair)?;
            let manager = client.initialize_manager(&wallet)?;
            println!(
                "Manager {} ready, {} capsules created",
                client.deriver().manager_address(),
                manager.capsule_count
            );
        }
        Commands::CreateText { message, release } => {
            let (wallet, mut client) = connect(&config, cli.keypair)?;
            let release_timestamp = resolve_release(&release, client.now())?;
            let chain = release.chain.as_deref().unwrap_or(&config.default_chain);
            let created = client.create_text_capsule(&wallet, &message, release_timestamp, chain)?;
            print_created(&created, release_timestamp);
        }
        Commands::CreateToken {
            mint,
            amount,
            release,
        } => {
            let mint = parse_account_id(&mint)?;
            let (wallet, mut client) = connect(&config, cli.keypair)?;
            let release_timestamp = resolve_release(&release, client.now())?;
            let chain = release.chain.as_deref().unwrap_or(&config.default_chain);
            let created =
                client.create_token_capsule(&wallet, &mint, amount, release_timestamp, chain)?;
            print_created(&created, release_timestamp);
        }
        Commands::List { owner } => {
            let (wallet, mut client) = connect(&config, cli.keypair)?;
            let owner = match owner {
                Some(owner) => parse_account_id(&owner)?,
                None => wallet.pubkey(),
            };
            let discovery = client.discover_all(&owner)?;
            if discovery.capsules.is_empty() {
                println!("No capsules for {owner}");
            }
            for capsule in &discovery.capsules {
                print_capsule(&client, capsule);
            }
            for address in &discovery.skipped {
                println!("{address}  could not be read, try again later");
            }
        }
        Commands::Unlock { address } => {
            let address = parse_account_id(&address)?;
            let (wallet, mut client) = connect(&config, cli.keypair)?;
            let receipt = client.unlock(&wallet, &address)?;
            println!(
                "Capsule {} unlocked at {}",
                receipt.address,
                format_timestamp(receipt.unlocked_at)
            );
            match receipt.signature {
                Some(signature) => println!("Signature {signature}"),
                None => println!("Unlocked by an earlier submission"),
            }
            if let Some(capsule) = client.cached(&address) {
                println!("Content: {}", capsule.record.content);
            }
        }
    }
    Ok(())
}

fn connect(
    config: &ClientConfig,
    keypair: Option<PathBuf>,
) -> Result<(Keypair, CapsuleRegistryClient<RpcClient>)> {
    let wallet = load_wallet(keypair)?;
    let connection = EndpointResolver::from_config(config).resolve()?;
    println!("Endpoint: {}", connection.endpoint);
    let client = CapsuleRegistryClient::new(config, connection.ledger)?;
    Ok((wallet, client))
}

fn print_created(created: &CreatedCapsule, release_timestamp: UnixTimestamp) {
    println!("Capsule {} created ({})", created.address, describe_scheme(created.scheme));
    println!("Unlocks {} via {}", format_timestamp(release_timestamp), created.target.chain_key);
    match created.signature {
        Some(signature) => println!("Signature {signature}"),
        None => println!("Created by an earlier submission"),
    }
}

fn load_wallet(path: Option<PathBuf>) -> Result<Keypair> {
    let path = match path {
        Some(path) => path,
        None => {
            let home = env::var("HOME").context("HOME is not set, pass --keypair")?;
            PathBuf::from(home).join(".config/solana/id.json")
        }
    };
    read_keypair(&path).with_context(|| format!("reading keypair {}", path.display()))
}

fn resolve_release(release: &Release, now: UnixTimestamp) -> Result<UnixTimestamp> {
    match (release.unlock_in, release.unlock_at) {
        (Some(seconds), _) => now
            .checked_add(seconds)
            .context("--unlock-in is out of range"),
        (None, Some(at)) => Ok(at),
        (None, None) => bail!("pass --unlock-in or --unlock-at"),
    }
}

fn describe_scheme(scheme: AddressScheme) -> String {
    match scheme {
        AddressScheme::Simple => "simple address".to_string(),
        AddressScheme::Indexed(index) => format!("indexed address #{index}"),
    }
}

fn format_timestamp(timestamp: UnixTimestamp) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|date| date.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn print_capsule<L: LedgerRpc>(client: &CapsuleRegistryClient<L>, found: &DiscoveredCapsule) {
    let record = &found.capsule.record;
    if found.capsule.is_error_state {
        println!("{}  unreadable account", found.address());
        return;
    }

    let status = match found.state {
        CapsuleState::Locked => format!("{}, {}s left", found.state, found.seconds_until_unlock),
        state => state.to_string(),
    };
    let chain = client
        .dispatch()
        .chain_key_for_id(record.destination_chain_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("chain {}", record.destination_chain_id));
    let receiver = evm_address(&record.destination_address)
        .unwrap_or_else(|| decode_destination_address(&record.destination_address));

    println!("{}  [{}] {:?}", found.address(), status, record.capsule_type);
    println!("    releases  {}", format_timestamp(record.release_timestamp));
    println!("    notifies  {chain} {receiver}");
    if record.is_token() {
        if let (Some(mint), Some(amount)) = (record.token_mint, record.token_amount) {
            println!("    holds     {amount} of {mint}");
        }
    } else {
        println!("    content   {}", found.visible_content());
    }
}
