use clap::Parser;
use log::{error, LevelFilter};
use pow_ledger::{
    convert_address, hash_pub_key, validate_address, Block, Blockchain, BlockchainError,
    ChainStore, Command, Config, Opt, SledStore, Transaction, UTXOSet, Wallets,
};
use serde::Serialize;
use std::fs;
use std::process;
use std::sync::Arc;

fn main() {
    // Info by default, RUST_LOG still wins
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();
    if let Err(e) = run(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(opt.config.as_deref())?;
    run_command(&config, opt.command)
}

fn open_store(config: &Config) -> pow_ledger::Result<Arc<dyn ChainStore>> {
    fs::create_dir_all(config.get_data_dir())?;
    Ok(Arc::new(SledStore::open(&config.chain_path())?))
}

fn open_blockchain(config: &Config) -> pow_ledger::Result<Blockchain> {
    Blockchain::open(open_store(config)?, config.get_difficulty_bits())
}

fn run_command(config: &Config, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err(BlockchainError::InvalidAddress(address).into());
            }
            let blockchain = Blockchain::create_blockchain(
                open_store(config)?,
                &address,
                config.get_difficulty_bits(),
            )?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::open(&config.wallet_path())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            if !validate_address(&address) {
                return Err(BlockchainError::InvalidAddress(address).into());
            }
            let utxo_set = UTXOSet::new(open_blockchain(config)?);
            let balance = utxo_set.get_balance(&address)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::open(&config.wallet_path())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send { from, to, amount } => {
            let wallets = Wallets::open(&config.wallet_path())?;
            let utxo_set = UTXOSet::new(open_blockchain(config)?);

            let transaction =
                Transaction::new_utxo_transaction(&from, &to, amount, &wallets, &utxo_set)?;
            let block = utxo_set.mine_block(&[transaction])?;
            println!("Success! Mined block {}", block.get_hash())
        }
        Command::Printchain { json } => {
            let blocks = open_blockchain(config)?.iterator();
            if json {
                let views: Vec<BlockView> = blocks.map(|block| BlockView::from(&block)).collect();
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                for block in blocks {
                    print_block(&block);
                }
            }
        }
        Command::Reindexutxo => {
            let utxo_set = UTXOSet::new(open_blockchain(config)?);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::Validatechain => {
            let blockchain = open_blockchain(config)?;
            if !blockchain.validate_chain()? {
                return Err(BlockchainError::InvalidBlock(
                    "Chain validation failed".to_string(),
                )
                .into());
            }
            println!("Chain is valid.");
        }
    }
    Ok(())
}

fn print_block(block: &Block) {
    let view = BlockView::from(block);
    println!("Pre block hash: {}", view.pre_block_hash);
    println!("Cur block hash: {}", view.hash);
    println!("Cur block Timestamp: {}", view.timestamp);
    println!("Nonce: {}", view.nonce);
    for tx in &view.transactions {
        println!("- Transaction txid_hex: {}", tx.id);
        for input in &tx.inputs {
            match &input.from {
                Some(from) => println!(
                    "-- Input txid = {}, vout = {}, from = {from}",
                    input.txid, input.vout
                ),
                None => println!("-- Coinbase input"),
            }
        }
        for output in &tx.outputs {
            println!("-- Output value = {}, to = {}", output.value, output.to)
        }
    }
    println!()
}

#[derive(Serialize)]
struct BlockView {
    hash: String,
    pre_block_hash: String,
    timestamp: i64,
    nonce: u64,
    transactions: Vec<TransactionView>,
}

#[derive(Serialize)]
struct TransactionView {
    id: String,
    coinbase: bool,
    inputs: Vec<InputView>,
    outputs: Vec<OutputView>,
}

#[derive(Serialize)]
struct InputView {
    txid: String,
    vout: i32,
    from: Option<String>,
}

#[derive(Serialize)]
struct OutputView {
    value: u64,
    to: String,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        BlockView {
            hash: block.get_hash().to_string(),
            pre_block_hash: block.get_pre_block_hash().to_string(),
            timestamp: block.get_timestamp(),
            nonce: block.get_nonce(),
            transactions: block
                .get_transactions()
                .iter()
                .map(TransactionView::from)
                .collect(),
        }
    }
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        TransactionView {
            id: tx.get_id_hex(),
            coinbase: tx.is_coinbase(),
            inputs: tx
                .get_vin()
                .iter()
                .map(|input| InputView {
                    txid: input.get_txid_hex(),
                    vout: input.get_vout(),
                    from: input
                        .get_pub_key()
                        .map(|pub_key| convert_address(hash_pub_key(pub_key).as_slice())),
                })
                .collect(),
            outputs: tx
                .get_vout()
                .iter()
                .map(|output| OutputView {
                    value: output.get_value(),
                    to: convert_address(output.get_pub_key_hash()),
                })
                .collect(),
        }
    }
}
