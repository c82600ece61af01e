use clap::{Parser, Subcommand};

pub const DEFAULT_URL: &str = "http://node002.testnet.mile.global/v1/api";

const METHODS_HELP: &str = "\
Methods for `call`:
  ping
  get-blockchain-info
  get-blockchain-state
  get-network-state
  get-nodes
  get-current-block-id
  get-block                --params '{\"id\": 1}'
  get-wallet-state         --params '{\"public-key\": \"...\"}'
  get-wallet-transactions  --params '{\"public-key\": \"...\", \"limit\": 10}'
  send-transfer            --params '{\"private-key\": \"...\", \"to\": \"...\", \"amount\": \"100\", \"asset-code\": 1, \"description\": \"...\"}'
  send-emission            --params '{\"private-key\": \"...\", \"to\": \"...\", \"amount\": \"100\", \"asset-code\": 1}'
  register-node            --params '{\"private-key\": \"...\", \"address\": \"...\", \"amount\": \"10000\", \"asset-code\": 0}'
  unregister-node          --params '{\"private-key\": \"...\"}'";

/// mile-wallet: query a MILE node and send signed transactions.
#[derive(Debug, Parser)]
#[command(version, about, after_help = METHODS_HELP)]
pub struct Cli {
    /// Node JSON-RPC URL.
    #[arg(long, short = 'u', global = true, default_value = DEFAULT_URL, env = "MILE_RPC_URL")]
    pub url: String,

    /// Seconds allowed for each connect, write and read; also the pause
    /// between reconnection attempts.
    #[arg(long, global = true, default_value = "3")]
    pub timeout: u64,

    /// Attempts made before giving up on a failing or timed-out node.
    #[arg(long, global = true, default_value = "3")]
    pub reconnections: u32,

    /// Accept any TLS certificate.
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Print full requests and responses.
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Invoke a node method by name.
    Call {
        #[arg(long, short = 'm')]
        method: String,

        /// Method params as a JSON object.
        #[arg(long, short = 'p', default_value = "{}")]
        params: String,
    },

    /// Sign and send an asset transfer.
    Transfer {
        /// Recipient public key.
        #[arg(long)]
        to: String,

        /// Decimal amount, e.g. 1.5.
        #[arg(long)]
        amount: String,

        /// Asset code.
        #[arg(long, default_value = "1")]
        asset: u16,

        #[arg(long, default_value = "")]
        description: String,

        /// Sender private key.
        #[arg(long, env = "MILE_PRIVATE_KEY", hide_env_values = true)]
        private_key: String,

        /// Print the signed transaction instead of sending it.
        #[arg(long)]
        test: bool,
    },

    /// Print a new key pair.
    Wallet {
        /// Derive the pair from this secret phrase instead of at random.
        #[arg(long)]
        phrase: Option<String>,
    },
}
