use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tipline")]
#[command(about = "Tipline settlement service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the settlement service
    Start {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,

        #[arg(long, env = "MODERATION_URL")]
        moderation_url: String,

        #[arg(long, env = "IDENTITY_URL")]
        identity_url: String,
    },

    /// Generate a relayer keypair
    Keypair,

    /// Print the signing digest for a tip, for cross-checking against the
    /// on-chain verifier
    Digest {
        /// Sender wallet address
        #[arg(long)]
        from: String,

        /// Recipient wallet address
        #[arg(long)]
        to: String,

        /// Amount in minor units
        #[arg(long)]
        amount: u64,

        /// Content identifier of the message, empty for none
        #[arg(long, default_value = "")]
        content_id: String,

        #[arg(long)]
        nonce: u64,
    },
}
