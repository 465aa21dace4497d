//! Clap derive structures for the `simbridge` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-level CLI ────────────────────────────────────────────────────

/// simbridge -- command-line client for a trading-simulator gateway
#[derive(Debug, Parser)]
#[command(
    name = "simbridge",
    version,
    about = "Trade against a simulator gateway from the command line",
    long_about = "A connection-resilient client for trading-simulator gateways.\n\n\
        Maintains a heartbeat-monitored command channel with automatic\n\
        reconnection and backoff, plus an optional server-push data stream.\n\
        Passwords are read from SIMBRIDGE_PASSWORD or the profile's\n\
        password_env variable, never from the command line.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Gateway profile to use
    #[arg(long, short = 'p', env = "SIMBRIDGE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Gateway URL (overrides profile)
    #[arg(long, short = 'g', env = "SIMBRIDGE_GATEWAY", global = true)]
    pub gateway: Option<String>,

    /// Username for session login (overrides profile)
    #[arg(long, short = 'u', env = "SIMBRIDGE_USERNAME", global = true)]
    pub username: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "SIMBRIDGE_OUTPUT",
        default_value = "text",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "SIMBRIDGE_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "SIMBRIDGE_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & color enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines (default)
    Text,
    /// JSON: pretty for one-shot commands, one object per line for watch
    Json,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if stdout is a terminal)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-level command enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect and stream state, recovery, and data events until ctrl-c
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Submit or cancel orders
    #[command(alias = "o")]
    Order(OrderArgs),

    /// Control the simulator
    #[command(alias = "simulator")]
    Sim(SimArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  WATCH
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Suppress push-data payloads (state and recovery events only)
    #[arg(long)]
    pub no_data: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  ORDER
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct OrderArgs {
    #[command(subcommand)]
    pub command: OrderCommand,
}

#[derive(Debug, Subcommand)]
pub enum OrderCommand {
    /// Submit a buy order
    Buy(TicketArgs),

    /// Submit a sell order
    Sell(TicketArgs),

    /// Cancel a working order
    Cancel {
        /// Gateway order id
        order_id: String,
    },
}

/// Shared ticket arguments for buy/sell.
#[derive(Debug, Args)]
pub struct TicketArgs {
    /// Instrument symbol (e.g., ACME)
    pub symbol: String,

    /// Quantity to trade
    pub quantity: f64,

    /// Limit price; omit for a market order
    #[arg(long, short = 'l')]
    pub limit: Option<f64>,

    /// Book to trade against, when the account has several
    #[arg(long)]
    pub book: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SIM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct SimArgs {
    #[command(subcommand)]
    pub command: SimCommand,
}

#[derive(Debug, Subcommand)]
pub enum SimCommand {
    /// Start a simulator run
    Start {
        /// Scenario name understood by the gateway
        #[arg(long)]
        scenario: Option<String>,

        /// Playback speed multiplier (1.0 = real time)
        #[arg(long)]
        speed: Option<f64>,

        /// Starting cash balance
        #[arg(long)]
        cash: Option<f64>,
    },

    /// Stop the active simulator run
    Stop,

    /// Show the simulator run status
    Status,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
