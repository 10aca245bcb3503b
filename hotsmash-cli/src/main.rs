mod config;
mod http;
mod output;
mod simulate;

use clap::Parser;
use hotsmash_core::constants::DEFAULT_K_FACTOR;
use hotsmash_core::{
    AllowlistPolicy, AuthenticatedIdentity, DeviceFingerprintIdentity, DeviceTraits, DurableVoteQueue, FileStore,
    LifecycleEvent, LocalStore, PersistenceGateway, VoterIdentityProvider, VotingSession,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::config::HotsmashConfig;
use crate::http::{HttpConfig, HttpGateway};

pub fn bail(msg: impl std::fmt::Display) -> ! {
    eprintln!("Error: {msg}");
    std::process::exit(1);
}

#[derive(Parser)]
#[command(name = "hotsmash", version, about = "Vote on who's hotter, one founder pair at a time")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: ~/.config/hotsmash/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL (e.g. http://localhost:8080/api)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Bearer token for the backend (also reads HOTSMASH_API_KEY env var)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Directory for local voting state (default: ~/.local/state/hotsmash)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Vote as this account instead of the device fingerprint
    #[arg(long, global = true)]
    voter_id: Option<String>,

    /// Output JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging on stderr (otherwise RUST_LOG, default "warn")
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Create a default config file at ~/.config/hotsmash/config.toml
    Init,
    /// Show the next founder pair to judge
    Pair,
    /// Vote that WINNER is hotter than LOSER
    Vote(VoteArgs),
    /// Push queued votes to the backend
    Flush,
    /// Show rate-limit and outbox status
    Stats,
    /// Show founders ranked by rating
    Rankings(RankingsArgs),
    /// Run the voting pipeline against an in-memory backend
    Simulate(SimulateArgs),
}

#[derive(Parser)]
struct VoteArgs {
    /// Id of the founder you picked
    #[arg(long)]
    winner: String,

    /// Id of the other founder
    #[arg(long)]
    loser: String,
}

#[derive(Parser)]
struct RankingsArgs {
    /// Only show the top N
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Parser)]
struct SimulateArgs {
    /// Number of vote attempts
    #[arg(long, default_value_t = 1_000)]
    votes: usize,

    /// Number of simulated voters
    #[arg(long, default_value_t = 10)]
    voters: usize,

    /// Share of backend calls that fail with a retryable error (0.0 - 1.0)
    #[arg(long, default_value_t = 0.1)]
    failure_rate: f64,

    /// RNG seed; the same seed replays the same run
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Founders to show in the final table
    #[arg(long, default_value_t = 10)]
    top: usize,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init => {
            let path = config::create_default_config();
            println!("Created config at {}", path.display());
            println!("Edit it to set your backend endpoint, limits, etc.");
        }
        Commands::Simulate(ref args) => run_simulate(&cli, args).await,
        Commands::Pair => run_pair(&cli).await,
        Commands::Vote(ref args) => run_vote(&cli, args).await,
        Commands::Flush => run_flush(&cli).await,
        Commands::Stats => run_stats(&cli).await,
        Commands::Rankings(ref args) => run_rankings(&cli, args).await,
    }
}

fn load_config(cli: &Cli) -> (HotsmashConfig, PathBuf) {
    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    (config::load_config(&config_path), config_path)
}

/// Wire config, local state and the HTTP backend into a voting session.
fn open_session(cli: &Cli) -> VotingSession {
    let (cfg, config_path) = load_config(cli);

    let endpoint = cli.endpoint.clone().or(cfg.endpoint).unwrap_or_else(|| {
        bail(format!("No endpoint specified. Pass --endpoint or set it in {}", config_path.display()));
    });
    let api_key = cli.api_key.clone().or_else(|| std::env::var("HOTSMASH_API_KEY").ok());

    let state_dir = cli
        .state_dir
        .clone()
        .or(cfg.state_dir)
        .map(|p| config::expand_home(&p))
        .unwrap_or_else(config::default_state_dir);
    let store: Arc<dyn LocalStore> = Arc::new(
        FileStore::open(&state_dir)
            .unwrap_or_else(|e| bail(format!("Failed to open state dir {}: {e}", state_dir.display()))),
    );

    let http = HttpGateway::new(HttpConfig {
        endpoint,
        api_key,
        timeout: Duration::from_millis(cfg.queue.remote_timeout_ms),
    })
    .unwrap_or_else(|e| bail(format!("Failed to create HTTP client: {e}")));
    let gateway: Arc<dyn PersistenceGateway> = Arc::new(http);
    let queue = DurableVoteQueue::new(cfg.queue, gateway.clone(), store.clone())
        .unwrap_or_else(|e| bail(format!("Failed to restore vote queue: {e}")));

    let identity: Box<dyn VoterIdentityProvider> = match cli.voter_id.clone().or(cfg.voter_id) {
        Some(uid) => Box::new(AuthenticatedIdentity::new(uid)),
        None => Box::new(
            DeviceFingerprintIdentity::load_or_create(store.as_ref(), &DeviceTraits::from_env(), &mut rand::rng())
                .unwrap_or_else(|e| bail(format!("Failed to load device fingerprint: {e}"))),
        ),
    };

    VotingSession::new(gateway, store, Arc::new(queue), identity)
        .unwrap_or_else(|e| bail(format!("Failed to load vote history: {e}")))
        .with_rate_limit(cfg.rate_limit)
        .with_k_factor(cfg.k_factor.unwrap_or(DEFAULT_K_FACTOR))
        .with_privileges(Box::new(AllowlistPolicy::new(cfg.admins)))
}

async fn refreshed_session(cli: &Cli) -> VotingSession {
    let mut session = open_session(cli);
    session
        .refresh()
        .await
        .unwrap_or_else(|e| bail(format!("Failed to fetch founders: {e}")));
    session
}

async fn run_pair(cli: &Cli) {
    let mut session = refreshed_session(cli).await;
    let (left, right) = session
        .get_pair()
        .unwrap_or_else(|e| bail(format!("Cannot pick a pair: {e}")));
    output::print_pair(&left, &right, cli.json);
}

async fn run_vote(cli: &Cli, args: &VoteArgs) {
    let mut session = refreshed_session(cli).await;
    let outcome = session
        .submit_vote(&args.winner, &args.loser)
        .unwrap_or_else(|e| bail(format!("Invalid vote: {e}")));
    output::print_outcome(&outcome, cli.json);

    // The process is about to exit: push what we can now, keep the rest queued.
    let report = session.on_lifecycle(LifecycleEvent::Terminating).await;
    if report.failed > 0 {
        warn!(
            failed = report.failed,
            pending = session.queue().len(),
            "some votes could not be delivered yet; run `hotsmash flush` later"
        );
    }
}

async fn run_flush(cli: &Cli) {
    let session = open_session(cli);
    let report = session.flush().await;
    output::print_flush(&report, session.queue().len(), cli.json);
}

async fn run_stats(cli: &Cli) {
    let mut session = open_session(cli);
    if let Err(e) = session.refresh().await {
        warn!(error = %e, "could not fetch founders; pair totals will be empty");
    }
    let remote = match session.remote_votes_today().await {
        Ok(count) => count,
        Err(e) => {
            warn!(error = %e, "could not fetch remote vote count");
            None
        }
    };
    let voting = session.voting_stats();
    output::print_stats(&voting, &session.queue_stats(), remote, cli.json);
}

async fn run_rankings(cli: &Cli, args: &RankingsArgs) {
    let session = refreshed_session(cli).await;
    let mut ranked = session.rankings();
    if let Some(limit) = args.limit {
        ranked.truncate(limit);
    }
    if cli.json {
        output::print_rankings_json(&ranked);
    } else {
        output::print_rankings_table(&ranked);
    }
}

async fn run_simulate(cli: &Cli, args: &SimulateArgs) {
    let (cfg, _) = load_config(cli);
    let report = simulate::run_simulation(simulate::SimulationOptions {
        votes: args.votes,
        voters: args.voters,
        failure_rate: args.failure_rate,
        seed: args.seed,
        k_factor: cfg.k_factor.unwrap_or(DEFAULT_K_FACTOR),
        rate_limit: cfg.rate_limit,
        queue: cfg.queue,
    })
    .await;

    if cli.json {
        output::print_pretty(&report);
    } else {
        simulate::print_report(&report, args.top);
    }
}
