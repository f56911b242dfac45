use betzilla::{
    chain::{
        BettingContracts,
        json_rpc::{
            ChainConfig,
            DEFAULT_CONFIRMATION_TIMEOUT,
        },
    },
    client::{
        AppConfig,
        DEFAULT_RPC_URL,
        LedgerEvent,
        RpcAppController,
    },
    matches::{
        MatchBoard,
        Provenance,
        football_data::DEFAULT_FOOTBALL_API_URL,
    },
    orchestrator::{
        AllowanceExposure,
        AttemptState,
        PlacementFailure,
        PlacementOutcome,
    },
    types::{
        Address,
        BetIntent,
        BetRecord,
        MatchId,
        Outcome,
    },
    units::{
        format_token_amount,
        parse_token_amount,
    },
};
use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DEFAULT_TOKEN_DECIMALS,
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
    time::Duration,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

#[derive(Parser, Debug)]
#[command(
    name = "betzilla",
    about = "Place and track football bets on the BetZilla contracts",
    version,
    group(
        ArgGroup::new("network")
            .args(["local", "dev", "test"])
            .required(true)
    )
)]
struct Cli {
    /// Use the local network deployment
    #[arg(long)]
    local: bool,

    /// Use the dev network deployment
    #[arg(long)]
    dev: bool,

    /// Use the test network deployment
    #[arg(long)]
    test: bool,

    /// Override the node RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Directory holding per-network deployment records
    #[arg(long, default_value = deployments::DEPLOYMENTS_ROOT)]
    deployments_dir: String,

    #[arg(long, default_value = DEFAULT_FOOTBALL_API_URL)]
    football_api_url: String,

    #[arg(long, env = "FOOTBALL_DATA_API_KEY", hide_env_values = true)]
    football_api_key: Option<String>,

    /// Seconds to wait for a transaction to be included
    #[arg(long, default_value_t = DEFAULT_CONFIRMATION_TIMEOUT.as_secs())]
    confirmation_timeout_secs: u64,

    /// Blocks, including the inclusion block, before a transaction counts
    #[arg(long, default_value_t = 1)]
    confirmations: u64,

    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Override the wagering token address from the deployment record
    #[arg(long)]
    token_address: Option<String>,

    /// Override the betting contract address from the deployment record
    #[arg(long)]
    betting_address: Option<String>,

    /// Print machine-readable JSON where supported
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List upcoming matches and their odds
    Matches,
    /// Bet on a match outcome (home, draw or away)
    Place {
        match_id: MatchId,
        outcome: Outcome,
        /// Stake in whole tokens, e.g. 10 or 2.5
        amount: String,
    },
    /// Show the connected account's bets
    Bets,
    /// Show the connected account's token balance
    Balance,
    /// Show the allowance the betting contract holds for the account
    Allowance,
    /// Reset the betting contract's allowance to zero
    Revoke,
    /// Keep reconciling bets and print every update
    Watch,
    /// Save contract addresses for the selected network
    Register {
        token: String,
        betting: String,
        #[arg(long)]
        chain_id: Option<u64>,
    },
}

impl Cli {
    fn env(&self) -> DeploymentEnv {
        if self.dev {
            DeploymentEnv::Dev
        } else if self.test {
            DeploymentEnv::Test
        } else {
            DeploymentEnv::Local
        }
    }
}

struct Token {
    ticker: String,
    decimals: u8,
}

impl Token {
    fn format(&self, amount: u128) -> String {
        format!("{} {}", format_token_amount(amount, self.decimals), self.ticker)
    }
}

fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let appender = rolling::daily(dir, "betzilla.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| eyre!(e))?;
            Ok(Some(guard))
        }
        None => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| eyre!(e))?;
            Ok(None)
        }
    }
}

fn parse_address(raw: &str, what: &str) -> Result<Address> {
    Address::from_str(raw.trim()).wrap_err_with(|| format!("invalid {what} address '{raw}'"))
}

fn resolve_config(cli: &Cli, record: Option<&DeploymentRecord>) -> Result<AppConfig> {
    let token = match (&cli.token_address, record) {
        (Some(raw), _) => parse_address(raw, "token")?,
        (None, Some(record)) => parse_address(&record.token_address, "token")?,
        (None, None) => {
            return Err(eyre!(
                "no deployment recorded for {}; run `register` or pass --token-address",
                cli.env()
            ));
        }
    };
    let betting = match (&cli.betting_address, record) {
        (Some(raw), _) => parse_address(raw, "betting")?,
        (None, Some(record)) => parse_address(&record.betting_address, "betting")?,
        (None, None) => {
            return Err(eyre!(
                "no deployment recorded for {}; run `register` or pass --betting-address",
                cli.env()
            ));
        }
    };
    let rpc_url = cli
        .rpc_url
        .clone()
        .or_else(|| record.map(|r| r.network_url.clone()))
        .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
    Ok(AppConfig {
        rpc_url,
        contracts: BettingContracts::new(token, betting),
        chain: ChainConfig {
            confirmation_timeout: Duration::from_secs(cli.confirmation_timeout_secs),
            required_confirmations: cli.confirmations.max(1),
            ..ChainConfig::default()
        },
        football_api_url: cli.football_api_url.clone(),
        football_api_key: cli.football_api_key.clone(),
        ..AppConfig::default()
    })
}

fn print_board(board: &MatchBoard, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(board)?);
        return Ok(());
    }
    if board.provenance == Provenance::Demo {
        println!("(match feed unavailable, showing demo fixtures)");
    }
    for m in &board.matches {
        println!(
            "#{:<8} {} vs {} [{}] {}  1:{:.2} X:{:.2} 2:{:.2}{}",
            m.id,
            m.home_team,
            m.away_team,
            m.competition,
            m.start_time.format("%Y-%m-%d %H:%M UTC"),
            m.odds.home,
            m.odds.draw,
            m.odds.away,
            if m.odds_origin.is_authoritative() {
                ""
            } else {
                "  (indicative)"
            },
        );
    }
    Ok(())
}

fn print_bets(records: &[BetRecord], token: &Token, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("no bets yet");
    }
    for bet in records {
        println!(
            "{:<16} match {:<8} {:<5} stake {} @ {:.2} -> {} [{}]",
            bet.id().as_str(),
            bet.match_id(),
            bet.outcome().to_string(),
            token.format(bet.stake()),
            bet.odds(),
            token.format(bet.potential_payout()),
            bet.status(),
        );
    }
    Ok(())
}

fn describe_state(state: AttemptState) -> &'static str {
    match state {
        AttemptState::Idle => "preparing",
        AttemptState::AwaitingAuthorization => "authorizing stake, confirm in your wallet",
        AttemptState::AwaitingSubmission => "placing bet, confirm in your wallet",
        AttemptState::Confirmed => "confirmed",
        AttemptState::Failed => "failed",
    }
}

fn report_failure(failure: &PlacementFailure, token: &Token) -> color_eyre::Report {
    match failure.exposure {
        AllowanceExposure::None => {}
        AllowanceExposure::Possible(amount) => println!(
            "the betting contract may still hold an allowance of {}; `revoke` resets it",
            token.format(amount)
        ),
        AllowanceExposure::Granted(amount) => println!(
            "the betting contract holds an unused allowance of {}; `revoke` resets it",
            token.format(amount)
        ),
    }
    if failure.is_retryable() {
        println!("this failure is transient, retrying may succeed");
    }
    eyre!("bet not placed: {failure}")
}

async fn place(
    app: &RpcAppController,
    token: &Token,
    match_id: MatchId,
    outcome: Outcome,
    amount: &str,
) -> Result<()> {
    let stake = parse_token_amount(amount, token.decimals)
        .wrap_err_with(|| format!("invalid stake '{amount}'"))?;
    let board = app.matches().await;
    let target = board
        .find(match_id)
        .ok_or_else(|| eyre!("match {match_id} is not on the board"))?;
    println!(
        "betting {} on {} ({} vs {}) at {:.2}",
        token.format(stake),
        target.team_for(outcome),
        target.home_team,
        target.away_team,
        target.odds.for_outcome(outcome),
    );
    let _follower = app.follow_wallet();
    let attempt = match app
        .orchestrator()
        .place(BetIntent::new(match_id, outcome, stake), target)
    {
        Ok(attempt) => attempt,
        Err(failure) => return Err(report_failure(&failure, token)),
    };
    let mut states = attempt.subscribe();
    let progress = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            println!("  {}", describe_state(state));
            if state.is_terminal() {
                break;
            }
        }
    });
    let outcome = attempt.outcome().await;
    if let Err(err) = progress.await {
        tracing::warn!(%err, "progress printer ended abnormally");
    }
    match outcome {
        PlacementOutcome::Confirmed(record) => {
            println!(
                "bet {} recorded, potential payout {}",
                record.id(),
                token.format(record.potential_payout())
            );
            Ok(())
        }
        PlacementOutcome::Failed(failure) => Err(report_failure(&failure, token)),
    }
}

async fn watch(app: &RpcAppController, token: &Token, json: bool) -> Result<()> {
    let _follower = app.follow_wallet();
    let mut worker = app.spawn_reconcile_worker();
    loop {
        tokio::select! {
            event = worker.events.recv() => {
                match event {
                    Some(LedgerEvent::Reconciled { account, records }) => {
                        println!("-- {account}");
                        print_bets(&records, token, json)?;
                    }
                    Some(LedgerEvent::Offline { account, records, error }) => {
                        println!("-- {account} (node unavailable: {error})");
                        print_bets(&records, token, json)?;
                    }
                    Some(LedgerEvent::Disconnected) => println!("-- wallet disconnected"),
                    None => {
                        tracing::warn!("reconcile worker channel closed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    worker.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref())?;
    tracing::info!("starting betzilla client");

    let root = shellexpand::tilde(&cli.deployments_dir).into_owned();
    deployments::ensure_structure(&root).map_err(|e| eyre!(e))?;
    let store = DeploymentStore::in_root(&root, cli.env()).map_err(|e| eyre!(e))?;

    if let Command::Register {
        token,
        betting,
        chain_id,
    } = &cli.command
    {
        let token = parse_address(token, "token")?;
        let betting = parse_address(betting, "betting")?;
        let network_url = cli
            .rpc_url
            .clone()
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        let record = deployments::record_deployment(
            &store,
            network_url,
            token.to_string(),
            betting.to_string(),
            *chain_id,
        )
        .map_err(|e| eyre!(e))?;
        println!(
            "saved {} deployment to {}: token {}, betting {}",
            cli.env(),
            store.path().display(),
            record.token_address,
            record.betting_address
        );
        return Ok(());
    }

    let record = store.load().map_err(|e| eyre!(e))?;
    let token = Token {
        ticker: record
            .as_ref()
            .map(|r| r.ticker().to_string())
            .unwrap_or_else(|| "BETZ".to_string()),
        decimals: record
            .as_ref()
            .map(DeploymentRecord::decimals)
            .unwrap_or(DEFAULT_TOKEN_DECIMALS),
    };
    let config = resolve_config(&cli, record.as_ref())?;
    let app = RpcAppController::from_config(config).wrap_err("failed to set up client")?;

    match &cli.command {
        Command::Matches => {
            let board = app.refresh_matches().await;
            print_board(&board, cli.json)?;
        }
        Command::Place {
            match_id,
            outcome,
            amount,
        } => {
            app.session().connect().await.wrap_err("wallet connection failed")?;
            place(&app, &token, *match_id, *outcome, amount).await?;
        }
        Command::Bets => {
            let account = app.session().connect().await.wrap_err("wallet connection failed")?;
            let view = app.bets(account).await.wrap_err("failed to load bets")?;
            if let Some(err) = &view.offline {
                println!("(node unavailable, showing bets from this session only: {err})");
            }
            print_bets(&view.records, &token, cli.json)?;
        }
        Command::Balance => {
            let account = app.session().connect().await.wrap_err("wallet connection failed")?;
            let balance = app.balance(account).await.wrap_err("failed to read balance")?;
            println!("{account}: {}", token.format(balance));
        }
        Command::Allowance => {
            let account = app.session().connect().await.wrap_err("wallet connection failed")?;
            let allowance = app
                .allowance(account)
                .await
                .wrap_err("failed to read allowance")?;
            println!("{account}: {}", token.format(allowance));
        }
        Command::Revoke => {
            let account = app.session().connect().await.wrap_err("wallet connection failed")?;
            let receipt = app
                .orchestrator()
                .revoke_allowance(account)
                .await
                .wrap_err("failed to revoke allowance")?;
            println!(
                "allowance revoked in block {} ({})",
                receipt.block_number, receipt.transaction_hash
            );
        }
        Command::Watch => {
            app.session().connect().await.wrap_err("wallet connection failed")?;
            watch(&app, &token, cli.json).await?;
        }
        Command::Register { .. } => {}
    }
    Ok(())
}
