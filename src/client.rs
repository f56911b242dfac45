//! Application controller: owns every component for the lifetime of the
//! process and runs the periodic ledger reconciliation.

use crate::{
    chain::{
        BettingContracts,
        ChainClient,
        json_rpc::{
            ChainConfig,
            JsonRpcChainClient,
        },
        read_amount,
    },
    error::{
        ChainError,
        SetupError,
    },
    ledger::BetLedgerCache,
    matches::{
        MatchBoard,
        MatchFeed,
        MatchSource,
        football_data::{
            DEFAULT_FOOTBALL_API_URL,
            FootballDataSource,
        },
    },
    orchestrator::{
        BetOrchestrator,
        FailureReason,
        PlacementFailure,
        PlacementOutcome,
    },
    rpc::JsonRpcTransport,
    session::{
        AccountSession,
        SessionState,
        WalletProvider,
        rpc_wallet::{
            DEFAULT_ACCOUNT_POLL_INTERVAL,
            RpcWalletProvider,
        },
    },
    types::{
        Address,
        BetIntent,
        BetRecord,
        MatchId,
        Outcome,
    },
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        Mutex,
        mpsc,
        watch,
    },
    task::JoinHandle,
    time,
};

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub rpc_url: String,
    pub contracts: BettingContracts,
    pub chain: ChainConfig,
    pub football_api_url: String,
    pub football_api_key: Option<String>,
    pub account_poll_interval: Duration,
    pub reconcile_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            contracts: BettingContracts::new(Address::ZERO, Address::ZERO),
            chain: ChainConfig::default(),
            football_api_url: DEFAULT_FOOTBALL_API_URL.to_string(),
            football_api_key: None,
            account_poll_interval: DEFAULT_ACCOUNT_POLL_INTERVAL,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }
}

/// The account's bets, and whether they could be checked against the chain.
#[derive(Clone, Debug, PartialEq)]
pub struct BetsView {
    pub records: Vec<BetRecord>,
    /// Set when the node could not be read and `records` is the local view.
    pub offline: Option<ChainError>,
}

pub struct AppController<C, W, S> {
    chain: Arc<C>,
    session: Arc<AccountSession<W>>,
    ledger: Arc<BetLedgerCache<C>>,
    orchestrator: BetOrchestrator<C, W>,
    feed: MatchFeed<S>,
    board: Mutex<Option<MatchBoard>>,
    contracts: BettingContracts,
    reconcile_interval: Duration,
}

pub type RpcAppController =
    AppController<JsonRpcChainClient, RpcWalletProvider, FootballDataSource>;

impl RpcAppController {
    pub fn from_config(config: AppConfig) -> Result<Self, SetupError> {
        let transport = JsonRpcTransport::new(&config.rpc_url, config.chain.request_timeout)?;
        let chain = JsonRpcChainClient::new(transport.clone(), config.chain.clone());
        let wallet = RpcWalletProvider::new(transport, config.account_poll_interval);
        let source = FootballDataSource::new(
            config.football_api_url,
            config.football_api_key,
            config.chain.request_timeout,
        )?;
        tracing::info!(
            rpc_url = %config.rpc_url,
            token = %config.contracts.token,
            betting = %config.contracts.betting,
            "wiring application"
        );
        Ok(Self::from_parts(
            chain,
            wallet,
            source,
            config.contracts,
            config.reconcile_interval,
        ))
    }
}

impl<C, W, S> AppController<C, W, S>
where
    C: ChainClient,
    W: WalletProvider,
    S: MatchSource,
{
    pub fn from_parts(
        chain: C,
        wallet: W,
        source: S,
        contracts: BettingContracts,
        reconcile_interval: Duration,
    ) -> Self {
        let chain = Arc::new(chain);
        let session = Arc::new(AccountSession::new(wallet));
        let ledger = Arc::new(BetLedgerCache::new(Arc::clone(&chain), contracts));
        let orchestrator = BetOrchestrator::new(
            Arc::clone(&chain),
            Arc::clone(&session),
            Arc::clone(&ledger),
            contracts,
        );
        Self {
            chain,
            session,
            ledger,
            orchestrator,
            feed: MatchFeed::new(source),
            board: Mutex::new(None),
            contracts,
            reconcile_interval,
        }
    }

    pub fn session(&self) -> &Arc<AccountSession<W>> {
        &self.session
    }

    pub fn ledger(&self) -> &Arc<BetLedgerCache<C>> {
        &self.ledger
    }

    pub fn orchestrator(&self) -> &BetOrchestrator<C, W> {
        &self.orchestrator
    }

    pub fn contracts(&self) -> BettingContracts {
        self.contracts
    }

    /// Applies wallet account switches to the session until the guard drops.
    pub fn follow_wallet(&self) -> WalletFollower {
        WalletFollower(self.session.follow_provider())
    }

    /// Fetches a fresh board and caches it for later bet lookups.
    pub async fn refresh_matches(&self) -> MatchBoard {
        let board = self.feed.load().await;
        *self.board.lock().await = Some(board.clone());
        board
    }

    /// The cached board, loading it on first use.
    pub async fn matches(&self) -> MatchBoard {
        let cached = self.board.lock().await.clone();
        match cached {
            Some(board) => board,
            None => self.refresh_matches().await,
        }
    }

    /// Places a bet on a match of the current board.
    pub async fn place_bet(
        &self,
        match_id: MatchId,
        outcome: Outcome,
        stake: u128,
    ) -> PlacementOutcome {
        let board = self.matches().await;
        let Some(target) = board.find(match_id) else {
            tracing::warn!(match_id, "bet on unknown match");
            return PlacementOutcome::Failed(PlacementFailure::new(
                FailureReason::MatchNotBettable,
            ));
        };
        let _follower = self.follow_wallet();
        self.orchestrator
            .place_and_wait(BetIntent::new(match_id, outcome, stake), target)
            .await
    }

    /// Reconciled bets for `account`, or the local view when the node is
    /// unreachable.
    pub async fn bets(&self, account: Address) -> Result<BetsView, ChainError> {
        match self.ledger.reconcile(account).await {
            Ok(records) => Ok(BetsView {
                records,
                offline: None,
            }),
            Err(err) if err.is_transient() => {
                tracing::warn!(%account, %err, "showing unreconciled bets");
                Ok(BetsView {
                    records: self.ledger.snapshot(account),
                    offline: Some(err),
                })
            }
            Err(err) => Err(err),
        }
    }

    pub async fn balance(&self, account: Address) -> Result<u128, ChainError> {
        read_amount(self.chain.as_ref(), self.contracts.balance_of(account)).await
    }

    pub async fn allowance(&self, account: Address) -> Result<u128, ChainError> {
        read_amount(self.chain.as_ref(), self.contracts.allowance(account)).await
    }

    /// Starts periodic reconciliation for whichever account is connected. The
    /// first pass runs immediately.
    pub fn spawn_reconcile_worker(&self) -> ReconcileWorker {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(reconcile_worker(
            self.reconcile_interval,
            Arc::clone(&self.ledger),
            self.session.subscribe(),
            cmd_rx,
            event_tx,
        ));
        ReconcileWorker {
            commands: cmd_tx,
            events: event_rx,
            handle,
        }
    }
}

pub struct WalletFollower(Option<JoinHandle<()>>);

impl Drop for WalletFollower {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

pub enum ReconcileCommand {
    ReconcileNow,
    Shutdown,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LedgerEvent {
    Reconciled {
        account: Address,
        records: Vec<BetRecord>,
    },
    Offline {
        account: Address,
        records: Vec<BetRecord>,
        error: ChainError,
    },
    Disconnected,
}

pub struct ReconcileWorker {
    pub commands: mpsc::UnboundedSender<ReconcileCommand>,
    pub events: mpsc::UnboundedReceiver<LedgerEvent>,
    pub handle: JoinHandle<()>,
}

impl ReconcileWorker {
    pub async fn shutdown(self) {
        let _ = self.commands.send(ReconcileCommand::Shutdown);
        if let Err(err) = self.handle.await {
            tracing::warn!(%err, "reconcile worker ended abnormally");
        }
    }
}

async fn reconcile_worker<C: ChainClient>(
    interval: Duration,
    ledger: Arc<BetLedgerCache<C>>,
    mut session: watch::Receiver<SessionState>,
    mut cmd_rx: mpsc::UnboundedReceiver<ReconcileCommand>,
    event_tx: mpsc::UnboundedSender<LedgerEvent>,
) {
    async fn refresh<C: ChainClient>(
        ledger: &BetLedgerCache<C>,
        account: Option<Address>,
    ) -> LedgerEvent {
        let Some(account) = account else {
            return LedgerEvent::Disconnected;
        };
        match ledger.reconcile(account).await {
            Ok(records) => LedgerEvent::Reconciled { account, records },
            Err(error) => {
                tracing::warn!(%account, %error, "reconcile failed");
                LedgerEvent::Offline {
                    account,
                    records: ledger.snapshot(account),
                    error,
                }
            }
        }
    }

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        let event = tokio::select! {
            _ = ticker.tick() => {
                let account = session.borrow().address;
                refresh(&ledger, account).await
            }
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                let account = session.borrow_and_update().address;
                tracing::debug!(?account, "account changed, reconciling");
                refresh(&ledger, account).await
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ReconcileCommand::ReconcileNow) => {
                        let account = session.borrow().address;
                        refresh(&ledger, account).await
                    }
                    Some(ReconcileCommand::Shutdown) | None => break,
                }
            }
        };
        if event_tx.send(event).is_err() {
            break;
        }
    }
    tracing::debug!("reconcile worker stopped");
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        chain::abi,
        error::MatchSourceError,
        matches::{
            Provenance,
            demo_matches,
        },
        test_helpers::{
            FakeChain,
            FakeWallet,
            alice,
            bob,
            test_contracts,
        },
        types::{
            BetStatus,
            Match,
        },
    };

    struct OfflineSource;

    impl MatchSource for OfflineSource {
        async fn scheduled_matches(&self) -> Result<Vec<Match>, MatchSourceError> {
            Err(MatchSourceError::Empty)
        }
    }

    fn controller() -> (
        AppController<Arc<FakeChain>, FakeWallet, OfflineSource>,
        Arc<FakeChain>,
        FakeWallet,
    ) {
        let chain = Arc::new(FakeChain::new());
        let wallet = FakeWallet::with_accounts(vec![alice()]);
        let app = AppController::from_parts(
            Arc::clone(&chain),
            wallet.clone(),
            OfflineSource,
            test_contracts(),
            Duration::from_secs(60),
        );
        (app, chain, wallet)
    }

    #[tokio::test]
    async fn place_bet__uses_demo_board_when_feed_is_offline() {
        // given
        let (app, chain, _) = controller();
        app.session().connect().await.unwrap();

        // when
        let outcome = app.place_bet(1, Outcome::Away, 25).await;

        // then
        let PlacementOutcome::Confirmed(record) = outcome else {
            panic!("expected confirmation, got {outcome:?}");
        };
        assert_eq!(record.odds(), demo_matches()[0].odds.away);
        assert_eq!(app.matches().await.provenance, Provenance::Demo);
        assert_eq!(chain.bets(alice()).len(), 1);
    }

    #[tokio::test]
    async fn place_bet__wallet_switch_while_waiting_fails_attempt() {
        // given
        let (app, chain, wallet) = controller();
        app.session().connect().await.unwrap();
        chain.hold_confirmations(abi::PLACE_BET);
        let switch_once_submitted = async {
            while !chain.submitted_functions().contains(&abi::PLACE_BET) {
                time::sleep(Duration::from_millis(5)).await;
            }
            wallet.switch_account(Some(bob()));
        };

        // when
        let (outcome, ()) = tokio::join!(
            app.place_bet(1, Outcome::Home, 10),
            switch_once_submitted
        );

        // then
        assert_eq!(
            outcome.failure().map(|f| f.reason),
            Some(FailureReason::AccountChanged)
        );
        assert_eq!(app.session().current(), Some(bob()));
        assert!(app.ledger().snapshot(alice()).is_empty());
    }

    #[tokio::test]
    async fn place_bet__unknown_match_is_not_bettable() {
        let (app, chain, _) = controller();
        app.session().connect().await.unwrap();

        let outcome = app.place_bet(999, Outcome::Home, 1).await;

        assert_eq!(
            outcome.failure().map(|f| f.reason),
            Some(FailureReason::MatchNotBettable)
        );
        assert!(chain.submitted_functions().is_empty());
    }

    #[tokio::test]
    async fn bets__falls_back_to_local_view_when_node_is_down() {
        // given
        let (app, chain, _) = controller();
        app.session().connect().await.unwrap();
        app.place_bet(1, Outcome::Home, 10).await;
        chain.fail_reads(ChainError::NodeUnreachable("connection refused".to_string()));

        // when
        let view = app.bets(alice()).await.unwrap();

        // then
        assert_eq!(view.records.len(), 1);
        assert!(matches!(view.offline, Some(ChainError::NodeUnreachable(_))));
    }

    #[tokio::test]
    async fn allowance__reports_leftover_authorization() {
        // given
        let (app, chain, _) = controller();
        app.session().connect().await.unwrap();
        chain.fail_submit(
            abi::PLACE_BET,
            ChainError::Rejected("execution reverted".to_string()),
        );
        app.place_bet(2, Outcome::Draw, 40).await;

        // when
        let before = app.allowance(alice()).await.unwrap();
        app.orchestrator().revoke_allowance(alice()).await.unwrap();
        let after = app.allowance(alice()).await.unwrap();

        // then
        assert_eq!(before, 40);
        assert_eq!(after, 0);
    }

    #[tokio::test]
    async fn balance__reads_token_balance() {
        let (app, chain, _) = controller();
        chain.set_balance(alice(), 1_000);
        assert_eq!(app.balance(alice()).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn reconcile_worker__reports_settlements_and_account_switches() {
        // given
        let (app, chain, wallet) = controller();
        app.session().connect().await.unwrap();
        let _follower = app.session().follow_provider().unwrap();
        app.place_bet(1, Outcome::Home, 10).await;
        let bet_id = chain.bets(alice())[0].bet_id;
        chain.settle(alice(), bet_id, BetStatus::Won);
        let mut worker = app.spawn_reconcile_worker();

        // when
        let first = worker.events.recv().await.unwrap();
        wallet.switch_account(Some(bob()));
        let second = worker.events.recv().await.unwrap();

        // then
        let LedgerEvent::Reconciled { account, records } = first else {
            panic!("expected reconciliation, got {first:?}");
        };
        assert_eq!(account, alice());
        assert_eq!(records[0].status(), BetStatus::Won);
        assert_eq!(
            second,
            LedgerEvent::Reconciled {
                account: bob(),
                records: vec![],
            }
        );
        worker.shutdown().await;
    }
}
