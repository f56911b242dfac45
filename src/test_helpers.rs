//! In-memory stand-ins for the ledger node and the wallet, shared by unit and
//! integration tests.

use crate::{
    chain::{
        BettingContracts,
        ChainClient,
        ChainValue,
        ConfirmedBet,
        ContractCall,
        ContractFunction,
        Receipt,
        TransactionHandle,
        abi,
    },
    error::{
        ChainError,
        SessionError,
    },
    ledger::BetLedgerCache,
    orchestrator::BetOrchestrator,
    session::{
        AccountSession,
        WalletProvider,
    },
    types::{
        Address,
        BetStatus,
        Match,
        MatchId,
        MatchStatus,
        Odds,
        OddsOrigin,
    },
};
use alloy_primitives::TxHash;
use chrono::{
    TimeZone,
    Utc,
};
use futures::{
    StreamExt,
    stream::{
        self,
        BoxStream,
    },
};
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{
            AtomicUsize,
            Ordering,
        },
    },
};
use tokio::sync::{
    broadcast,
    watch,
};

/// Odds the fake betting contract stores for every bet it accepts.
pub const FAKE_CHAIN_ODDS: f64 = 2.0;

pub fn alice() -> Address {
    Address::repeat_byte(0x01)
}

pub fn bob() -> Address {
    Address::repeat_byte(0x02)
}

pub fn test_contracts() -> BettingContracts {
    BettingContracts::new(Address::repeat_byte(0xaa), Address::repeat_byte(0xbb))
}

pub fn fixture_match(id: MatchId, status: MatchStatus) -> Match {
    Match {
        id,
        home_team: "Real Madrid".to_string(),
        away_team: "Barcelona".to_string(),
        competition: "La Liga".to_string(),
        start_time: Utc
            .with_ymd_and_hms(2024, 4, 3, 20, 45, 0)
            .single()
            .unwrap_or_default(),
        status,
        odds: Odds::new(2.1, 3.4, 2.8),
        odds_origin: OddsOrigin::Demo,
    }
}

#[derive(Default)]
struct FakeChainState {
    submissions: Vec<(Address, ContractCall)>,
    pending: HashMap<TxHash, (Address, ContractCall)>,
    bets: HashMap<Address, Vec<ConfirmedBet>>,
    allowances: HashMap<Address, u128>,
    balances: HashMap<Address, u128>,
    submit_failures: HashMap<&'static str, ChainError>,
    confirm_failures: HashMap<&'static str, ChainError>,
    read_failure: Option<ChainError>,
    reads: usize,
    next_tx: u64,
    next_bet_id: u64,
    next_block: u64,
}

/// A ledger node that applies approvals and bets to in-memory books once
/// their confirmation is awaited.
pub struct FakeChain {
    state: Mutex<FakeChainState>,
    held: watch::Sender<HashSet<&'static str>>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChain {
    pub fn new() -> Self {
        let (held, _) = watch::channel(HashSet::new());
        Self {
            state: Mutex::new(FakeChainState {
                next_bet_id: 1,
                next_block: 1,
                ..FakeChainState::default()
            }),
            held,
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_bets(&self, account: Address, bets: Vec<ConfirmedBet>) {
        let mut state = self.state();
        let highest = bets.iter().map(|bet| bet.bet_id).max().unwrap_or(0);
        state.next_bet_id = state.next_bet_id.max(highest + 1);
        state.bets.insert(account, bets);
    }

    pub fn bets(&self, account: Address) -> Vec<ConfirmedBet> {
        self.state().bets.get(&account).cloned().unwrap_or_default()
    }

    /// Settles a contract bet, as an oracle resolving the match would.
    pub fn settle(&self, account: Address, bet_id: u64, status: BetStatus) {
        if let Some(bet) = self
            .state()
            .bets
            .get_mut(&account)
            .and_then(|bets| bets.iter_mut().find(|bet| bet.bet_id == bet_id))
        {
            bet.status = status;
        }
    }

    pub fn set_balance(&self, account: Address, amount: u128) {
        self.state().balances.insert(account, amount);
    }

    pub fn allowance_of(&self, account: Address) -> u128 {
        self.state().allowances.get(&account).copied().unwrap_or(0)
    }

    pub fn fail_submit(&self, signature: &'static str, err: ChainError) {
        self.state().submit_failures.insert(signature, err);
    }

    pub fn fail_confirmation(&self, signature: &'static str, err: ChainError) {
        self.state().confirm_failures.insert(signature, err);
    }

    pub fn fail_reads(&self, err: ChainError) {
        self.state().read_failure = Some(err);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.submit_failures.clear();
        state.confirm_failures.clear();
        state.read_failure = None;
    }

    /// Confirmations of `signature` block until [`Self::release_confirmations`].
    pub fn hold_confirmations(&self, signature: &'static str) {
        self.held.send_modify(|held| {
            held.insert(signature);
        });
    }

    pub fn release_confirmations(&self) {
        self.held.send_modify(HashSet::clear);
    }

    pub fn submissions(&self) -> Vec<(Address, ContractCall)> {
        self.state().submissions.clone()
    }

    pub fn submitted_functions(&self) -> Vec<&'static str> {
        self.state()
            .submissions
            .iter()
            .map(|(_, call)| abi::signature(&call.function))
            .collect()
    }

    pub fn approved_amounts(&self) -> Vec<u128> {
        self.state()
            .submissions
            .iter()
            .filter_map(|(_, call)| match call.function {
                ContractFunction::Approve { amount, .. } => Some(amount),
                _ => None,
            })
            .collect()
    }

    pub fn read_count(&self) -> usize {
        self.state().reads
    }

    fn apply(state: &mut FakeChainState, from: Address, call: &ContractCall) {
        match &call.function {
            ContractFunction::Approve { amount, .. } => {
                state.allowances.insert(from, *amount);
            }
            ContractFunction::PlaceBet {
                match_id,
                outcome,
                amount,
            } => {
                let allowance = state.allowances.entry(from).or_default();
                *allowance = allowance.saturating_sub(*amount);
                let bet_id = state.next_bet_id;
                state.next_bet_id += 1;
                let bets = state.bets.entry(from).or_default();
                bets.push(ConfirmedBet {
                    index: bets.len() as u64,
                    bet_id,
                    match_id: *match_id,
                    outcome: *outcome,
                    stake: *amount,
                    status: BetStatus::Pending,
                    odds: FAKE_CHAIN_ODDS,
                });
            }
            _ => {}
        }
    }
}

impl ChainClient for FakeChain {
    async fn submit(
        &self,
        from: Address,
        call: ContractCall,
    ) -> Result<TransactionHandle, ChainError> {
        let mut state = self.state();
        let signature = abi::signature(&call.function);
        state.submissions.push((from, call.clone()));
        if let Some(err) = state.submit_failures.get(signature) {
            return Err(err.clone());
        }
        state.next_tx += 1;
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&state.next_tx.to_be_bytes());
        let hash = TxHash::from(bytes);
        state.pending.insert(hash, (from, call));
        Ok(TransactionHandle { hash })
    }

    async fn await_confirmation(
        &self,
        handle: TransactionHandle,
    ) -> Result<Receipt, ChainError> {
        let signature = {
            let state = self.state();
            let (_, call) = state.pending.get(&handle.hash).ok_or_else(|| {
                ChainError::InvalidResponse(format!("unknown transaction {}", handle.hash))
            })?;
            abi::signature(&call.function)
        };
        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !held.contains(signature)).await;

        let mut state = self.state();
        if let Some(err) = state.confirm_failures.get(signature) {
            return Err(err.clone());
        }
        let Some((from, call)) = state.pending.remove(&handle.hash) else {
            return Err(ChainError::InvalidResponse(format!(
                "transaction {} already confirmed",
                handle.hash
            )));
        };
        Self::apply(&mut state, from, &call);
        let block_number = state.next_block;
        state.next_block += 1;
        Ok(Receipt {
            transaction_hash: handle.hash,
            block_number,
        })
    }

    async fn read(&self, call: ContractCall) -> Result<ChainValue, ChainError> {
        let mut state = self.state();
        state.reads += 1;
        if let Some(err) = &state.read_failure {
            return Err(err.clone());
        }
        match call.function {
            ContractFunction::BetsByUser { user } => Ok(ChainValue::Bets(
                state.bets.get(&user).cloned().unwrap_or_default(),
            )),
            ContractFunction::BalanceOf { owner } => Ok(ChainValue::Amount(
                state.balances.get(&owner).copied().unwrap_or(0),
            )),
            ContractFunction::Allowance { owner, .. } => Ok(ChainValue::Amount(
                state.allowances.get(&owner).copied().unwrap_or(0),
            )),
            other => Err(ChainError::InvalidResponse(format!(
                "{} is not a read",
                abi::signature(&other)
            ))),
        }
    }
}

struct FakeWalletInner {
    accounts: Mutex<Vec<Address>>,
    denial: Option<String>,
    requests: AtomicUsize,
    changes: broadcast::Sender<Option<Address>>,
}

/// A wallet whose accounts and account switches are driven by the test.
#[derive(Clone)]
pub struct FakeWallet {
    inner: Arc<FakeWalletInner>,
}

impl FakeWallet {
    pub fn with_accounts(accounts: Vec<Address>) -> Self {
        Self::build(accounts, None)
    }

    /// A wallet whose user refuses every account request.
    pub fn denying(reason: &str) -> Self {
        Self::build(Vec::new(), Some(reason.to_string()))
    }

    fn build(accounts: Vec<Address>, denial: Option<String>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(FakeWalletInner {
                accounts: Mutex::new(accounts),
                denial,
                requests: AtomicUsize::new(0),
                changes,
            }),
        }
    }

    pub fn request_count(&self) -> usize {
        self.inner.requests.load(Ordering::SeqCst)
    }

    /// Switches the wallet's selected account and notifies followers.
    pub fn switch_account(&self, address: Option<Address>) {
        *self
            .inner
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = address.into_iter().collect();
        let _ = self.inner.changes.send(address);
    }

    fn accounts(&self) -> Vec<Address> {
        self.inner
            .accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl WalletProvider for FakeWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, SessionError> {
        self.inner.requests.fetch_add(1, Ordering::SeqCst);
        match &self.inner.denial {
            Some(reason) => Err(SessionError::Denied(reason.clone())),
            None => Ok(self.accounts()),
        }
    }

    async fn current_address(&self) -> Result<Option<Address>, SessionError> {
        Ok(self.accounts().first().copied())
    }

    fn account_changes(&self) -> BoxStream<'static, Option<Address>> {
        let rx = self.inner.changes.subscribe();
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(address) => return Some((address, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

/// Every component wired over the fakes, with `alice` as the wallet account.
pub struct TestContext {
    pub chain: Arc<FakeChain>,
    pub wallet: FakeWallet,
    pub session: Arc<AccountSession<FakeWallet>>,
    pub ledger: Arc<BetLedgerCache<FakeChain>>,
    pub orchestrator: BetOrchestrator<FakeChain, FakeWallet>,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        let contracts = test_contracts();
        let chain = Arc::new(FakeChain::new());
        let wallet = FakeWallet::with_accounts(vec![alice()]);
        let session = Arc::new(AccountSession::new(wallet.clone()));
        let ledger = Arc::new(BetLedgerCache::new(Arc::clone(&chain), contracts));
        let orchestrator = BetOrchestrator::new(
            Arc::clone(&chain),
            Arc::clone(&session),
            Arc::clone(&ledger),
            contracts,
        );
        Self {
            chain,
            wallet,
            session,
            ledger,
            orchestrator,
        }
    }
}
