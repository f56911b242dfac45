//! Drives one bet placement from intent to a confirmed ledger record.
//!
//! An attempt walks `Idle -> AwaitingAuthorization -> AwaitingSubmission ->
//! Confirmed | Failed`. The bet call is only submitted after the token
//! authorization for exactly the stake has been confirmed, and every failure
//! is classified into a [`PlacementFailure`] instead of escaping as an error.

use crate::{
    chain::{
        BettingContracts,
        ChainClient,
        Receipt,
    },
    error::ChainError,
    ledger::BetLedgerCache,
    session::{
        AccountSession,
        SessionState,
        WalletProvider,
    },
    types::{
        Address,
        BetIntent,
        BetRecord,
        Match,
    },
};
use std::{
    collections::HashSet,
    fmt,
    future::Future,
    sync::{
        Arc,
        Mutex,
        PoisonError,
    },
};
use tokio::{
    sync::watch,
    task::JoinHandle,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    AwaitingAuthorization,
    AwaitingSubmission,
    Confirmed,
    Failed,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptState::Confirmed | AttemptState::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("no wallet provider available")]
    NoProvider,
    #[error("no account connected")]
    NotConnected,
    #[error("stake must be greater than zero")]
    InvalidStake,
    #[error("match is not open for betting")]
    MatchNotBettable,
    #[error("another bet is already in flight for this account")]
    AttemptInProgress,
    #[error("token authorization failed")]
    AuthorizationFailed,
    #[error("bet submission failed")]
    SubmissionFailed,
    #[error("ledger node unreachable")]
    NodeUnreachable,
    #[error("timed out waiting for confirmation")]
    Timeout,
    #[error("wallet switched accounts during the attempt")]
    AccountChanged,
    #[error("attempt cancelled")]
    Cancelled,
    #[error("attempt task was interrupted")]
    Interrupted,
}

/// Token allowance the betting contract may still hold after a failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AllowanceExposure {
    #[default]
    None,
    /// An authorization was sent but its effect is unknown.
    Possible(u128),
    /// An authorization was confirmed and not spent by a bet.
    Granted(u128),
}

impl AllowanceExposure {
    pub fn amount(self) -> u128 {
        match self {
            AllowanceExposure::None => 0,
            AllowanceExposure::Possible(amount) | AllowanceExposure::Granted(amount) => {
                amount
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacementFailure {
    pub reason: FailureReason,
    pub exposure: AllowanceExposure,
    /// Raw chain message, when the failure came from the node.
    pub detail: Option<String>,
}

impl PlacementFailure {
    pub fn new(reason: FailureReason) -> Self {
        Self {
            reason,
            exposure: AllowanceExposure::None,
            detail: None,
        }
    }

    fn with_exposure(mut self, exposure: AllowanceExposure) -> Self {
        self.exposure = exposure;
        self
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.reason,
            FailureReason::NodeUnreachable | FailureReason::Timeout
        )
    }
}

impl fmt::Display for PlacementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlacementOutcome {
    Confirmed(BetRecord),
    Failed(PlacementFailure),
}

impl PlacementOutcome {
    pub fn failure(&self) -> Option<&PlacementFailure> {
        match self {
            PlacementOutcome::Failed(failure) => Some(failure),
            PlacementOutcome::Confirmed(_) => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Authorization,
    Submission,
}

fn classify(phase: Phase, err: &ChainError) -> FailureReason {
    match (phase, err) {
        (_, ChainError::NodeUnreachable(_)) => FailureReason::NodeUnreachable,
        (Phase::Authorization, _) => FailureReason::AuthorizationFailed,
        (Phase::Submission, ChainError::Timeout) => FailureReason::Timeout,
        (Phase::Submission, _) => FailureReason::SubmissionFailed,
    }
}

pub struct BetOrchestrator<C, W> {
    chain: Arc<C>,
    session: Arc<AccountSession<W>>,
    ledger: Arc<BetLedgerCache<C>>,
    contracts: BettingContracts,
    in_flight: Arc<Mutex<HashSet<Address>>>,
}

impl<C: ChainClient, W: WalletProvider> BetOrchestrator<C, W> {
    pub fn new(
        chain: Arc<C>,
        session: Arc<AccountSession<W>>,
        ledger: Arc<BetLedgerCache<C>>,
        contracts: BettingContracts,
    ) -> Self {
        Self {
            chain,
            session,
            ledger,
            contracts,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Validates `intent` against `target` and starts the attempt on its own
    /// task. Validation failures return before any chain call.
    pub fn place(
        &self,
        intent: BetIntent,
        target: &Match,
    ) -> Result<PlacementAttempt, PlacementFailure> {
        let session = self.session.state();
        let Some(account) = session.address else {
            let reason = if self.session.has_provider() {
                FailureReason::NotConnected
            } else {
                FailureReason::NoProvider
            };
            return Err(PlacementFailure::new(reason));
        };
        if intent.stake == 0 {
            return Err(PlacementFailure::new(FailureReason::InvalidStake));
        }
        if intent.match_id != target.id || !target.status.is_bettable() {
            tracing::info!(
                match_id = intent.match_id,
                status = ?target.status,
                "match not bettable"
            );
            return Err(PlacementFailure::new(FailureReason::MatchNotBettable));
        }
        let slot = InFlightSlot::claim(&self.in_flight, account)
            .ok_or_else(|| PlacementFailure::new(FailureReason::AttemptInProgress))?;

        let (state_tx, state_rx) = watch::channel(AttemptState::Idle);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let attempt = Attempt {
            chain: Arc::clone(&self.chain),
            ledger: Arc::clone(&self.ledger),
            contracts: self.contracts,
            account,
            intent,
            odds: target.odds.for_outcome(intent.outcome),
            state: state_tx,
            interrupts: Interrupts {
                session: self.session.subscribe(),
                epoch: session.epoch,
                cancel: cancel_rx,
            },
            exposure: AllowanceExposure::None,
            _slot: slot,
        };
        tracing::info!(
            %account,
            match_id = intent.match_id,
            outcome = %intent.outcome,
            stake = intent.stake,
            "starting bet attempt"
        );
        let task = tokio::spawn(attempt.run());
        Ok(PlacementAttempt {
            state: state_rx,
            cancel: cancel_tx,
            task,
            stake: intent.stake,
        })
    }

    pub async fn place_and_wait(&self, intent: BetIntent, target: &Match) -> PlacementOutcome {
        match self.place(intent, target) {
            Ok(attempt) => attempt.outcome().await,
            Err(failure) => PlacementOutcome::Failed(failure),
        }
    }

    /// Resets the betting contract's allowance for `account` to zero.
    pub async fn revoke_allowance(&self, account: Address) -> Result<Receipt, ChainError> {
        tracing::info!(%account, "revoking betting allowance");
        let handle = self.chain.submit(account, self.contracts.approve(0)).await?;
        self.chain.await_confirmation(handle).await
    }

    pub fn is_in_flight(&self, account: Address) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&account)
    }
}

/// Handle to a running attempt. Dropping it does not stop the attempt.
pub struct PlacementAttempt {
    state: watch::Receiver<AttemptState>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<PlacementOutcome>,
    stake: u128,
}

impl PlacementAttempt {
    pub fn state(&self) -> AttemptState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AttemptState> {
        self.state.clone()
    }

    /// Stops the attempt if the bet call has not been submitted yet.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub async fn outcome(self) -> PlacementOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(%err, "bet attempt task failed");
                PlacementOutcome::Failed(
                    PlacementFailure::new(FailureReason::Interrupted)
                        .with_exposure(AllowanceExposure::Possible(self.stake))
                        .with_detail(err.to_string()),
                )
            }
        }
    }
}

struct InFlightSlot {
    set: Arc<Mutex<HashSet<Address>>>,
    account: Address,
}

impl InFlightSlot {
    fn claim(set: &Arc<Mutex<HashSet<Address>>>, account: Address) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account);
        inserted.then(|| Self {
            set: Arc::clone(set),
            account,
        })
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.account);
    }
}

enum Halt {
    Chain(ChainError),
    AccountChanged,
    Cancelled,
}

struct Interrupts {
    session: watch::Receiver<SessionState>,
    epoch: u64,
    cancel: watch::Receiver<bool>,
}

impl Interrupts {
    fn account_changed(&self) -> bool {
        self.session.borrow().epoch != self.epoch
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Runs `op` unless the account switches first, or, when `cancellable`,
    /// the caller cancels first. The chain call itself is not aborted.
    async fn race<T>(
        &mut self,
        op: impl Future<Output = Result<T, ChainError>>,
        cancellable: bool,
    ) -> Result<T, Halt> {
        let epoch = self.epoch;
        tokio::select! {
            biased;
            _ = wait_for_switch(&mut self.session, epoch) => Err(Halt::AccountChanged),
            _ = wait_for_cancel(&mut self.cancel), if cancellable => Err(Halt::Cancelled),
            result = op => result.map_err(Halt::Chain),
        }
    }
}

async fn wait_for_switch(rx: &mut watch::Receiver<SessionState>, epoch: u64) {
    if rx.wait_for(|state| state.epoch != epoch).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

struct Attempt<C> {
    chain: Arc<C>,
    ledger: Arc<BetLedgerCache<C>>,
    contracts: BettingContracts,
    account: Address,
    intent: BetIntent,
    odds: f64,
    state: watch::Sender<AttemptState>,
    interrupts: Interrupts,
    exposure: AllowanceExposure,
    _slot: InFlightSlot,
}

impl<C: ChainClient> Attempt<C> {
    async fn run(mut self) -> PlacementOutcome {
        match self.drive().await {
            Ok(record) => {
                tracing::info!(
                    account = %self.account,
                    id = %record.id(),
                    "bet confirmed"
                );
                self.enter(AttemptState::Confirmed);
                PlacementOutcome::Confirmed(record)
            }
            Err(failure) => {
                tracing::error!(
                    account = %self.account,
                    match_id = self.intent.match_id,
                    reason = ?failure.reason,
                    exposure = ?failure.exposure,
                    detail = failure.detail.as_deref().unwrap_or(""),
                    "bet attempt failed"
                );
                self.enter(AttemptState::Failed);
                PlacementOutcome::Failed(failure)
            }
        }
    }

    fn enter(&self, state: AttemptState) {
        tracing::debug!(account = %self.account, ?state, "attempt transition");
        self.state.send_replace(state);
    }

    fn checkpoint(&self) -> Result<(), PlacementFailure> {
        if self.interrupts.account_changed() {
            return Err(self.fail(FailureReason::AccountChanged));
        }
        if self.interrupts.cancelled() {
            return Err(self.fail(FailureReason::Cancelled));
        }
        Ok(())
    }

    fn fail(&self, reason: FailureReason) -> PlacementFailure {
        PlacementFailure::new(reason).with_exposure(self.exposure)
    }

    /// Maps a halted step onto a failure. `unchanged` is the exposure that
    /// holds if the halted call had no effect on chain.
    fn halted(&self, phase: Phase, halt: Halt, unchanged: AllowanceExposure) -> PlacementFailure {
        match halt {
            Halt::AccountChanged => self.fail(FailureReason::AccountChanged),
            Halt::Cancelled => self.fail(FailureReason::Cancelled),
            Halt::Chain(err) => {
                let exposure = match err {
                    ChainError::Rejected(_) => unchanged,
                    _ => AllowanceExposure::Possible(self.intent.stake),
                };
                PlacementFailure::new(classify(phase, &err))
                    .with_exposure(exposure)
                    .with_detail(err.to_string())
            }
        }
    }

    async fn drive(&mut self) -> Result<BetRecord, PlacementFailure> {
        let stake = self.intent.stake;
        self.checkpoint()?;

        self.enter(AttemptState::AwaitingAuthorization);
        let approve = self.contracts.approve(stake);
        let handle = self
            .interrupts
            .race(self.chain.submit(self.account, approve), true)
            .await
            .map_err(|halt| self.halted(Phase::Authorization, halt, AllowanceExposure::None))?;
        self.exposure = AllowanceExposure::Possible(stake);
        tracing::info!(account = %self.account, hash = %handle.hash, "authorization submitted");
        self.interrupts
            .race(self.chain.await_confirmation(handle), true)
            .await
            .map_err(|halt| self.halted(Phase::Authorization, halt, AllowanceExposure::None))?;
        self.exposure = AllowanceExposure::Granted(stake);
        self.checkpoint()?;

        self.enter(AttemptState::AwaitingSubmission);
        let bet = self
            .contracts
            .place_bet(self.intent.match_id, self.intent.outcome, stake);
        let handle = self
            .interrupts
            .race(self.chain.submit(self.account, bet), false)
            .await
            .map_err(|halt| self.halted(Phase::Submission, halt, self.exposure))?;
        let granted = self.exposure;
        self.exposure = AllowanceExposure::Possible(stake);
        tracing::info!(account = %self.account, hash = %handle.hash, "bet submitted");
        self.interrupts
            .race(self.chain.await_confirmation(handle), false)
            .await
            .map_err(|halt| self.halted(Phase::Submission, halt, granted))?;
        if self.interrupts.account_changed() {
            return Err(self.fail(FailureReason::AccountChanged));
        }

        self.exposure = AllowanceExposure::None;
        let record = BetRecord::pending(
            self.intent.match_id,
            self.intent.outcome,
            stake,
            self.odds,
            self.ledger.next_sequence(),
        );
        let id = record.id().clone();
        self.ledger.record(self.account, record.clone());
        match self.ledger.bind_recorded(self.account, &id).await {
            Ok(Some(chain_bet_id)) => {
                tracing::debug!(%id, chain_bet_id, "bound confirmed bet");
            }
            Ok(None) => {
                tracing::warn!(%id, "confirmed bet not yet visible on chain");
            }
            Err(err) => {
                tracing::warn!(%id, %err, "could not read back confirmed bet");
            }
        }
        Ok(self
            .ledger
            .snapshot(self.account)
            .into_iter()
            .find(|known| known.id() == &id)
            .unwrap_or(record))
    }
}
