//! Per-account view of placed bets, merged with what the betting contract
//! reports.

use crate::{
    chain::{
        BettingContracts,
        ChainClient,
        ConfirmedBet,
        confirmed_bets,
    },
    error::ChainError,
    types::{
        Address,
        BetId,
        BetRecord,
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
            AtomicU64,
            Ordering,
        },
    },
};

pub struct BetLedgerCache<C> {
    chain: Arc<C>,
    contracts: BettingContracts,
    books: Mutex<HashMap<Address, Vec<BetRecord>>>,
    sequence: AtomicU64,
}

impl<C: ChainClient> BetLedgerCache<C> {
    pub fn new(chain: Arc<C>, contracts: BettingContracts) -> Self {
        Self {
            chain,
            contracts,
            books: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Monotonic placement order shared by every account.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn record(&self, account: Address, bet: BetRecord) {
        let mut books = self.books();
        let book = books.entry(account).or_default();
        if book.iter().any(|existing| existing.id() == bet.id()) {
            tracing::warn!(%account, id = %bet.id(), "bet already recorded");
            return;
        }
        tracing::info!(%account, id = %bet.id(), "recorded bet");
        book.push(bet);
    }

    /// Local records only, newest first. No chain access.
    pub fn snapshot(&self, account: Address) -> Vec<BetRecord> {
        let books = self.books();
        books
            .get(&account)
            .map(|book| newest_first(book))
            .unwrap_or_default()
    }

    /// Merges the contract's confirmed bets for `account` into the local
    /// records. Chain-only entries are rebuilt on every call and never stored.
    pub async fn reconcile(&self, account: Address) -> Result<Vec<BetRecord>, ChainError> {
        let confirmed = confirmed_bets(self.chain.as_ref(), &self.contracts, account).await?;
        let mut books = self.books();
        let book = books.entry(account).or_default();
        let claimed = merge_confirmed(book, &confirmed);

        let mut merged = newest_first(book);
        let mut chain_only: Vec<&ConfirmedBet> = confirmed
            .iter()
            .filter(|entry| !claimed.contains(&entry.bet_id))
            .collect();
        chain_only.sort_by_key(|entry| entry.index);
        merged.extend(chain_only.into_iter().map(chain_record));
        tracing::debug!(
            %account,
            local = book.len(),
            confirmed = confirmed.len(),
            "reconciled ledger"
        );
        Ok(merged)
    }

    /// Best-effort binding of one freshly recorded bet to its contract entry.
    pub(crate) async fn bind_recorded(
        &self,
        account: Address,
        id: &BetId,
    ) -> Result<Option<u64>, ChainError> {
        let confirmed = confirmed_bets(self.chain.as_ref(), &self.contracts, account).await?;
        let mut books = self.books();
        let Some(book) = books.get_mut(&account) else {
            return Ok(None);
        };
        let mut claimed = bound_ids(book);
        let Some(record) = book.iter_mut().find(|record| record.id() == id) else {
            return Ok(None);
        };
        if let Some(bound) = record.chain_bet_id() {
            return Ok(Some(bound));
        }
        Ok(bind_by_content(record, &confirmed, &mut claimed))
    }

    fn books(&self) -> MutexGuard<'_, HashMap<Address, Vec<BetRecord>>> {
        self.books.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bound_ids(book: &[BetRecord]) -> HashSet<u64> {
    book.iter().filter_map(BetRecord::chain_bet_id).collect()
}

/// Applies confirmed statuses to bound records, binds what can be bound, and
/// returns every contract bet id now claimed by a local record.
fn merge_confirmed(book: &mut [BetRecord], confirmed: &[ConfirmedBet]) -> HashSet<u64> {
    let mut claimed = bound_ids(book);
    book.sort_by(|a, b| b.sequence().cmp(&a.sequence()));
    for record in book.iter_mut() {
        match record.chain_bet_id() {
            Some(bound) => {
                if let Some(entry) = confirmed.iter().find(|entry| entry.bet_id == bound) {
                    record.apply_confirmed_status(entry.status);
                }
            }
            None => {
                bind_by_content(record, confirmed, &mut claimed);
            }
        }
    }
    claimed
}

/// Binds `record` to the newest unclaimed confirmed entry with the same
/// match, outcome and stake.
fn bind_by_content(
    record: &mut BetRecord,
    confirmed: &[ConfirmedBet],
    claimed: &mut HashSet<u64>,
) -> Option<u64> {
    let entry = confirmed
        .iter()
        .filter(|entry| !claimed.contains(&entry.bet_id))
        .filter(|entry| same_bet(record, entry))
        .max_by_key(|entry| entry.index)?;
    record.bind_chain_bet(entry.bet_id);
    record.apply_confirmed_status(entry.status);
    claimed.insert(entry.bet_id);
    tracing::debug!(id = %record.id(), chain_bet_id = entry.bet_id, "bound bet to chain entry");
    Some(entry.bet_id)
}

fn same_bet(record: &BetRecord, entry: &ConfirmedBet) -> bool {
    record.match_id() == entry.match_id
        && record.outcome() == entry.outcome
        && record.stake() == entry.stake
}

fn newest_first(book: &[BetRecord]) -> Vec<BetRecord> {
    let mut records = book.to_vec();
    records.sort_by(|a, b| b.sequence().cmp(&a.sequence()));
    records
}

fn chain_record(entry: &ConfirmedBet) -> BetRecord {
    BetRecord::from_chain(
        entry.bet_id,
        entry.index,
        entry.match_id,
        entry.outcome,
        entry.stake,
        entry.odds,
        entry.status,
    )
}
