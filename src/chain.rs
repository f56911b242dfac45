//! Request/response access to the ledger node.
//!
//! A [`ChainClient`] submits calls, waits for their inclusion and reads
//! contract state. It never retries; retry policy belongs to the caller.

use crate::{
    error::ChainError,
    types::{
        Address,
        BetStatus,
        MatchId,
        Outcome,
    },
};
use alloy_primitives::TxHash;
use std::{
    future::Future,
    sync::Arc,
};

pub mod abi;
pub mod json_rpc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractFunction {
    Approve {
        spender: Address,
        amount: u128,
    },
    PlaceBet {
        match_id: MatchId,
        outcome: Outcome,
        amount: u128,
    },
    BetsByUser {
        user: Address,
    },
    BalanceOf {
        owner: Address,
    },
    Allowance {
        owner: Address,
        spender: Address,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub function: ContractFunction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransactionHandle {
    pub hash: TxHash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
}

/// A bet as the betting contract reports it for one account.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfirmedBet {
    /// Position in the account's on-chain bet list.
    pub index: u64,
    /// The contract's own bet id.
    pub bet_id: u64,
    pub match_id: MatchId,
    pub outcome: Outcome,
    pub stake: u128,
    pub status: BetStatus,
    pub odds: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChainValue {
    Bets(Vec<ConfirmedBet>),
    Amount(u128),
}

pub trait ChainClient: Send + Sync + 'static {
    /// Hands a call signed by `from` to the node. Resolves once the call is
    /// accepted into the pending pool, not when it is included.
    fn submit(
        &self,
        from: Address,
        call: ContractCall,
    ) -> impl Future<Output = Result<TransactionHandle, ChainError>> + Send;

    /// Suspends until the transaction is included or terminally rejected.
    fn await_confirmation(
        &self,
        handle: TransactionHandle,
    ) -> impl Future<Output = Result<Receipt, ChainError>> + Send;

    fn read(
        &self,
        call: ContractCall,
    ) -> impl Future<Output = Result<ChainValue, ChainError>> + Send;
}

impl<T: ChainClient> ChainClient for Arc<T> {
    fn submit(
        &self,
        from: Address,
        call: ContractCall,
    ) -> impl Future<Output = Result<TransactionHandle, ChainError>> + Send {
        T::submit(self, from, call)
    }

    fn await_confirmation(
        &self,
        handle: TransactionHandle,
    ) -> impl Future<Output = Result<Receipt, ChainError>> + Send {
        T::await_confirmation(self, handle)
    }

    fn read(
        &self,
        call: ContractCall,
    ) -> impl Future<Output = Result<ChainValue, ChainError>> + Send {
        T::read(self, call)
    }
}

/// The wagering token and the betting contract that spends it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BettingContracts {
    pub token: Address,
    pub betting: Address,
}

impl BettingContracts {
    pub fn new(token: Address, betting: Address) -> Self {
        Self { token, betting }
    }

    /// Lets the betting contract move exactly `amount` of the token.
    pub fn approve(&self, amount: u128) -> ContractCall {
        ContractCall {
            to: self.token,
            function: ContractFunction::Approve {
                spender: self.betting,
                amount,
            },
        }
    }

    pub fn place_bet(&self, match_id: MatchId, outcome: Outcome, amount: u128) -> ContractCall {
        ContractCall {
            to: self.betting,
            function: ContractFunction::PlaceBet {
                match_id,
                outcome,
                amount,
            },
        }
    }

    pub fn bets_by_user(&self, user: Address) -> ContractCall {
        ContractCall {
            to: self.betting,
            function: ContractFunction::BetsByUser { user },
        }
    }

    pub fn balance_of(&self, owner: Address) -> ContractCall {
        ContractCall {
            to: self.token,
            function: ContractFunction::BalanceOf { owner },
        }
    }

    pub fn allowance(&self, owner: Address) -> ContractCall {
        ContractCall {
            to: self.token,
            function: ContractFunction::Allowance {
                owner,
                spender: self.betting,
            },
        }
    }
}

pub async fn confirmed_bets<C: ChainClient>(
    chain: &C,
    contracts: &BettingContracts,
    user: Address,
) -> Result<Vec<ConfirmedBet>, ChainError> {
    match chain.read(contracts.bets_by_user(user)).await? {
        ChainValue::Bets(bets) => Ok(bets),
        other => Err(ChainError::InvalidResponse(format!(
            "expected bet list, got {other:?}"
        ))),
    }
}

pub async fn read_amount<C: ChainClient>(
    chain: &C,
    call: ContractCall,
) -> Result<u128, ChainError> {
    match chain.read(call).await? {
        ChainValue::Amount(amount) => Ok(amount),
        other => Err(ChainError::InvalidResponse(format!(
            "expected amount, got {other:?}"
        ))),
    }
}
