//! Solidity bindings for the token and betting contract functions the client
//! calls.

use super::{
    ChainValue,
    ConfirmedBet,
    ContractFunction,
};
use crate::{
    error::ChainError,
    types::{
        BetStatus,
        Outcome,
    },
};
use alloy_primitives::U256;
use alloy_sol_types::{
    SolCall,
    sol,
};

sol! {
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }

    interface IBetZilla {
        struct Bet {
            uint256 id;
            uint256 matchId;
            uint8 prediction;
            uint256 amount;
            uint8 status;
            uint256 odds;
        }

        function placeBet(uint256 matchId, uint8 prediction, uint256 amount) external;
        function getBetsByUser(address user) external view returns (Bet[] memory);
    }
}

/// Odds are stored on chain multiplied by this factor.
pub const ODDS_SCALE: f64 = 100.0;

pub const APPROVE: &str = <IERC20::approveCall as SolCall>::SIGNATURE;
pub const PLACE_BET: &str = <IBetZilla::placeBetCall as SolCall>::SIGNATURE;
pub const GET_BETS_BY_USER: &str = <IBetZilla::getBetsByUserCall as SolCall>::SIGNATURE;
pub const BALANCE_OF: &str = <IERC20::balanceOfCall as SolCall>::SIGNATURE;
pub const ALLOWANCE: &str = <IERC20::allowanceCall as SolCall>::SIGNATURE;

pub fn signature(function: &ContractFunction) -> &'static str {
    match function {
        ContractFunction::Approve { .. } => APPROVE,
        ContractFunction::PlaceBet { .. } => PLACE_BET,
        ContractFunction::BetsByUser { .. } => GET_BETS_BY_USER,
        ContractFunction::BalanceOf { .. } => BALANCE_OF,
        ContractFunction::Allowance { .. } => ALLOWANCE,
    }
}

/// Selector-prefixed calldata for `function`.
pub fn encode_call(function: &ContractFunction) -> Vec<u8> {
    match *function {
        ContractFunction::Approve { spender, amount } => IERC20::approveCall {
            spender,
            amount: U256::from(amount),
        }
        .abi_encode(),
        ContractFunction::PlaceBet {
            match_id,
            outcome,
            amount,
        } => IBetZilla::placeBetCall {
            matchId: U256::from(match_id),
            prediction: outcome.code(),
            amount: U256::from(amount),
        }
        .abi_encode(),
        ContractFunction::BetsByUser { user } => {
            IBetZilla::getBetsByUserCall { user }.abi_encode()
        }
        ContractFunction::BalanceOf { owner } => IERC20::balanceOfCall { owner }.abi_encode(),
        ContractFunction::Allowance { owner, spender } => {
            IERC20::allowanceCall { owner, spender }.abi_encode()
        }
    }
}

pub fn decode_output(
    function: &ContractFunction,
    data: &[u8],
) -> Result<ChainValue, ChainError> {
    match function {
        ContractFunction::BetsByUser { .. } => {
            let bets = IBetZilla::getBetsByUserCall::abi_decode_returns(data)
                .map_err(|e| invalid(GET_BETS_BY_USER, e))?;
            bets.into_iter()
                .enumerate()
                .map(|(index, bet)| confirmed_bet(index as u64, bet))
                .collect::<Result<_, _>>()
                .map(ChainValue::Bets)
        }
        ContractFunction::BalanceOf { .. } => {
            let amount = IERC20::balanceOfCall::abi_decode_returns(data)
                .map_err(|e| invalid(BALANCE_OF, e))?;
            to_u128(amount).map(ChainValue::Amount)
        }
        ContractFunction::Allowance { .. } => {
            let amount = IERC20::allowanceCall::abi_decode_returns(data)
                .map_err(|e| invalid(ALLOWANCE, e))?;
            to_u128(amount).map(ChainValue::Amount)
        }
        other => Err(ChainError::InvalidResponse(format!(
            "{} has no readable output",
            signature(other)
        ))),
    }
}

fn confirmed_bet(index: u64, bet: IBetZilla::Bet) -> Result<ConfirmedBet, ChainError> {
    let outcome = Outcome::from_code(bet.prediction).ok_or_else(|| {
        ChainError::InvalidResponse(format!("unknown prediction code {}", bet.prediction))
    })?;
    Ok(ConfirmedBet {
        index,
        bet_id: to_u64(bet.id)?,
        match_id: to_u64(bet.matchId)?,
        outcome,
        stake: to_u128(bet.amount)?,
        status: BetStatus::from_code(bet.status),
        odds: to_u64(bet.odds)? as f64 / ODDS_SCALE,
    })
}

fn invalid(what: &str, err: alloy_sol_types::Error) -> ChainError {
    ChainError::InvalidResponse(format!("{what}: {err}"))
}

fn to_u128(value: U256) -> Result<u128, ChainError> {
    u128::try_from(value)
        .map_err(|_| ChainError::InvalidResponse(format!("{value} exceeds u128")))
}

fn to_u64(value: U256) -> Result<u64, ChainError> {
    u64::try_from(value)
        .map_err(|_| ChainError::InvalidResponse(format!("{value} exceeds u64")))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::types::Address;

    fn onchain_bet(
        id: u64,
        match_id: u64,
        prediction: u8,
        status: u8,
        odds: u64,
    ) -> IBetZilla::Bet {
        IBetZilla::Bet {
            id: U256::from(id),
            matchId: U256::from(match_id),
            prediction,
            amount: U256::from(10u64),
            status,
            odds: U256::from(odds),
        }
    }

    fn encode_bets(bets: Vec<IBetZilla::Bet>) -> Vec<u8> {
        IBetZilla::getBetsByUserCall::abi_encode_returns(&bets)
    }

    #[test]
    fn signature__matches_known_erc20_selectors() {
        assert_eq!(APPROVE, "approve(address,uint256)");
        assert_eq!(PLACE_BET, "placeBet(uint256,uint8,uint256)");
        assert_eq!(hex::encode(IERC20::approveCall::SELECTOR), "095ea7b3");
        assert_eq!(hex::encode(IERC20::balanceOfCall::SELECTOR), "70a08231");
        assert_eq!(hex::encode(IERC20::allowanceCall::SELECTOR), "dd62ed3e");
    }

    #[test]
    fn encode_call__approve_pads_spender_and_amount() {
        // given
        let spender = Address::repeat_byte(0xab);
        let function = ContractFunction::Approve {
            spender,
            amount: 10,
        };

        // when
        let data = encode_call(&function);

        // then
        assert_eq!(data.len(), 4 + 2 * 32);
        assert_eq!(&data[..4], &IERC20::approveCall::SELECTOR);
        assert_eq!(&data[4..16], &[0u8; 12]);
        assert_eq!(&data[16..36], spender.as_slice());
        assert_eq!(data[67], 10);
    }

    #[test]
    fn encode_call__place_bet_carries_prediction_code() {
        let data = encode_call(&ContractFunction::PlaceBet {
            match_id: 7,
            outcome: Outcome::Away,
            amount: 1,
        });
        assert_eq!(&data[..4], &IBetZilla::placeBetCall::SELECTOR);
        assert_eq!(data[35], 7);
        assert_eq!(data[67], 2);
    }

    #[test]
    fn decode_output__reads_bet_list_with_scaled_odds() {
        // given
        let data = encode_bets(vec![
            onchain_bet(11, 1, 0, 1, 210),
            onchain_bet(12, 3, 1, 9, 380),
        ]);
        let function = ContractFunction::BetsByUser {
            user: Address::ZERO,
        };

        // when
        let decoded = decode_output(&function, &data).unwrap();

        // then
        let ChainValue::Bets(bets) = decoded else {
            panic!("expected bets, got {decoded:?}");
        };
        assert_eq!(bets.len(), 2);
        assert_eq!(bets[0].bet_id, 11);
        assert_eq!(bets[0].outcome, Outcome::Home);
        assert_eq!(bets[0].status, BetStatus::Won);
        assert_eq!(bets[0].odds, 2.1);
        assert_eq!(bets[1].index, 1);
        assert_eq!(bets[1].outcome, Outcome::Draw);
        assert_eq!(bets[1].status, BetStatus::Pending);
    }

    #[test]
    fn decode_output__rejects_unknown_prediction() {
        let data = encode_bets(vec![onchain_bet(1, 1, 7, 0, 150)]);
        let function = ContractFunction::BetsByUser {
            user: Address::ZERO,
        };

        let result = decode_output(&function, &data);

        assert!(matches!(result, Err(ChainError::InvalidResponse(_))));
    }

    #[test]
    fn decode_output__rejects_truncated_data() {
        let function = ContractFunction::BetsByUser {
            user: Address::ZERO,
        };
        let mut data = encode_bets(vec![onchain_bet(1, 1, 0, 0, 150)]);
        data.truncate(data.len() - 1);

        let result = decode_output(&function, &data);

        assert!(matches!(result, Err(ChainError::InvalidResponse(_))));
    }

    #[test]
    fn decode_output__reads_amount_word() {
        let function = ContractFunction::BalanceOf {
            owner: Address::ZERO,
        };
        let data = U256::from(42u64).to_be_bytes::<32>();
        assert_eq!(
            decode_output(&function, &data).unwrap(),
            ChainValue::Amount(42)
        );
    }
}
