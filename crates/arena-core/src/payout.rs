//! Prize-pool arithmetic.
//!
//! All arithmetic is checked 256-bit integer math. The basis-point fee is
//! multiply-then-divide, the split is front-loaded: any indivisible remainder
//! goes to the highest-ranked winners one unit each, so the result is
//! deterministic and verifiable on chain.

use crate::{errors::CoreError, types::U256};
use serde::{Deserialize, Serialize};

const BPS_DENOMINATOR: u64 = 10_000;
const MAX_FEE_BPS: u16 = 1_000;

/// How the net pool is divided among ranked winners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayoutScheme {
    /// Equal shares, remainder front-loaded by rank.
    #[default]
    EqualSplit,
    /// 60/40 for two winners, 70/20/10 for three; equal split otherwise.
    RankWeighted,
}

/// The result of splitting a pool: gross pool, protocol fee, and the
/// per-winner payouts in rank order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSplit {
    pub pool: U256,
    pub fee: U256,
    pub available: U256,
    pub payouts: Vec<U256>,
}

impl PoolSplit {
    pub fn total_paid(&self) -> U256 {
        self.payouts
            .iter()
            .fold(U256::zero(), |acc, p| acc.saturating_add(*p))
    }
}

/// Split `entry_fee * n_players` among `n_winners` ranked winners after
/// deducting the basis-point protocol fee.
pub fn split_pool(
    entry_fee: U256,
    n_players: u32,
    protocol_fee_bps: u16,
    n_winners: usize,
    scheme: PayoutScheme,
) -> Result<PoolSplit, CoreError> {
    if n_winners == 0 {
        return Err(CoreError::NoWinners);
    }
    if n_winners as u64 > n_players as u64 {
        return Err(CoreError::TooManyWinners {
            winners: n_winners,
            players: n_players,
        });
    }
    if protocol_fee_bps > MAX_FEE_BPS {
        return Err(CoreError::FeeOutOfRange(protocol_fee_bps));
    }

    let pool = entry_fee
        .checked_mul(U256::from(n_players))
        .ok_or(CoreError::PoolOverflow)?;
    let fee = pool
        .checked_mul(U256::from(protocol_fee_bps))
        .ok_or(CoreError::PoolOverflow)?
        / U256::from(BPS_DENOMINATOR);
    let available = pool - fee;

    let payouts = match scheme {
        PayoutScheme::EqualSplit => equal_split(available, n_winners),
        PayoutScheme::RankWeighted => rank_weighted(available, n_winners),
    };

    Ok(PoolSplit {
        pool,
        fee,
        available,
        payouts,
    })
}

fn equal_split(available: U256, n_winners: usize) -> Vec<U256> {
    let k = U256::from(n_winners as u64);
    let per_winner = available / k;
    let remainder = (available - per_winner * k).as_usize();

    (0..n_winners)
        .map(|rank| {
            if rank < remainder {
                per_winner + U256::one()
            } else {
                per_winner
            }
        })
        .collect()
}

fn rank_weighted(available: U256, n_winners: usize) -> Vec<U256> {
    let weights: &[u64] = match n_winners {
        2 => &[60, 40],
        3 => &[70, 20, 10],
        _ => return equal_split(available, n_winners),
    };

    let mut payouts: Vec<U256> = weights
        .iter()
        .map(|w| available * U256::from(*w) / U256::from(100u64))
        .collect();

    // Weights are already rank-descending, so crediting the rounding dust to
    // rank 0 preserves monotonicity.
    let paid = payouts
        .iter()
        .fold(U256::zero(), |acc, p| acc + *p);
    payouts[0] += available - paid;
    payouts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_conserved(split: &PoolSplit) {
        assert_eq!(split.total_paid(), split.available);
        assert_eq!(split.fee + split.total_paid(), split.pool);
        for pair in split.payouts.windows(2) {
            assert!(pair[0] >= pair[1], "payouts must be rank-monotonic");
        }
    }

    #[test]
    fn two_winner_even_split() {
        let entry = U256::exp10(15);
        let split = split_pool(entry, 2, 250, 2, PayoutScheme::EqualSplit).unwrap();

        assert_eq!(split.pool, U256::from(2u64) * entry);
        assert_eq!(split.fee, U256::from(50_000_000_000_000u64));
        assert_eq!(split.available, U256::from(1_950_000_000_000_000u64));
        assert_eq!(
            split.payouts,
            vec![
                U256::from(975_000_000_000_000u64),
                U256::from(975_000_000_000_000u64)
            ]
        );
        assert_conserved(&split);
    }

    #[test]
    fn remainder_goes_to_top_ranks() {
        // 3 players at 1 unit, no fee, 2 winners: 3 / 2 leaves one unit over.
        let split = split_pool(U256::one(), 3, 0, 2, PayoutScheme::EqualSplit).unwrap();
        assert_eq!(split.payouts, vec![U256::from(2u64), U256::one()]);
        assert_conserved(&split);

        // 4 players at 1 unit, no fee, 3 winners.
        let split = split_pool(U256::one(), 4, 0, 3, PayoutScheme::EqualSplit).unwrap();
        assert_eq!(
            split.payouts,
            vec![U256::from(2u64), U256::one(), U256::one()]
        );
        assert_conserved(&split);
    }

    #[test]
    fn fee_boundaries() {
        let entry = U256::from(1_000u64);

        let none = split_pool(entry, 4, 0, 1, PayoutScheme::EqualSplit).unwrap();
        assert_eq!(none.fee, U256::zero());
        assert_eq!(none.payouts, vec![U256::from(4_000u64)]);

        let max = split_pool(entry, 4, 1_000, 1, PayoutScheme::EqualSplit).unwrap();
        assert_eq!(max.fee, U256::from(400u64));
        assert_eq!(max.payouts, vec![U256::from(3_600u64)]);

        assert_eq!(
            split_pool(entry, 4, 1_001, 1, PayoutScheme::EqualSplit),
            Err(CoreError::FeeOutOfRange(1_001))
        );
    }

    #[test]
    fn fee_truncates_toward_zero() {
        // pool = 33, 250 bps => 33 * 250 / 10000 = 0 (integer division).
        let split = split_pool(U256::from(11u64), 3, 250, 1, PayoutScheme::EqualSplit).unwrap();
        assert_eq!(split.fee, U256::zero());
        assert_eq!(split.available, U256::from(33u64));
        assert_conserved(&split);
    }

    #[test]
    fn rank_weighted_two_and_three() {
        let split = split_pool(U256::from(50u64), 2, 0, 2, PayoutScheme::RankWeighted).unwrap();
        assert_eq!(split.payouts, vec![U256::from(60u64), U256::from(40u64)]);
        assert_conserved(&split);

        let split = split_pool(U256::from(25u64), 4, 0, 3, PayoutScheme::RankWeighted).unwrap();
        assert_eq!(split.payouts, vec![U256::from(70u64), U256::from(20u64), U256::from(10u64)]);
        assert_conserved(&split);

        // Dust from the percentage rounding lands on rank 0.
        let split = split_pool(U256::from(101u64), 2, 0, 2, PayoutScheme::RankWeighted).unwrap();
        assert_eq!(split.available, U256::from(202u64));
        assert_eq!(split.payouts, vec![U256::from(122u64), U256::from(80u64)]);
        assert_conserved(&split);
    }

    #[test]
    fn rank_weighted_falls_back_to_equal() {
        let split = split_pool(U256::from(10u64), 8, 0, 4, PayoutScheme::RankWeighted).unwrap();
        assert_eq!(split.payouts, vec![U256::from(20u64); 4]);
        assert_conserved(&split);
    }

    #[test]
    fn rejects_bad_winner_counts() {
        assert_eq!(
            split_pool(U256::one(), 4, 0, 0, PayoutScheme::EqualSplit),
            Err(CoreError::NoWinners)
        );
        assert_eq!(
            split_pool(U256::one(), 2, 0, 3, PayoutScheme::EqualSplit),
            Err(CoreError::TooManyWinners {
                winners: 3,
                players: 2
            })
        );
    }

    #[test]
    fn overflow_is_an_error_not_a_wrap() {
        let result = split_pool(U256::MAX, 2, 0, 1, PayoutScheme::EqualSplit);
        assert_eq!(result, Err(CoreError::PoolOverflow));
    }
}
