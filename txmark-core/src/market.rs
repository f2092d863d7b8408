//! # Market Settlement Ledger
//!
//! One [`Market`] holds the pooled wagers of a single binary question:
//! "will the observed count reach `threshold` by `deadline`?". It accepts
//! wagers while active, is resolved once by its assigned oracle, and then
//! pays winners (or refunds everybody if it was cancelled).
//!
//! Payout for a winning wager of size `a`:
//!
//! ```text
//! a + floor(a * losing_pool / winning_pool)
//! ```
//!
//! Flooring leaves a residue of at most one unit per winning wager in the
//! market's balance. The residue is never redistributed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    treasury::ValueSink,
    types::{Address, MarketId, MarketStatus, Side, Timestamp},
    MarketError,
};

/// A single wager placed by a bettor.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Wager {
    /// Amount wagered in base units
    pub amount: u64,

    /// Side the wager backs
    pub side: Side,

    /// When the wager was accepted
    pub placed_at: Timestamp,

    /// Whether this wager was already paid out
    pub claimed: bool,
}

/// Outcome recorded when the oracle resolves a market.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub resolved_at: Timestamp,
    pub observed_count: u64,
    pub winning_side: Side,
}

/// Read-only snapshot of a market, as served to indexers and the CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MarketInfo {
    pub id: MarketId,
    pub creator: Address,
    pub oracle: Address,
    pub description: String,
    pub threshold: u64,
    pub deadline: Timestamp,
    pub created_at: Timestamp,
    pub status: MarketStatus,
    pub above_total: u64,
    pub below_total: u64,
    pub initial_liquidity: u64,
    pub initial_liquidity_withdrawn: bool,
    pub held_value: u64,
    pub total_claimed: u64,
    pub bettor_count: usize,
    pub resolution: Option<Resolution>,
}

/// Settlement ledger for one threshold market.
///
/// Fields are private: the only way to change a market is through the
/// operations below, each of which either applies completely or leaves the
/// market untouched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Market {
    id: MarketId,
    creator: Address,
    oracle: Address,
    description: String,
    threshold: u64,
    deadline: Timestamp,
    created_at: Timestamp,
    status: MarketStatus,
    above_total: u64,
    below_total: u64,
    initial_liquidity: u64,
    initial_liquidity_withdrawn: bool,
    /// Value currently held by the market
    balance: u64,
    total_claimed: u64,
    wagers: BTreeMap<Address, Vec<Wager>>,
    resolution: Option<Resolution>,
    cancelled_at: Option<Timestamp>,
}

/// Payout owed for a winning wager of `amount`.
///
/// Computed in `u128` and floored. Returns `amount` unchanged when the
/// winning pool is empty, which only happens for refunds.
pub fn payout_for(amount: u64, winning_pool: u64, losing_pool: u64) -> u64 {
    if winning_pool == 0 {
        return amount;
    }
    let share = (amount as u128 * losing_pool as u128) / winning_pool as u128;
    // share <= losing_pool because amount <= winning_pool
    amount.saturating_add(share as u64)
}

/// Ledger positions picked by a claim, kept so the claim can be reverted.
struct ClaimPlan {
    payout: u64,
    positions: Vec<usize>,
}

impl Market {
    /// Creates a new active market. Parameter validation is the registry's job.
    ///
    /// # Arguments
    /// * `id` - Unique market id
    /// * `creator` - Identity that created (and seeded) the market
    /// * `oracle` - Identity allowed to resolve the market
    /// * `description` - Human readable question
    /// * `threshold` - Count at or above which `Above` wins
    /// * `deadline` - End of the betting window (unix seconds)
    /// * `initial_liquidity` - Creator seed, not attributed to either side
    /// * `now` - Creation time
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: MarketId,
        creator: Address,
        oracle: Address,
        description: String,
        threshold: u64,
        deadline: Timestamp,
        initial_liquidity: u64,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            creator,
            oracle,
            description,
            threshold,
            deadline,
            created_at: now,
            status: MarketStatus::Active,
            above_total: 0,
            below_total: 0,
            initial_liquidity,
            initial_liquidity_withdrawn: false,
            balance: initial_liquidity,
            total_claimed: 0,
            wagers: BTreeMap::new(),
            resolution: None,
            cancelled_at: None,
        }
    }

    /// Place a wager on one side.
    ///
    /// # Arguments
    /// * `bettor` - Identity placing the wager
    /// * `side` - Side backed by the wager
    /// * `amount` - Amount in base units, must be non-zero
    /// * `now` - Current time; must be strictly before the deadline
    pub fn place_bet(
        &mut self,
        bettor: &Address,
        side: Side,
        amount: u64,
        now: Timestamp,
    ) -> Result<()> {
        if self.status != MarketStatus::Active {
            return Err(MarketError::MarketNotActive(self.id.clone()));
        }
        if now >= self.deadline {
            return Err(MarketError::BettingClosed(self.id.clone()));
        }
        if amount == 0 {
            return Err(MarketError::InvalidBetAmount);
        }

        let pool = match side {
            Side::Above => self.above_total,
            Side::Below => self.below_total,
        };
        let new_pool = pool.checked_add(amount).ok_or(MarketError::InvalidBetAmount)?;
        let new_balance = self
            .balance
            .checked_add(amount)
            .ok_or(MarketError::InvalidBetAmount)?;

        match side {
            Side::Above => self.above_total = new_pool,
            Side::Below => self.below_total = new_pool,
        }
        self.balance = new_balance;
        self.wagers.entry(bettor.clone()).or_default().push(Wager {
            amount,
            side,
            placed_at: now,
            claimed: false,
        });

        Ok(())
    }

    /// Resolve the market with the final observed count.
    ///
    /// Only the assigned oracle may call this, once, at or after the deadline.
    /// `Above` wins when `observed_count >= threshold`; equality favors `Above`.
    pub fn resolve(
        &mut self,
        caller: &Address,
        observed_count: u64,
        now: Timestamp,
    ) -> Result<Resolution> {
        if caller != &self.oracle {
            return Err(MarketError::OnlyOracleCanResolve(self.id.clone()));
        }
        match self.status {
            MarketStatus::Active => {}
            MarketStatus::Resolved => {
                return Err(MarketError::MarketAlreadyResolved(self.id.clone()))
            }
            MarketStatus::Cancelled => return Err(MarketError::MarketNotActive(self.id.clone())),
        }
        if now < self.deadline {
            return Err(MarketError::MarketNotExpired(self.id.clone()));
        }

        let resolution = Resolution {
            resolved_at: now,
            observed_count,
            winning_side: Side::for_observation(observed_count, self.threshold),
        };
        self.status = MarketStatus::Resolved;
        self.resolution = Some(resolution);

        Ok(resolution)
    }

    /// Void an active market. Every wager becomes refundable at face value.
    pub(crate) fn cancel(&mut self, now: Timestamp) -> Result<()> {
        match self.status {
            MarketStatus::Active => {}
            MarketStatus::Resolved => {
                return Err(MarketError::MarketAlreadyResolved(self.id.clone()))
            }
            MarketStatus::Cancelled => return Err(MarketError::MarketNotActive(self.id.clone())),
        }
        self.status = MarketStatus::Cancelled;
        self.cancelled_at = Some(now);
        Ok(())
    }

    /// Work out what a claim by `bettor` would pay, without touching state.
    fn plan_claim(&self, bettor: &Address) -> Result<ClaimPlan> {
        let wagers = self.wagers.get(bettor).map(Vec::as_slice).unwrap_or(&[]);

        // `None` while cancelled: every wager is refunded at face value
        let winning_side = match self.status {
            MarketStatus::Active => return Err(MarketError::MarketNotResolved(self.id.clone())),
            MarketStatus::Cancelled => None,
            MarketStatus::Resolved => Some(
                self.winning_side()
                    .ok_or_else(|| MarketError::MarketNotResolved(self.id.clone()))?,
            ),
        };
        let (winning_pool, losing_pool) = match winning_side {
            Some(side) => (self.pool(side), self.pool(side.opposite())),
            None => (0, 0),
        };

        let mut any_qualifying = false;
        let mut payout: u64 = 0;
        let mut positions = Vec::new();
        for (position, wager) in wagers.iter().enumerate() {
            if winning_side.is_some_and(|side| wager.side != side) {
                continue;
            }
            any_qualifying = true;
            if wager.claimed {
                continue;
            }
            payout = payout.saturating_add(payout_for(wager.amount, winning_pool, losing_pool));
            positions.push(position);
        }

        if !any_qualifying {
            return Err(MarketError::NoWinningsToClaim);
        }
        if positions.is_empty() {
            return Err(MarketError::AlreadyClaimedWinnings);
        }
        Ok(ClaimPlan { payout, positions })
    }

    /// What `claim_winnings` would pay `bettor` right now (0 if nothing).
    pub fn preview_winnings(&self, bettor: &Address) -> u64 {
        self.plan_claim(bettor).map(|plan| plan.payout).unwrap_or(0)
    }

    /// Pay out every unclaimed qualifying wager of `bettor` in one go.
    ///
    /// After resolution only wagers on the winning side qualify; after
    /// cancellation every wager is refunded at face value.
    ///
    /// The wagers are marked claimed and the balance debited before the
    /// transfer is attempted. A refused transfer reverts both.
    pub fn claim_winnings<S: ValueSink + ?Sized>(
        &mut self,
        bettor: &Address,
        sink: &mut S,
    ) -> Result<u64> {
        let plan = self.plan_claim(bettor)?;
        let new_balance = self.balance.checked_sub(plan.payout).ok_or_else(|| {
            MarketError::TransferFailed(format!(
                "market {} holds {} but owes {}",
                self.id, self.balance, plan.payout
            ))
        })?;

        // Commit
        self.set_claimed(bettor, &plan.positions, true);
        self.balance = new_balance;
        self.total_claimed += plan.payout;

        // Effect
        if let Err(err) = sink.transfer(bettor, plan.payout) {
            self.set_claimed(bettor, &plan.positions, false);
            self.balance += plan.payout;
            self.total_claimed -= plan.payout;
            return Err(err);
        }

        Ok(plan.payout)
    }

    fn set_claimed(&mut self, bettor: &Address, positions: &[usize], claimed: bool) {
        if let Some(wagers) = self.wagers.get_mut(bettor) {
            for &position in positions {
                wagers[position].claimed = claimed;
            }
        }
    }

    /// Return the creator's seed once the market is resolved or cancelled.
    ///
    /// A market created without seed still flips its withdrawn flag and
    /// reports a zero payout.
    pub fn withdraw_initial_liquidity<S: ValueSink + ?Sized>(
        &mut self,
        caller: &Address,
        sink: &mut S,
    ) -> Result<u64> {
        if caller != &self.creator {
            return Err(MarketError::OnlyCreatorCanWithdraw);
        }
        if self.status == MarketStatus::Active {
            return Err(MarketError::MarketNotResolved(self.id.clone()));
        }
        if self.initial_liquidity_withdrawn {
            return Err(MarketError::AlreadyWithdrawn);
        }

        let amount = self.initial_liquidity;
        let new_balance = self.balance.checked_sub(amount).ok_or_else(|| {
            MarketError::TransferFailed(format!(
                "market {} holds {} but owes {}",
                self.id, self.balance, amount
            ))
        })?;

        self.initial_liquidity_withdrawn = true;
        self.balance = new_balance;

        if amount > 0 {
            if let Err(err) = sink.transfer(caller, amount) {
                self.initial_liquidity_withdrawn = false;
                self.balance += amount;
                return Err(err);
            }
        }

        Ok(amount)
    }

    pub fn id(&self) -> &MarketId {
        &self.id
    }

    pub fn creator(&self) -> &Address {
        &self.creator
    }

    pub fn oracle(&self) -> &Address {
        &self.oracle
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn status(&self) -> MarketStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }

    /// Active with the deadline reached: waiting for the oracle.
    pub fn is_resolvable(&self, now: Timestamp) -> bool {
        self.is_active() && now >= self.deadline
    }

    pub fn above_total(&self) -> u64 {
        self.above_total
    }

    pub fn below_total(&self) -> u64 {
        self.below_total
    }

    pub fn pool(&self, side: Side) -> u64 {
        match side {
            Side::Above => self.above_total,
            Side::Below => self.below_total,
        }
    }

    pub fn initial_liquidity(&self) -> u64 {
        self.initial_liquidity
    }

    pub fn initial_liquidity_withdrawn(&self) -> bool {
        self.initial_liquidity_withdrawn
    }

    /// Value currently held by the market
    pub fn held_value(&self) -> u64 {
        self.balance
    }

    pub fn total_claimed(&self) -> u64 {
        self.total_claimed
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    pub fn winning_side(&self) -> Option<Side> {
        self.resolution.map(|r| r.winning_side)
    }

    pub fn cancelled_at(&self) -> Option<Timestamp> {
        self.cancelled_at
    }

    /// Number of distinct bettors
    pub fn bettor_count(&self) -> usize {
        self.wagers.len()
    }

    /// Wagers of one bettor, in placement order
    pub fn wagers_of(&self, bettor: &Address) -> &[Wager] {
        self.wagers.get(bettor).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Current payout multiplier for a side (total pools / side pool).
    pub fn odds(&self, side: Side) -> f64 {
        let side_total = self.pool(side) as f64;
        if side_total == 0.0 {
            return 1.0;
        }
        (self.above_total + self.below_total) as f64 / side_total
    }

    pub fn info(&self) -> MarketInfo {
        MarketInfo {
            id: self.id.clone(),
            creator: self.creator.clone(),
            oracle: self.oracle.clone(),
            description: self.description.clone(),
            threshold: self.threshold,
            deadline: self.deadline,
            created_at: self.created_at,
            status: self.status,
            above_total: self.above_total,
            below_total: self.below_total,
            initial_liquidity: self.initial_liquidity,
            initial_liquidity_withdrawn: self.initial_liquidity_withdrawn,
            held_value: self.balance,
            total_claimed: self.total_claimed,
            bettor_count: self.bettor_count(),
            resolution: self.resolution,
        }
    }
}
