//! # Market Registry
//!
//! Factory and catalog of [`Market`]s. The registry validates creation
//! parameters, owns every market it creates, and is the only mutable path to
//! them: bets, claims, withdrawals, cancellation and (crate-internally)
//! resolution all go through here, so bookkeeping and event emission live in
//! one place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::MarketBounds,
    error::Result,
    events::{Event, EventBus},
    market::{Market, MarketInfo, Resolution},
    treasury::ValueSink,
    types::{Address, MarketId, MarketStatus, Side, Timestamp},
    utils::derive_market_id,
    MarketError,
};

/// Creation parameters for a single market.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MarketParams {
    pub description: String,
    pub threshold: u64,
    pub deadline: Timestamp,
    /// Resolving oracle; `None` falls back to the registry default
    #[serde(default)]
    pub oracle: Option<Address>,
    /// Creator seed in base units
    #[serde(default)]
    pub initial_liquidity: u64,
}

impl MarketParams {
    pub fn new(description: impl Into<String>, threshold: u64, deadline: Timestamp) -> Self {
        Self {
            description: description.into(),
            threshold,
            deadline,
            oracle: None,
            initial_liquidity: 0,
        }
    }

    pub fn with_oracle(mut self, oracle: Address) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_liquidity(mut self, initial_liquidity: u64) -> Self {
        self.initial_liquidity = initial_liquidity;
        self
    }
}

/// Aggregate counts over every market in the registry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_markets: u64,
    pub active_markets: u64,
    pub resolved_markets: u64,
    pub cancelled_markets: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Registry {
    id: Uuid,
    owner: Address,
    default_oracle: Option<Address>,
    bounds: MarketBounds,
    markets: BTreeMap<MarketId, Market>,
    /// Creation order, append-only
    order: Vec<MarketId>,
    by_creator: BTreeMap<Address, Vec<MarketId>>,
    total_markets_created: u64,
    active_markets_count: u64,
    #[serde(skip)]
    events: Option<EventBus>,
}

impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.owner == other.owner
            && self.default_oracle == other.default_oracle
            && self.bounds == other.bounds
            && self.markets == other.markets
            && self.order == other.order
            && self.by_creator == other.by_creator
            && self.total_markets_created == other.total_markets_created
            && self.active_markets_count == other.active_markets_count
    }
}

impl Registry {
    /// Create an empty registry.
    ///
    /// # Arguments
    /// * `owner` - Administrative identity (default oracle updates, cancellation)
    /// * `default_oracle` - Oracle assigned to markets created without one
    /// * `bounds` - Creation-time limits
    pub fn new(owner: Address, default_oracle: Option<Address>, bounds: MarketBounds) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            default_oracle,
            bounds,
            markets: BTreeMap::new(),
            order: Vec::new(),
            by_creator: BTreeMap::new(),
            total_markets_created: 0,
            active_markets_count: 0,
            events: None,
        }
    }

    pub fn attach_event_bus(&mut self, bus: EventBus) {
        self.events = Some(bus);
    }

    pub fn event_bus(&self) -> Option<&EventBus> {
        self.events.as_ref()
    }

    fn emit(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn default_oracle(&self) -> Option<&Address> {
        self.default_oracle.as_ref()
    }

    pub fn bounds(&self) -> &MarketBounds {
        &self.bounds
    }

    fn ensure_owner(&self, caller: &Address) -> Result<()> {
        if caller != &self.owner {
            debug!(%caller, "rejected owner-only call");
            return Err(MarketError::NotOwner(caller.to_string()));
        }
        Ok(())
    }

    /// Check creation parameters and resolve the oracle to assign.
    fn validate(&self, params: &MarketParams, now: Timestamp) -> Result<Address> {
        if params.description.trim().is_empty() {
            return Err(MarketError::EmptyDescription);
        }
        if !self.bounds.threshold_allowed(params.threshold) {
            return Err(MarketError::InvalidThreshold {
                threshold: params.threshold,
                min: self.bounds.min_threshold,
                max: self.bounds.max_threshold,
            });
        }
        match MarketBounds::duration_until(params.deadline, now) {
            None | Some(0) => {
                return Err(MarketError::InvalidDeadline(format!(
                    "deadline {} is not after {}",
                    params.deadline, now
                )))
            }
            Some(duration) if !self.bounds.duration_allowed(duration) => {
                return Err(MarketError::InvalidDeadline(format!(
                    "duration {duration}s outside {}..={}s",
                    self.bounds.min_duration, self.bounds.max_duration
                )))
            }
            Some(_) => {}
        }

        params
            .oracle
            .clone()
            .or_else(|| self.default_oracle.clone())
            .ok_or_else(|| MarketError::InvalidAddress("no oracle given and no default".into()))
    }

    /// Insert an already-validated market.
    fn insert(
        &mut self,
        creator: &Address,
        params: MarketParams,
        oracle: Address,
        now: Timestamp,
    ) -> MarketId {
        let id = derive_market_id(&self.id, creator, self.total_markets_created);
        let market = Market::new(
            id.clone(),
            creator.clone(),
            oracle.clone(),
            params.description.trim().to_string(),
            params.threshold,
            params.deadline,
            params.initial_liquidity,
            now,
        );

        info!(
            market = %id,
            %creator,
            %oracle,
            threshold = params.threshold,
            deadline = params.deadline,
            "market created"
        );
        self.emit(Event::MarketCreated {
            market: id.clone(),
            creator: creator.clone(),
            oracle,
            description: market.description().to_string(),
            threshold: params.threshold,
            deadline: params.deadline,
            initial_liquidity: params.initial_liquidity,
            created_at: now,
        });

        self.markets.insert(id.clone(), market);
        self.order.push(id.clone());
        self.by_creator
            .entry(creator.clone())
            .or_default()
            .push(id.clone());
        self.total_markets_created += 1;
        self.active_markets_count += 1;
        id
    }

    /// Create a single market.
    ///
    /// # Arguments
    /// * `creator` - Identity creating the market and supplying the seed
    /// * `params` - Description, threshold, deadline, optional oracle and seed
    /// * `now` - Creation time
    ///
    /// # Returns
    /// The new market id. Nothing is recorded if validation fails.
    pub fn create_market(
        &mut self,
        creator: &Address,
        params: MarketParams,
        now: Timestamp,
    ) -> Result<MarketId> {
        let oracle = self.validate(&params, now).inspect_err(|err| {
            debug!(%creator, %err, "market creation rejected");
        })?;
        Ok(self.insert(creator, params, oracle, now))
    }

    /// Create one market per index of the parallel slices, all or nothing.
    ///
    /// Every entry is validated before the first one is inserted, so a single
    /// bad entry leaves the registry untouched. Batch markets carry no seed.
    pub fn batch_create_markets(
        &mut self,
        creator: &Address,
        descriptions: &[String],
        thresholds: &[u64],
        deadlines: &[Timestamp],
        oracle: Option<Address>,
        now: Timestamp,
    ) -> Result<Vec<MarketId>> {
        if descriptions.len() != thresholds.len() || descriptions.len() != deadlines.len() {
            return Err(MarketError::BatchLengthMismatch {
                descriptions: descriptions.len(),
                thresholds: thresholds.len(),
                deadlines: deadlines.len(),
            });
        }
        if descriptions.is_empty() {
            return Err(MarketError::EmptyBatch);
        }

        let mut validated = Vec::with_capacity(descriptions.len());
        for ((description, &threshold), &deadline) in
            descriptions.iter().zip(thresholds).zip(deadlines)
        {
            let params = MarketParams {
                description: description.clone(),
                threshold,
                deadline,
                oracle: oracle.clone(),
                initial_liquidity: 0,
            };
            let assigned = self.validate(&params, now).inspect_err(|err| {
                debug!(%creator, %err, index = validated.len(), "batch creation rejected");
            })?;
            validated.push((params, assigned));
        }

        info!(%creator, count = validated.len(), "batch of markets created");
        Ok(validated
            .into_iter()
            .map(|(params, assigned)| self.insert(creator, params, assigned, now))
            .collect())
    }

    pub fn update_default_oracle(&mut self, caller: &Address, oracle: Address) -> Result<()> {
        self.ensure_owner(caller)?;
        let previous = self.default_oracle.replace(oracle.clone());
        info!(previous = ?previous, current = %oracle, "default oracle updated");
        self.emit(Event::DefaultOracleUpdated {
            previous,
            current: oracle,
        });
        Ok(())
    }

    pub fn market(&self, id: &MarketId) -> Result<&Market> {
        self.markets
            .get(id)
            .ok_or_else(|| MarketError::MarketNotFound(id.clone()))
    }

    fn market_mut(&mut self, id: &MarketId) -> Result<&mut Market> {
        self.markets
            .get_mut(id)
            .ok_or_else(|| MarketError::MarketNotFound(id.clone()))
    }

    pub fn market_info(&self, id: &MarketId) -> Result<MarketInfo> {
        self.market(id).map(Market::info)
    }

    pub fn place_bet(
        &mut self,
        id: &MarketId,
        bettor: &Address,
        side: Side,
        amount: u64,
        now: Timestamp,
    ) -> Result<()> {
        let market = self.market_mut(id)?;
        market
            .place_bet(bettor, side, amount, now)
            .inspect_err(|err| debug!(market = %id, %bettor, %err, "bet rejected"))?;

        let (above_total, below_total) = (market.above_total(), market.below_total());
        info!(market = %id, %bettor, %side, amount, "bet placed");
        self.emit(Event::BetPlaced {
            market: id.clone(),
            bettor: bettor.clone(),
            side,
            amount,
            above_total,
            below_total,
            placed_at: now,
        });
        Ok(())
    }

    /// Resolve a market on behalf of its oracle.
    ///
    /// Only reachable through [`crate::Oracle`], which checks freshness and
    /// resolver authorization first.
    pub(crate) fn resolve_market(
        &mut self,
        id: &MarketId,
        oracle: &Address,
        observed_count: u64,
        now: Timestamp,
    ) -> Result<Resolution> {
        let market = self.market_mut(id)?;
        let resolution = market.resolve(oracle, observed_count, now)?;
        let status = market.status();
        self.active_markets_count = self.active_markets_count.saturating_sub(1);

        info!(
            market = %id,
            observed_count,
            winning_side = %resolution.winning_side,
            "market resolved"
        );
        self.emit(Event::MarketResolved {
            market: id.clone(),
            oracle: oracle.clone(),
            observed_count,
            winning_side: resolution.winning_side,
            resolved_at: now,
            status,
        });
        Ok(resolution)
    }

    /// Void an active market. Owner only; every wager becomes refundable.
    pub fn cancel_market(&mut self, caller: &Address, id: &MarketId, now: Timestamp) -> Result<()> {
        self.ensure_owner(caller)?;
        let market = self.market_mut(id)?;
        market.cancel(now)?;
        let status = market.status();
        self.active_markets_count = self.active_markets_count.saturating_sub(1);

        info!(market = %id, "market cancelled");
        self.emit(Event::MarketCancelled {
            market: id.clone(),
            cancelled_by: caller.clone(),
            cancelled_at: now,
            status,
        });
        Ok(())
    }

    pub fn claim_winnings<S: ValueSink + ?Sized>(
        &mut self,
        id: &MarketId,
        bettor: &Address,
        sink: &mut S,
    ) -> Result<u64> {
        let market = self.market_mut(id)?;
        let amount = market
            .claim_winnings(bettor, sink)
            .inspect_err(|err| debug!(market = %id, %bettor, %err, "claim rejected"))?;
        let remaining_balance = market.held_value();

        info!(market = %id, %bettor, amount, "winnings claimed");
        self.emit(Event::WinningsClaimed {
            market: id.clone(),
            bettor: bettor.clone(),
            amount,
            remaining_balance,
        });
        Ok(amount)
    }

    pub fn preview_winnings(&self, id: &MarketId, bettor: &Address) -> Result<u64> {
        Ok(self.market(id)?.preview_winnings(bettor))
    }

    pub fn withdraw_initial_liquidity<S: ValueSink + ?Sized>(
        &mut self,
        id: &MarketId,
        caller: &Address,
        sink: &mut S,
        now: Timestamp,
    ) -> Result<u64> {
        let market = self.market_mut(id)?;
        let amount = market
            .withdraw_initial_liquidity(caller, sink)
            .inspect_err(|err| debug!(market = %id, %caller, %err, "withdrawal rejected"))?;

        info!(market = %id, creator = %caller, amount, "initial liquidity withdrawn");
        self.emit(Event::InitialLiquidityWithdrawn {
            market: id.clone(),
            creator: caller.clone(),
            amount,
            withdrawn_at: now,
        });
        Ok(amount)
    }

    /// Every market, in creation order
    pub fn markets(&self) -> impl Iterator<Item = &Market> {
        self.order.iter().filter_map(|id| self.markets.get(id))
    }

    pub fn market_ids(&self) -> &[MarketId] {
        &self.order
    }

    pub fn markets_by_creator(&self, creator: &Address) -> Vec<&Market> {
        self.by_creator
            .get(creator)
            .map(|ids| ids.iter().filter_map(|id| self.markets.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn markets_by_status(&self, status: MarketStatus) -> Vec<&Market> {
        self.markets().filter(|m| m.status() == status).collect()
    }

    pub fn active_markets(&self) -> Vec<&Market> {
        self.markets_by_status(MarketStatus::Active)
    }

    pub fn resolved_markets(&self) -> Vec<&Market> {
        self.markets_by_status(MarketStatus::Resolved)
    }

    pub fn total_markets_created(&self) -> u64 {
        self.total_markets_created
    }

    pub fn active_markets_count(&self) -> u64 {
        self.active_markets_count
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total_markets: self.total_markets_created,
            active_markets: self.active_markets_count,
            ..RegistryStats::default()
        };
        for market in self.markets.values() {
            match market.status() {
                MarketStatus::Active => {}
                MarketStatus::Resolved => stats.resolved_markets += 1,
                MarketStatus::Cancelled => stats.cancelled_markets += 1,
            }
        }
        stats
    }
}
