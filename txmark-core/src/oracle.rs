//! # Oracle
//!
//! The resolution authority. The oracle keeps the latest observation pushed by
//! the data feed, decides whether it is fresh enough to act on, and resolves
//! expired markets assigned to it. Only authorized resolvers may push data or
//! trigger resolution; only the admin may change who is authorized.
//!
//! Batch resolution is deliberately failure-tolerant: every market is
//! attempted on its own and a failure is recorded next to the successes
//! instead of aborting the run. Batch *creation* in the registry is the
//! opposite (all or nothing).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::OracleSettings,
    error::Result,
    events::{Event, EventBus},
    registry::Registry,
    types::{Address, MarketId, Side, Timestamp},
    MarketError,
};

/// Latest observation pushed by a resolver.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub count: u64,
    pub observed_at: Timestamp,
    /// `false` until the first push
    pub valid: bool,
}

/// Outcome of a batch resolution run.
#[derive(Debug, Default)]
pub struct BatchResolution {
    pub resolved: Vec<(MarketId, Side)>,
    pub skipped: Vec<(MarketId, MarketError)>,
}

impl BatchResolution {
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty() && self.skipped.is_empty()
    }

    /// Skipped markets a later attempt may still resolve
    pub fn retryable(&self) -> impl Iterator<Item = &MarketId> {
        self.skipped
            .iter()
            .filter(|(_, err)| err.is_retryable())
            .map(|(id, _)| id)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OracleStats {
    pub total_markets_resolved: u64,
    /// Sum of both pools of every market at its resolution
    pub total_value_distributed: u64,
    pub active_resolvers: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Oracle {
    /// Identity markets record as their resolving oracle
    id: Address,
    admin: Address,
    settings: OracleSettings,
    resolvers: BTreeSet<Address>,
    latest_feed: FeedSnapshot,
    total_markets_resolved: u64,
    total_value_distributed: u64,
    last_resolved_at: Option<Timestamp>,
    #[serde(skip)]
    events: Option<EventBus>,
}

impl PartialEq for Oracle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.admin == other.admin
            && self.settings == other.settings
            && self.resolvers == other.resolvers
            && self.latest_feed == other.latest_feed
            && self.total_markets_resolved == other.total_markets_resolved
            && self.total_value_distributed == other.total_value_distributed
            && self.last_resolved_at == other.last_resolved_at
    }
}

impl Oracle {
    /// Create an oracle whose admin starts out as its only resolver.
    ///
    /// # Arguments
    /// * `id` - Identity assigned to markets this oracle resolves
    /// * `admin` - Identity allowed to manage resolvers
    /// * `settings` - Freshness window
    pub fn new(id: Address, admin: Address, settings: OracleSettings) -> Self {
        let mut resolvers = BTreeSet::new();
        resolvers.insert(admin.clone());
        Self {
            id,
            admin,
            settings,
            resolvers,
            latest_feed: FeedSnapshot::default(),
            total_markets_resolved: 0,
            total_value_distributed: 0,
            last_resolved_at: None,
            events: None,
        }
    }

    pub fn attach_event_bus(&mut self, bus: EventBus) {
        self.events = Some(bus);
    }

    fn emit(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    pub fn id(&self) -> &Address {
        &self.id
    }

    pub fn admin(&self) -> &Address {
        &self.admin
    }

    pub fn settings(&self) -> &OracleSettings {
        &self.settings
    }

    fn ensure_admin(&self, caller: &Address) -> Result<()> {
        if caller != &self.admin {
            return Err(MarketError::NotAdmin(caller.to_string()));
        }
        Ok(())
    }

    fn ensure_resolver(&self, caller: &Address) -> Result<()> {
        if !self.is_authorized(caller) {
            debug!(%caller, "caller is not an authorized resolver");
            return Err(MarketError::NotAuthorizedResolver(caller.to_string()));
        }
        Ok(())
    }

    pub fn add_resolver(&mut self, caller: &Address, resolver: Address) -> Result<()> {
        self.ensure_admin(caller)?;
        if !self.resolvers.insert(resolver.clone()) {
            return Err(MarketError::ResolverAlreadyExists(resolver.to_string()));
        }
        info!(%resolver, "resolver added");
        self.emit(Event::ResolverAdded { resolver });
        Ok(())
    }

    pub fn remove_resolver(&mut self, caller: &Address, resolver: &Address) -> Result<()> {
        self.ensure_admin(caller)?;
        if !self.resolvers.remove(resolver) {
            return Err(MarketError::ResolverNotFound(resolver.to_string()));
        }
        info!(%resolver, "resolver removed");
        self.emit(Event::ResolverRemoved {
            resolver: resolver.clone(),
        });
        Ok(())
    }

    pub fn is_authorized(&self, identity: &Address) -> bool {
        self.resolvers.contains(identity)
    }

    pub fn authorized_resolvers(&self) -> impl Iterator<Item = &Address> {
        self.resolvers.iter()
    }

    /// Record a new observation.
    ///
    /// # Arguments
    /// * `caller` - Must be an authorized resolver
    /// * `count` - Observed metric
    /// * `observed_at` - When it was observed; not after `now`, not before the previous push
    /// * `now` - Current time
    pub fn update_feed(
        &mut self,
        caller: &Address,
        count: u64,
        observed_at: Timestamp,
        now: Timestamp,
    ) -> Result<()> {
        self.ensure_resolver(caller)?;
        if observed_at > now {
            return Err(MarketError::InvalidFeedValue(format!(
                "observation at {observed_at} is in the future (now {now})"
            )));
        }
        if self.latest_feed.valid && observed_at < self.latest_feed.observed_at {
            return Err(MarketError::InvalidFeedValue(format!(
                "observation at {observed_at} is older than current {}",
                self.latest_feed.observed_at
            )));
        }

        self.latest_feed = FeedSnapshot {
            count,
            observed_at,
            valid: true,
        };
        info!(resolver = %caller, count, observed_at, "feed updated");
        self.emit(Event::FeedUpdated {
            resolver: caller.clone(),
            count,
            observed_at,
        });
        Ok(())
    }

    pub fn latest_feed(&self) -> &FeedSnapshot {
        &self.latest_feed
    }

    /// Latest count together with its freshness at `now`.
    pub fn current_data(&self, now: Timestamp) -> (FeedSnapshot, bool) {
        (self.latest_feed, self.is_fresh(now))
    }

    pub fn is_fresh(&self, now: Timestamp) -> bool {
        self.latest_feed.valid
            && now.saturating_sub(self.latest_feed.observed_at) <= self.settings.freshness_window
    }

    fn ensure_fresh(&self, now: Timestamp) -> Result<()> {
        if !self.is_fresh(now) {
            return Err(MarketError::StaleData {
                observed_at: self.latest_feed.observed_at,
                now,
                window: self.settings.freshness_window,
            });
        }
        Ok(())
    }

    /// Markets assigned to this oracle that are active with their deadline reached.
    pub fn resolvable_markets(&self, registry: &Registry, now: Timestamp) -> Vec<MarketId> {
        registry
            .markets()
            .filter(|m| m.oracle() == &self.id && m.is_resolvable(now))
            .map(|m| m.id().clone())
            .collect()
    }

    /// Resolve one expired market with the latest feed count.
    pub fn close_expired_market(
        &mut self,
        registry: &mut Registry,
        caller: &Address,
        id: &MarketId,
        now: Timestamp,
    ) -> Result<Side> {
        self.ensure_resolver(caller)?;
        self.resolve_one(registry, id, now)
    }

    fn resolve_one(&mut self, registry: &mut Registry, id: &MarketId, now: Timestamp) -> Result<Side> {
        self.ensure_fresh(now)?;
        let resolution = registry.resolve_market(id, &self.id, self.latest_feed.count, now)?;
        let market = registry.market(id)?;
        let distributed = market.above_total().saturating_add(market.below_total());

        self.total_markets_resolved += 1;
        self.total_value_distributed = self.total_value_distributed.saturating_add(distributed);
        self.last_resolved_at = Some(now);
        Ok(resolution.winning_side)
    }

    /// Attempt every listed market on its own.
    ///
    /// Fails as a whole only when `caller` is not a resolver; otherwise each
    /// market ends up in either `resolved` or `skipped`.
    pub fn close_markets(
        &mut self,
        registry: &mut Registry,
        caller: &Address,
        ids: &[MarketId],
        now: Timestamp,
    ) -> Result<BatchResolution> {
        self.ensure_resolver(caller)?;

        let mut outcome = BatchResolution::default();
        for id in ids {
            match self.resolve_one(registry, id, now) {
                Ok(side) => outcome.resolved.push((id.clone(), side)),
                Err(err) => {
                    warn!(market = %id, %err, "skipping market");
                    outcome.skipped.push((id.clone(), err));
                }
            }
        }

        info!(
            resolved = outcome.resolved.len(),
            skipped = outcome.skipped.len(),
            "batch resolution finished"
        );
        Ok(outcome)
    }

    pub fn close_all_expired_markets(
        &mut self,
        registry: &mut Registry,
        caller: &Address,
        now: Timestamp,
    ) -> Result<BatchResolution> {
        let ids = self.resolvable_markets(registry, now);
        self.close_markets(registry, caller, &ids, now)
    }

    pub fn last_resolved_at(&self) -> Option<Timestamp> {
        self.last_resolved_at
    }

    pub fn stats(&self) -> OracleStats {
        OracleStats {
            total_markets_resolved: self.total_markets_resolved,
            total_value_distributed: self.total_value_distributed,
            active_resolvers: self.resolvers.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MarketParams;
    use crate::test_utils::*;
    use crate::types::MarketStatus;

    const DEADLINE: Timestamp = T0 + TEST_DURATION;

    fn registry_with_markets(count: usize) -> (Registry, Vec<MarketId>) {
        let mut registry = create_test_registry();
        let ids = (0..count)
            .map(|_| registry.create_market(&creator(), test_params(), T0).unwrap())
            .collect();
        (registry, ids)
    }

    #[test]
    fn test_admin_is_initial_resolver() {
        let oracle = create_test_oracle();
        assert!(oracle.is_authorized(&resolver()));
        assert_eq!(oracle.authorized_resolvers().count(), 1);
        assert_eq!(oracle.stats().active_resolvers, 1);
    }

    #[test]
    fn test_resolver_management() {
        let mut oracle = create_test_oracle();

        assert!(matches!(
            oracle.add_resolver(&alice(), bob()),
            Err(MarketError::NotAdmin(_))
        ));
        oracle.add_resolver(&resolver(), bob()).unwrap();
        assert!(matches!(
            oracle.add_resolver(&resolver(), bob()),
            Err(MarketError::ResolverAlreadyExists(_))
        ));
        assert!(oracle.is_authorized(&bob()));

        oracle.remove_resolver(&resolver(), &bob()).unwrap();
        assert!(matches!(
            oracle.remove_resolver(&resolver(), &bob()),
            Err(MarketError::ResolverNotFound(_))
        ));
        assert!(!oracle.is_authorized(&bob()));
    }

    #[test]
    fn test_update_feed_rules() {
        let mut oracle = create_test_oracle();

        assert!(matches!(
            oracle.update_feed(&alice(), 10, T0, T0),
            Err(MarketError::NotAuthorizedResolver(_))
        ));
        assert!(matches!(
            oracle.update_feed(&resolver(), 10, T0 + 1, T0),
            Err(MarketError::InvalidFeedValue(_))
        ));
        assert!(!oracle.latest_feed().valid);

        oracle.update_feed(&resolver(), 10, T0, T0).unwrap();
        assert!(matches!(
            oracle.update_feed(&resolver(), 11, T0 - 1, T0),
            Err(MarketError::InvalidFeedValue(_))
        ));
        oracle.update_feed(&resolver(), 12, T0, T0).unwrap();
        assert_eq!(
            *oracle.latest_feed(),
            FeedSnapshot {
                count: 12,
                observed_at: T0,
                valid: true
            }
        );
    }

    #[test]
    fn test_freshness_window() {
        let mut oracle = create_test_oracle();
        assert!(!oracle.is_fresh(T0), "no data yet");

        oracle.update_feed(&resolver(), 1, T0, T0).unwrap();
        let window = oracle.settings().freshness_window;
        assert!(oracle.is_fresh(T0 + window));
        assert!(!oracle.is_fresh(T0 + window + 1));
        assert_eq!(oracle.current_data(T0 + window + 1), (*oracle.latest_feed(), false));
    }

    #[test]
    fn test_stale_data_blocks_resolution() {
        let (mut registry, ids) = registry_with_markets(1);
        let mut oracle = create_test_oracle();
        oracle
            .update_feed(&resolver(), TEST_THRESHOLD, DEADLINE - 7_200, DEADLINE - 7_200)
            .unwrap();

        assert!(matches!(
            oracle.close_expired_market(&mut registry, &resolver(), &ids[0], DEADLINE),
            Err(MarketError::StaleData { .. })
        ));
        assert!(registry.market(&ids[0]).unwrap().is_active());
        assert_eq!(oracle.stats().total_markets_resolved, 0);
    }

    #[test]
    fn test_close_expired_market() {
        let (mut registry, ids) = registry_with_markets(1);
        registry.place_bet(&ids[0], &alice(), Side::Above, 30, T0).unwrap();
        registry.place_bet(&ids[0], &bob(), Side::Below, 20, T0).unwrap();
        let mut oracle = create_test_oracle();
        oracle
            .update_feed(&resolver(), TEST_THRESHOLD - 1, DEADLINE - 10, DEADLINE - 10)
            .unwrap();

        assert!(matches!(
            oracle.close_expired_market(&mut registry, &resolver(), &ids[0], DEADLINE - 10),
            Err(MarketError::MarketNotExpired(_))
        ));
        assert!(matches!(
            oracle.close_expired_market(&mut registry, &alice(), &ids[0], DEADLINE),
            Err(MarketError::NotAuthorizedResolver(_))
        ));

        let side = oracle
            .close_expired_market(&mut registry, &resolver(), &ids[0], DEADLINE)
            .unwrap();
        assert_eq!(side, Side::Below);
        assert_eq!(
            registry.market(&ids[0]).unwrap().status(),
            MarketStatus::Resolved
        );
        assert_eq!(
            oracle.stats(),
            OracleStats {
                total_markets_resolved: 1,
                total_value_distributed: 50,
                active_resolvers: 1,
            }
        );
        assert_eq!(oracle.last_resolved_at(), Some(DEADLINE));

        assert!(matches!(
            oracle.close_expired_market(&mut registry, &resolver(), &ids[0], DEADLINE),
            Err(MarketError::MarketAlreadyResolved(_))
        ));
    }

    #[test]
    fn test_resolvable_markets_filters() {
        let (mut registry, ids) = registry_with_markets(2);
        let foreign = registry
            .create_market(
                &creator(),
                test_params().with_oracle(addr("0xsomeone-else")),
                T0,
            )
            .unwrap();
        let later = registry
            .create_market(
                &creator(),
                MarketParams::new("later", TEST_THRESHOLD, DEADLINE + 3_600),
                T0,
            )
            .unwrap();
        registry.cancel_market(&owner(), &ids[1], T0).unwrap();

        let oracle = create_test_oracle();
        let resolvable = oracle.resolvable_markets(&registry, DEADLINE);
        assert_eq!(resolvable, vec![ids[0].clone()]);
        assert!(!resolvable.contains(&foreign));
        assert!(!resolvable.contains(&later));
        assert!(oracle.resolvable_markets(&registry, DEADLINE - 1).is_empty());
    }

    #[test]
    fn test_batch_isolation() {
        let (mut registry, ids) = registry_with_markets(3);
        let mut oracle = create_test_oracle();
        oracle.add_resolver(&resolver(), bob()).unwrap();
        oracle
            .update_feed(&resolver(), TEST_THRESHOLD, DEADLINE, DEADLINE)
            .unwrap();

        // A racing resolver gets to the middle market first.
        let listed = oracle.resolvable_markets(&registry, DEADLINE);
        assert_eq!(listed.len(), 3);
        oracle
            .close_expired_market(&mut registry, &bob(), &ids[1], DEADLINE)
            .unwrap();

        let outcome = oracle
            .close_markets(&mut registry, &resolver(), &listed, DEADLINE)
            .unwrap();
        assert_eq!(
            outcome.resolved,
            vec![(ids[0].clone(), Side::Above), (ids[2].clone(), Side::Above)]
        );
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].0, ids[1]);
        assert!(matches!(
            outcome.skipped[0].1,
            MarketError::MarketAlreadyResolved(_)
        ));
        assert_eq!(registry.active_markets_count(), 0);
        assert_eq!(oracle.stats().total_markets_resolved, 3);
    }

    #[test]
    fn test_batch_skips_cancelled_market() {
        let (mut registry, ids) = registry_with_markets(3);
        let mut oracle = create_test_oracle();
        oracle
            .update_feed(&resolver(), TEST_THRESHOLD - 1, DEADLINE, DEADLINE)
            .unwrap();

        let listed = oracle.resolvable_markets(&registry, DEADLINE);
        registry.cancel_market(&owner(), &ids[1], DEADLINE).unwrap();

        let outcome = oracle
            .close_markets(&mut registry, &resolver(), &listed, DEADLINE)
            .unwrap();
        assert_eq!(
            outcome.resolved,
            vec![(ids[0].clone(), Side::Below), (ids[2].clone(), Side::Below)]
        );
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].0, ids[1]);
        assert!(matches!(
            outcome.skipped[0].1,
            MarketError::MarketNotActive(_)
        ));
        assert_eq!(outcome.retryable().count(), 0);
        assert_eq!(registry.market(&ids[1]).unwrap().status(), MarketStatus::Cancelled);
        assert_eq!(oracle.stats().total_markets_resolved, 2);
    }

    #[test]
    fn test_close_all_expired_markets() {
        let (mut registry, _ids) = registry_with_markets(2);
        let mut oracle = create_test_oracle();
        oracle
            .update_feed(&resolver(), 0, DEADLINE, DEADLINE)
            .unwrap();

        assert!(matches!(
            oracle.close_all_expired_markets(&mut registry, &alice(), DEADLINE),
            Err(MarketError::NotAuthorizedResolver(_))
        ));

        let outcome = oracle
            .close_all_expired_markets(&mut registry, &resolver(), DEADLINE)
            .unwrap();
        assert_eq!(outcome.resolved.len(), 2);
        assert!(outcome.skipped.is_empty());

        let again = oracle
            .close_all_expired_markets(&mut registry, &resolver(), DEADLINE)
            .unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_stale_batch_skips_everything() {
        let (mut registry, _ids) = registry_with_markets(2);
        let mut oracle = create_test_oracle();

        let outcome = oracle
            .close_all_expired_markets(&mut registry, &resolver(), DEADLINE)
            .unwrap();
        assert!(outcome.resolved.is_empty());
        assert!(outcome
            .skipped
            .iter()
            .all(|(_, err)| matches!(err, MarketError::StaleData { .. })));
        assert_eq!(outcome.retryable().count(), 2);
        assert_eq!(registry.active_markets_count(), 2);
    }

    #[test]
    fn test_feed_events() {
        let mut oracle = create_test_oracle();
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        oracle.attach_event_bus(bus);

        oracle.update_feed(&resolver(), 5, T0, T0).unwrap();
        oracle.add_resolver(&resolver(), carol()).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            Event::FeedUpdated {
                resolver: resolver(),
                count: 5,
                observed_at: T0
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::ResolverAdded { resolver: carol() }
        );
    }
}
