//! # State-Transition Events
//!
//! Every committed mutation of the registry, a market or the oracle is
//! published as an [`Event`] so indexers and auditors can follow along.
//! Subscribers attach to an [`EventBus`]; publishing never fails, a bus
//! without subscribers simply drops the event.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{Address, MarketId, MarketStatus, Side, Timestamp};

/// Buffered events per subscriber before the slowest one starts lagging
pub const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Event {
    MarketCreated {
        market: MarketId,
        creator: Address,
        oracle: Address,
        description: String,
        threshold: u64,
        deadline: Timestamp,
        initial_liquidity: u64,
        created_at: Timestamp,
    },
    BetPlaced {
        market: MarketId,
        bettor: Address,
        side: Side,
        amount: u64,
        above_total: u64,
        below_total: u64,
        placed_at: Timestamp,
    },
    MarketResolved {
        market: MarketId,
        oracle: Address,
        observed_count: u64,
        winning_side: Side,
        resolved_at: Timestamp,
        status: MarketStatus,
    },
    MarketCancelled {
        market: MarketId,
        cancelled_by: Address,
        cancelled_at: Timestamp,
        status: MarketStatus,
    },
    WinningsClaimed {
        market: MarketId,
        bettor: Address,
        amount: u64,
        remaining_balance: u64,
    },
    InitialLiquidityWithdrawn {
        market: MarketId,
        creator: Address,
        amount: u64,
        withdrawn_at: Timestamp,
    },
    DefaultOracleUpdated {
        previous: Option<Address>,
        current: Address,
    },
    FeedUpdated {
        resolver: Address,
        count: u64,
        observed_at: Timestamp,
    },
    ResolverAdded {
        resolver: Address,
    },
    ResolverRemoved {
        resolver: Address,
    },
}

impl Event {
    /// Market this event concerns, if any
    pub fn market(&self) -> Option<&MarketId> {
        match self {
            Event::MarketCreated { market, .. }
            | Event::BetPlaced { market, .. }
            | Event::MarketResolved { market, .. }
            | Event::MarketCancelled { market, .. }
            | Event::WinningsClaimed { market, .. }
            | Event::InitialLiquidityWithdrawn { market, .. } => Some(market),
            Event::DefaultOracleUpdated { .. }
            | Event::FeedUpdated { .. }
            | Event::ResolverAdded { .. }
            | Event::ResolverRemoved { .. } => None,
        }
    }
}

/// Fan-out of [`Event`]s to any number of subscribers.
///
/// Cloning yields a handle onto the same channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // Err only means nobody is listening right now.
        if self.sender.send(event).is_err() {
            tracing::trace!("event dropped, no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(Event::ResolverAdded {
            resolver: Address::new("0xresolver").unwrap(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let resolver = Address::new("0xresolver").unwrap();

        bus.clone().publish(Event::ResolverAdded {
            resolver: resolver.clone(),
        });
        bus.publish(Event::ResolverRemoved {
            resolver: resolver.clone(),
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            Event::ResolverAdded {
                resolver: resolver.clone()
            }
        );
        assert_eq!(rx.try_recv().unwrap(), Event::ResolverRemoved { resolver });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = Event::FeedUpdated {
            resolver: Address::new("0xr").unwrap(),
            count: 7,
            observed_at: 10,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "FeedUpdated");
        assert_eq!(json["count"], 7);
        assert!(event.market().is_none());
    }
}
