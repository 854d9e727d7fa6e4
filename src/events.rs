//! Domain event bus.
//!
//! Replaces direct callback/mutable-field wiring between subsystems with a
//! broadcast channel: the subscriber, executor, and sequencer all publish
//! here, and the relay subscribes like any other consumer. Nothing about
//! the publishing side needs to know whether anyone is listening.

use crate::core::types::{LifecycleChange, Side};
use crate::decoder::PoolInfo;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    ActiveBinChanged {
        pool: Pubkey,
        new_active_bin: i32,
        previous_active_bin: Option<i32>,
    },
    HarvestNeeded {
        position: Pubkey,
        pool: Pubkey,
        safe_bins: Vec<i32>,
    },
    PositionChanged {
        position: Pubkey,
        change: LifecycleChange,
        pool: Pubkey,
        owner: Pubkey,
        side: Side,
    },
    HarvestExecuted {
        position: Pubkey,
        pool: Pubkey,
        owner: Pubkey,
        side: Side,
        bins_acted_on: usize,
    },
    PositionClosed {
        position: Pubkey,
        pool: Pubkey,
        owner: Pubkey,
        side: Side,
    },
    RoverTvlUpdated {
        pool: Pubkey,
        tvl: u64,
        position_count: usize,
    },
}

impl DomainEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            DomainEvent::ActiveBinChanged { .. } => "active_bin_changed",
            DomainEvent::HarvestNeeded { .. } => "harvest_needed",
            DomainEvent::PositionChanged { .. } => "position_changed",
            DomainEvent::HarvestExecuted { .. } => "harvest_executed",
            DomainEvent::PositionClosed { .. } => "position_closed",
            DomainEvent::RoverTvlUpdated { .. } => "rover_tvl_updated",
        }
    }
}

/// Thin wrapper over a broadcast channel. Cloning gives every subsystem an
/// independent sender handle; `subscribe()` gives independent receivers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        // Err here just means there are currently no subscribers; that's fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ActiveBinChanged {
            pool: Pubkey::new_unique(),
            new_active_bin: 5,
            previous_active_bin: Some(3),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.type_name(), "active_bin_changed");
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(DomainEvent::RoverTvlUpdated {
            pool: Pubkey::new_unique(),
            tvl: 0,
            position_count: 0,
        });
    }
}
