//! Core domain types shared by every subsystem.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;

/// Block context attached to a raw account update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockInfo {
    pub slot: u64,
    pub timestamp: i64,
}

impl BlockInfo {
    pub fn new(slot: u64) -> Self {
        Self {
            slot,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Which side of the pool a position was opened on.
///
/// A `Sell` position holds token X and converts to token Y as price rises
/// through its bin range (bins below the active bin are fully converted).
/// A `Buy` position holds token Y and converts to token X as price falls
/// (bins above the active bin are fully converted).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Side::Buy),
            1 => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// How a position's lifecycle changed, for `PositionChanged` events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleChange {
    Created,
    Closed,
}

impl fmt::Display for LifecycleChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleChange::Created => write!(f, "created"),
            LifecycleChange::Closed => write!(f, "closed"),
        }
    }
}

/// Raw account update as delivered off the stream: pubkey, data, slot context.
pub type AccountUpdate = (Pubkey, Vec<u8>, BlockInfo);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_round_trips_through_byte() {
        assert_eq!(Side::from_byte(Side::Buy.to_byte()), Some(Side::Buy));
        assert_eq!(Side::from_byte(Side::Sell.to_byte()), Some(Side::Sell));
        assert_eq!(Side::from_byte(2), None);
    }
}
