//! Order-book market state as published by the DEX program.
//!
//! The market account carries top-of-book prices and, per seated trader,
//! the free and locked lots they hold. Prices are in ticks; converting to
//! quote units needs the market's lot and tick sizes.

use super::LayoutError;
use crate::pubkey::Pubkey;
use borsh::{BorshDeserialize, BorshSerialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MarketState {
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_decimals: u8,
    pub quote_decimals: u8,
    /// Base atoms per base lot.
    pub base_lot_size: u64,
    /// Quote atoms per quote lot.
    pub quote_lot_size: u64,
    /// Quote lots per base unit, per tick.
    pub tick_size_in_quote_lots_per_base_unit: u64,
    /// Best resting bid, `0` when the bid side is empty.
    pub best_bid_ticks: u64,
    /// Best resting ask, `0` when the ask side is empty.
    pub best_ask_ticks: u64,
    pub traders: Vec<TraderState>,
}

/// Lots a seated trader holds on one market.
#[derive(Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TraderState {
    pub trader: Pubkey,
    pub quote_lots_locked: u64,
    pub quote_lots_free: u64,
    pub base_lots_locked: u64,
    pub base_lots_free: u64,
}

impl TraderState {
    pub fn base_lots(&self) -> u64 {
        self.base_lots_free.saturating_add(self.base_lots_locked)
    }

    pub fn quote_lots(&self) -> u64 {
        self.quote_lots_free.saturating_add(self.quote_lots_locked)
    }

    /// A seat with nothing deposited.
    pub fn is_empty(&self) -> bool {
        self.base_lots() == 0 && self.quote_lots() == 0
    }
}

impl MarketState {
    pub fn decode(data: &[u8]) -> Result<Self, LayoutError> {
        let mut body = data;
        Ok(Self::deserialize(&mut body)?)
    }

    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        borsh::to_vec(self)
    }

    pub fn trader(&self, trader: &Pubkey) -> Option<&TraderState> {
        self.traders.iter().find(|t| &t.trader == trader)
    }

    pub fn best_bid(&self) -> Option<u64> {
        (self.best_bid_ticks != 0).then_some(self.best_bid_ticks)
    }

    pub fn best_ask(&self) -> Option<u64> {
        (self.best_ask_ticks != 0).then_some(self.best_ask_ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_round_trip_and_lookup() {
        let trader = Pubkey::new_from_array([9u8; 32]);
        let market = MarketState {
            base_decimals: 9,
            quote_decimals: 6,
            base_lot_size: 1_000_000,
            quote_lot_size: 1,
            tick_size_in_quote_lots_per_base_unit: 1_000,
            best_bid_ticks: 150,
            best_ask_ticks: 0,
            traders: vec![TraderState {
                trader,
                base_lots_free: 5,
                ..Default::default()
            }],
            ..Default::default()
        };
        let decoded = MarketState::decode(&market.encode().unwrap()).unwrap();
        assert_eq!(decoded, market);
        assert_eq!(decoded.best_bid(), Some(150));
        assert_eq!(decoded.best_ask(), None);
        assert_eq!(decoded.trader(&trader).map(TraderState::base_lots), Some(5));
        assert!(decoded.trader(&Pubkey::default()).is_none());
    }
}
