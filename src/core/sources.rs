//! Upstream data source abstractions.
//!
//! Implementations never fail: an unreachable or misbehaving upstream yields
//! a zero/empty record marked as degraded.

use crate::core::config::WalletConfig;
use crate::core::model::{
    AlphaTrade, Expense, PricePoint, PriceSnapshot, PriceTicker, Sourced, StakingSnapshot,
    Transaction, WalletBalance,
};
use async_trait::async_trait;

/// Chain indexer: native token price, balances, staking and transfers.
#[async_trait]
pub trait ChainIndexer: Send + Sync {
    async fn price(&self) -> Sourced<PriceSnapshot>;

    /// Balances of `wallets`, valued at `price` USD per token.
    async fn wallet_balances(
        &self,
        wallets: &[WalletConfig],
        price: f64,
    ) -> Sourced<Vec<WalletBalance>>;

    async fn staking(&self, hotkey: Option<&str>, price: f64) -> Sourced<StakingSnapshot>;

    /// Recent transfers of every wallet, deduplicated and newest first.
    async fn transfers(
        &self,
        wallets: &[WalletConfig],
        price: f64,
        large_threshold: f64,
    ) -> Sourced<Vec<Transaction>>;

    /// Transfers at or above `large_threshold` tokens, over a longer history.
    async fn large_transfers(
        &self,
        wallets: &[WalletConfig],
        price: f64,
        large_threshold: f64,
    ) -> Sourced<Vec<Transaction>>;

    async fn alpha_trades(
        &self,
        netuid: u16,
        price: f64,
        large_threshold: f64,
    ) -> Sourced<Vec<AlphaTrade>>;
}

/// Block explorer for the secondary chain.
#[async_trait]
pub trait BlockExplorer: Send + Sync {
    /// USD price of the explorer chain's token.
    async fn token_price(&self) -> Sourced<f64>;

    async fn wallet_balances(
        &self,
        wallets: &[WalletConfig],
        price: f64,
    ) -> Sourced<Vec<WalletBalance>>;
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn subnet_price(&self) -> Sourced<PriceSnapshot>;

    async fn native_ticker(&self) -> Sourced<PriceTicker>;

    async fn native_history(&self) -> Sourced<Vec<PricePoint>>;
}

#[async_trait]
pub trait ExpenseSource: Send + Sync {
    async fn expenses(&self) -> Sourced<Vec<Expense>>;
}
