// ChainPulse monitor: real-time EVM arbitrage ingestion and detection

pub mod analyzer;
pub mod chain_monitor;
pub mod http;
pub mod hub;
pub mod pool_scanner;
pub mod price;
pub mod profit;
pub mod rpc;
pub mod stats;
pub mod storage;
pub mod tracker;
pub mod ws;

pub use analyzer::TxAnalyzer;
pub use chain_monitor::ChainMonitor;
pub use hub::BroadcastHub;
pub use pool_scanner::PoolScanner;
pub use price::NativePrice;
pub use profit::ProfitCalculator;
pub use rpc::{RpcClient, RpcSettings};
pub use stats::StatsAggregator;
pub use storage::Storage;
pub use tracker::ArbitrageurTracker;
