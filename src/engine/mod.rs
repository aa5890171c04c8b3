pub mod backtest;
pub mod runner;

pub use backtest::{Backtest, BacktestConfig, BacktestResult};
pub use runner::{combined_prices, compare, run_batch};
