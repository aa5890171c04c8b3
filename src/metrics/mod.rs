pub mod summary;
pub mod timeseries;

pub use summary::{comparison_table, sharpe_ratio, sortino_ratio, PerformanceStats};
pub use timeseries::{calculate_equity_curve, drawdown_series, max_drawdown, to_returns, EquityPoint};
