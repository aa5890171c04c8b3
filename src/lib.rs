//an event-driven, tree-structured portfolio backtesting engine

pub mod algos;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod risk;
pub mod tree;
pub mod weighting;

//prelude module for convenient imports
pub mod prelude {
    pub use crate::algos::{
        Algo, AlgoContext, AlgoStack, CapitalFlow, ClosePositionsAfterDates, Count, DeltaLimit,
        EqualNotionalWeight, EqualWeight, Frequency, InvVolWeight, LimitDeltas, LimitWeights,
        MvoWeight, Not, Or, PteRebalance, RandomWeight, Rebalance, ReplayTransactions,
        RiskParityWeight, RunAfterDate, RunAfterDays, RunAlways, RunEveryNPeriods,
        RunIfOutOfBounds, RunOnDate, RunOnce, RunPeriod, ScaleWeights, SelectActive, SelectAll,
        SelectHasData, SelectMomentum, SelectN, SelectRandomly, SelectRegex, SelectThese,
        SelectWhere, SpecifiedWeight, StatTotalReturn, TargetWeight, Volatility,
    };
    pub use crate::config::{BacktestConfiguration, CommissionModel, StackPreset};
    pub use crate::data::{
        load_panel_csv, load_transactions_csv, write_panel_csv, write_transactions_csv,
        AdditionalData, Panel, TransactionRecord,
    };
    pub use crate::engine::{run_batch, Backtest, BacktestConfig, BacktestResult};
    pub use crate::error::{BacktestError, Result};
    pub use crate::metrics::{calculate_equity_curve, EquityPoint, PerformanceStats};
    pub use crate::risk::{Decay, EngineKey, EngineRegistry};
    pub use crate::tree::{
        Commission, NodeSpec, SecurityKind, SecuritySpec, StrategySpec, Tree,
    };
    pub use crate::weighting::{CovarianceMethod, RiskParityMethod};
}
