use crate::algos::{
    AlgoStack, EqualWeight, Frequency, InvVolWeight, MvoWeight, Rebalance, ReplayTransactions,
    RiskParityWeight, RunAfterDays, RunOnce, RunPeriod, SelectAll, SelectMomentum, TargetWeight,
};
use crate::data::{load_panel_csv, load_transactions_csv, AdditionalData};
use crate::engine::{Backtest, BacktestConfig};
use crate::tree::{Commission, SecuritySpec, StrategySpec};
use crate::weighting::CovarianceMethod;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

//fee model installed on the root strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommissionModel {
    #[default]
    Zero,
    PerUnit {
        rate: f64,
    },
    Percentage {
        rate: f64,
    },
    PerUnitWithMinimum {
        rate: f64,
        minimum: f64,
    },
}

impl CommissionModel {
    pub fn to_commission(self) -> Commission {
        match self {
            CommissionModel::Zero => Commission::zero(),
            CommissionModel::PerUnit { rate } => Commission::per_unit(rate),
            CommissionModel::Percentage { rate } => Commission::percentage(rate),
            CommissionModel::PerUnitWithMinimum { rate, minimum } => {
                Commission::per_unit_with_minimum(rate, minimum)
            }
        }
    }
}

//ready made algo stacks for the root strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StackPreset {
    BuyAndHold,
    EqualWeight {
        frequency: Frequency,
    },
    InverseVolatility {
        frequency: Frequency,
        lookback: usize,
    },
    MeanVariance {
        frequency: Frequency,
        lookback: usize,
        #[serde(default = "default_bounds")]
        bounds: (f64, f64),
        #[serde(default)]
        covariance: CovarianceMethod,
    },
    RiskParity {
        frequency: Frequency,
        lookback: usize,
        #[serde(default)]
        covariance: CovarianceMethod,
    },
    Momentum {
        frequency: Frequency,
        n: usize,
        lookback: usize,
    },
    TargetWeights,
    ReplayTransactions,
}

fn default_bounds() -> (f64, f64) {
    (0.0, 1.0)
}

impl StackPreset {
    pub fn build(&self, engine: &BacktestConfig) -> AlgoStack {
        match self {
            StackPreset::BuyAndHold => AlgoStack::new()
                .with(RunOnce::new())
                .with(SelectAll::new())
                .with(EqualWeight::new())
                .with(Rebalance::new()),
            StackPreset::EqualWeight { frequency } => AlgoStack::new()
                .with(RunPeriod::new(*frequency))
                .with(SelectAll::new())
                .with(EqualWeight::new())
                .with(Rebalance::new()),
            StackPreset::InverseVolatility {
                frequency,
                lookback,
            } => AlgoStack::new()
                .with(RunAfterDays::new(*lookback))
                .with(RunPeriod::new(*frequency))
                .with(SelectAll::new())
                .with(InvVolWeight::new(*lookback))
                .with(Rebalance::new()),
            StackPreset::MeanVariance {
                frequency,
                lookback,
                bounds,
                covariance,
            } => AlgoStack::new()
                .with(RunAfterDays::new(*lookback))
                .with(RunPeriod::new(*frequency))
                .with(SelectAll::new())
                .with(
                    MvoWeight::new(*lookback)
                        .with_bounds(bounds.0, bounds.1)
                        .with_rf(engine.risk_free_rate / engine.annualization_factor)
                        .with_covariance(*covariance),
                )
                .with(Rebalance::new()),
            StackPreset::RiskParity {
                frequency,
                lookback,
                covariance,
            } => AlgoStack::new()
                .with(RunAfterDays::new(*lookback))
                .with(RunPeriod::new(*frequency))
                .with(SelectAll::new())
                .with(RiskParityWeight::new(*lookback).with_covariance(*covariance))
                .with(Rebalance::new()),
            StackPreset::Momentum {
                frequency,
                n,
                lookback,
            } => AlgoStack::new()
                .with(RunAfterDays::new(*lookback))
                .with(RunPeriod::new(*frequency))
                .with(SelectAll::new())
                .with(SelectMomentum::new(*n, *lookback))
                .with(EqualWeight::new())
                .with(Rebalance::new()),
            StackPreset::TargetWeights => AlgoStack::new()
                .with(TargetWeight::new())
                .with(Rebalance::new()),
            StackPreset::ReplayTransactions => AlgoStack::new().with(ReplayTransactions::new()),
        }
    }
}

//optional csv inputs, panels must share the price panel's dates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    pub bidoffer: Option<PathBuf>,
    pub coupons: Option<PathBuf>,
    pub payment_schedule: Option<PathBuf>,
    pub cost_long: Option<PathBuf>,
    pub cost_short: Option<PathBuf>,
    pub transactions: Option<PathBuf>,
    pub target_weights: Option<PathBuf>,
}

impl DataPaths {
    pub fn load(&self) -> anyhow::Result<AdditionalData> {
        let mut data = AdditionalData::new();
        if let Some(path) = &self.bidoffer {
            data = data.with_bidoffer(load_panel_csv(path)?);
        }
        if let Some(path) = &self.coupons {
            data = data.with_coupons(load_panel_csv(path)?);
        }
        if let Some(path) = &self.payment_schedule {
            data = data.with_payment_schedule(load_panel_csv(path)?);
        }
        if let Some(path) = &self.cost_long {
            data = data.with_cost_long(load_panel_csv(path)?);
        }
        if let Some(path) = &self.cost_short {
            data = data.with_cost_short(load_panel_csv(path)?);
        }
        if let Some(path) = &self.transactions {
            data = data.with_transactions(load_transactions_csv(path)?);
        }
        if let Some(path) = &self.target_weights {
            data = data.with_target_weights(load_panel_csv(path)?);
        }
        Ok(data)
    }
}

//where to write results, nothing is written when unset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputPaths {
    pub prices_csv: Option<PathBuf>,
    pub weights_csv: Option<PathBuf>,
    pub security_weights_csv: Option<PathBuf>,
    pub positions_csv: Option<PathBuf>,
    pub transactions_csv: Option<PathBuf>,
    pub equity_csv: Option<PathBuf>,
    pub stats_json: Option<PathBuf>,
}

//complete backtest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfiguration {
    pub name: String,
    pub prices_path: PathBuf,

    #[serde(default)]
    pub engine: BacktestConfig,
    #[serde(default)]
    pub commission: CommissionModel,
    #[serde(default)]
    pub data: DataPaths,

    //root strategy
    #[serde(default = "default_par")]
    pub par: f64,
    #[serde(default)]
    pub fixed_income: bool,
    //declared children, an empty list trades the whole price panel
    #[serde(default)]
    pub securities: Vec<SecuritySpec>,
    pub stack: StackPreset,

    #[serde(default)]
    pub output: OutputPaths,
}

fn default_par() -> f64 {
    100.0
}

impl Default for BacktestConfiguration {
    fn default() -> Self {
        BacktestConfiguration {
            name: "equal_weight".to_string(),
            prices_path: PathBuf::from("prices.csv"),
            engine: BacktestConfig::default(),
            commission: CommissionModel::Zero,
            data: DataPaths::default(),
            par: default_par(),
            fixed_income: false,
            securities: Vec::new(),
            stack: StackPreset::EqualWeight {
                frequency: Frequency::Monthly,
            },
            output: OutputPaths::default(),
        }
    }
}

impl BacktestConfiguration {
    //load configuration from a JSON file
    pub fn from_json_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read configuration {:?}", path))?;
        let config: BacktestConfiguration = serde_json::from_str(&contents)
            .context(format!("Failed to parse configuration {:?}", path))?;
        Ok(config)
    }

    //save configuration to a JSON file
    pub fn to_json_file(&self, path: &PathBuf) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).context(format!("Failed to write configuration {:?}", path))?;
        Ok(())
    }

    pub fn strategy_spec(&self) -> StrategySpec {
        let mut spec = StrategySpec::new(self.name.clone(), self.stack.build(&self.engine))
            .with_par(self.par)
            .with_children(self.securities.iter().cloned());
        if self.fixed_income {
            spec = spec.fixed_income();
        }
        spec
    }

    //loads every input and assembles the backtest
    pub fn build(&self) -> anyhow::Result<Backtest> {
        let prices = load_panel_csv(&self.prices_path)
            .context(format!("Failed to load prices from {:?}", self.prices_path))?;
        let data = self.data.load()?;
        debug!(
            backtest = %self.name,
            dates = prices.len(),
            columns = prices.width(),
            "loaded inputs"
        );

        let backtest = Backtest::new(self.strategy_spec(), prices, data, self.engine.clone())
            .context(format!("Failed to set up backtest '{}'", self.name))?;
        Ok(backtest.with_commission(self.commission.to_commission()))
    }
}
