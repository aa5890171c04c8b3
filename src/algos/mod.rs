pub mod rebalance;
pub mod schedule;
pub mod selection;
pub mod stats;
pub mod triggers;
pub mod weighting;

pub use rebalance::{CapitalFlow, ClosePositionsAfterDates, Rebalance, ReplayTransactions};
pub use schedule::{
    Frequency, RunAfterDate, RunAfterDays, RunEveryNPeriods, RunOnDate, RunOnce, RunPeriod,
};
pub use selection::{
    Count, SelectActive, SelectAll, SelectHasData, SelectMomentum, SelectN, SelectRandomly, SelectRegex,
    SelectThese, SelectWhere,
};
pub use stats::{CumProdReturn, LogReturn, SimpleReturn, StatTotalReturn, Volatility};
pub use triggers::{PteRebalance, RunIfOutOfBounds};
pub use weighting::{
    DeltaLimit, EqualNotionalWeight, EqualWeight, InvVolWeight, LimitDeltas, LimitWeights, MvoWeight,
    RandomWeight, RiskParityWeight, ScaleWeights, SpecifiedWeight, TargetWeight,
};

use crate::data::AdditionalData;
use crate::error::{BacktestError, Result};
use crate::risk::{EngineKey, EngineRegistry};
use crate::tree::{NodeId, Tree};
use chrono::NaiveDate;
use indexmap::IndexMap;
use ndarray::{Array1, Array2};
use std::collections::BTreeSet;
use std::fmt;

//return observations passed from stat algos to weighting algos
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnWindow {
    pub names: Vec<String>,
    //one row per date, one column per name
    pub observations: Array2<f64>,
    //engine estimate per name
    pub total: Array1<f64>,
}

//per-run scratchpad shared by the algos of one strategy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TempData {
    pub selected: Option<Vec<String>>,
    pub stat: Option<IndexMap<String, f64>>,
    pub returns: Option<ReturnWindow>,
    pub weights: Option<IndexMap<String, f64>>,
    pub cash: Option<f64>,
    pub notional_value: Option<f64>,
}

impl TempData {
    //clears everything except the last target weights
    pub fn clear(&mut self) {
        let weights = self.weights.take();
        *self = TempData {
            weights,
            ..TempData::default()
        };
    }

    pub fn selected(&self) -> &[String] {
        self.selected.as_deref().unwrap_or(&[])
    }
}

//state that survives across runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PermData {
    pub closed: BTreeSet<String>,
}

//everything an algo sees while it runs on its target strategy
pub struct AlgoContext<'a> {
    pub tree: &'a mut Tree,
    pub target: NodeId,
    pub engines: &'a EngineRegistry,
    pub data: &'a AdditionalData,
    pub temp: &'a mut TempData,
    pub perm: &'a mut PermData,
}

impl<'a> AlgoContext<'a> {
    pub fn name(&self) -> &str {
        &self.tree.node(self.target).full_name
    }

    pub fn now(&self) -> Option<NaiveDate> {
        self.tree.node(self.target).now
    }

    //current date, algos never run before the first tick
    pub fn date(&self) -> Result<NaiveDate> {
        self.now().ok_or_else(|| {
            BacktestError::config(self.name(), None, "algo ran before the first date")
        })
    }

    pub fn inow(&self) -> usize {
        self.tree.node(self.target).inow
    }

    //padded date axis
    pub fn dates(&self) -> &[NaiveDate] {
        self.tree.dates()
    }

    pub fn universe(&self) -> Vec<String> {
        self.tree.universe_names(self.target)
    }

    //previous selection, or the whole universe when nothing was selected
    pub fn candidates(&self) -> Vec<String> {
        match &self.temp.selected {
            Some(selected) => selected.clone(),
            None => self.universe(),
        }
    }

    pub fn price(&self, name: &str) -> f64 {
        self.tree.universe_price(self.target, name, self.inow())
    }

    //prices of `names` over the rows (end - len, end], end = inow - lag
    pub fn price_window(&self, names: &[String], len: usize, lag: usize) -> Array2<f64> {
        let end = self.inow().saturating_sub(lag);
        self.tree.universe_window(self.target, names, end, len)
    }

    pub fn config_error(&self, reason: impl Into<String>) -> BacktestError {
        BacktestError::config(self.name(), self.now(), reason)
    }

    //attaches this strategy and date to an error raised by a primitive
    pub fn relabel(&self, err: BacktestError) -> BacktestError {
        err.at(self.name(), self.now())
    }
}

//one composable decision step
pub trait Algo: Send {
    fn name(&self) -> &str;

    //false stops the stack
    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool>;

    //runs even after an earlier algo returned false
    fn run_always(&self) -> bool {
        false
    }

    //engines the driver must create and feed for this algo
    fn engine_keys(&self) -> Vec<EngineKey> {
        Vec::new()
    }
}

//ordered list of algos, stops at the first false except for run_always algos
#[derive(Default)]
pub struct AlgoStack {
    algos: Vec<Box<dyn Algo>>,
}

impl AlgoStack {
    pub fn new() -> Self {
        AlgoStack { algos: Vec::new() }
    }

    pub fn with<A: Algo + 'static>(mut self, algo: A) -> Self {
        self.algos.push(Box::new(algo));
        self
    }

    pub fn push(&mut self, algo: Box<dyn Algo>) {
        self.algos.push(algo);
    }

    pub fn len(&self) -> usize {
        self.algos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algos.is_empty()
    }

    pub fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let mut ok = true;
        for algo in self.algos.iter_mut() {
            if ok {
                ok = algo.run(ctx)?;
            } else if algo.run_always() {
                algo.run(ctx)?;
            }
        }
        Ok(ok)
    }
}

impl From<Vec<Box<dyn Algo>>> for AlgoStack {
    fn from(algos: Vec<Box<dyn Algo>>) -> Self {
        AlgoStack { algos }
    }
}

impl fmt::Debug for AlgoStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.algos.iter().map(|a| a.name()))
            .finish()
    }
}

//a nested stack behaves like a single algo
impl Algo for AlgoStack {
    fn name(&self) -> &str {
        "AlgoStack"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        AlgoStack::run(self, ctx)
    }

    fn engine_keys(&self) -> Vec<EngineKey> {
        self.algos.iter().flat_map(|a| a.engine_keys()).collect()
    }
}

//true if any inner algo is true, every inner algo runs
pub struct Or {
    algos: Vec<Box<dyn Algo>>,
}

impl Or {
    pub fn new(algos: Vec<Box<dyn Algo>>) -> Self {
        Or { algos }
    }
}

impl Algo for Or {
    fn name(&self) -> &str {
        "Or"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let mut any = false;
        for algo in self.algos.iter_mut() {
            any |= algo.run(ctx)?;
        }
        Ok(any)
    }

    fn engine_keys(&self) -> Vec<EngineKey> {
        self.algos.iter().flat_map(|a| a.engine_keys()).collect()
    }
}

pub struct Not {
    algo: Box<dyn Algo>,
}

impl Not {
    pub fn new<A: Algo + 'static>(algo: A) -> Self {
        Not {
            algo: Box::new(algo),
        }
    }
}

impl Algo for Not {
    fn name(&self) -> &str {
        "Not"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        Ok(!self.algo.run(ctx)?)
    }

    fn engine_keys(&self) -> Vec<EngineKey> {
        self.algo.engine_keys()
    }
}

//marks an algo as run_always
pub struct RunAlways {
    algo: Box<dyn Algo>,
}

impl RunAlways {
    pub fn new<A: Algo + 'static>(algo: A) -> Self {
        RunAlways {
            algo: Box::new(algo),
        }
    }
}

impl Algo for RunAlways {
    fn name(&self) -> &str {
        self.algo.name()
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        self.algo.run(ctx)
    }

    fn run_always(&self) -> bool {
        true
    }

    fn engine_keys(&self) -> Vec<EngineKey> {
        self.algo.engine_keys()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::data::Panel;
    use crate::tree::{NodeSpec, StrategySpec};
    use std::sync::Arc;

    //a tree over the given prices, started and advanced to real row `row`
    pub(crate) struct Fixture {
        pub tree: Tree,
        pub engines: EngineRegistry,
        pub data: Arc<AdditionalData>,
        pub temp: TempData,
        pub perm: PermData,
    }

    pub(crate) fn day(i: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64)
    }

    impl Fixture {
        pub(crate) fn new(columns: Vec<(&str, Vec<f64>)>, children: Vec<NodeSpec>) -> Self {
            Fixture::with_data(columns, children, AdditionalData::new())
        }

        pub(crate) fn with_data(
            columns: Vec<(&str, Vec<f64>)>,
            children: Vec<NodeSpec>,
            data: AdditionalData,
        ) -> Self {
            let n = columns[0].1.len();
            let dates: Vec<_> = (1..=n).map(day).collect();
            let panel = Panel::from_columns(dates, columns).unwrap();
            let data = Arc::new(data.align(&panel).unwrap());
            let padded = Arc::new(panel.with_seed_row());
            let spec = StrategySpec::new("s", AlgoStack::new()).with_children(children);
            let mut tree = Tree::build(spec, padded, Arc::clone(&data), true).unwrap();

            let root = tree.root();
            tree.adjust(root, 1_000_000.0, true, 0.0).unwrap();
            tree.pre_settlement(day(0), 0).unwrap();

            Fixture {
                tree,
                engines: EngineRegistry::new(252.0),
                data,
                temp: TempData::default(),
                perm: PermData::default(),
            }
        }

        //moves the clock to real row `row` (1-based)
        pub(crate) fn advance(&mut self, row: usize) {
            self.tree.pre_settlement(day(row), row).unwrap();
        }

        pub(crate) fn run<A: Algo>(&mut self, algo: &mut A) -> Result<bool> {
            let root = self.tree.root();
            let mut ctx = AlgoContext {
                tree: &mut self.tree,
                target: root,
                engines: &self.engines,
                data: &self.data,
                temp: &mut self.temp,
                perm: &mut self.perm,
            };
            algo.run(&mut ctx)
        }
    }
}
