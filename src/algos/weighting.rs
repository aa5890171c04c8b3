use crate::algos::{Algo, AlgoContext};
use crate::data::Panel;
use crate::error::Result;
use crate::weighting::{
    equal_weights, inverse_volatility, limit_weights, mean_variance, random_weights,
    returns_from_prices, risk_parity, CovarianceMethod, RiskParityMethod,
};
use indexmap::IndexMap;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

//the covariance based estimators need at least this many return rows
const MIN_OBSERVATIONS: usize = 2;

//false when the window is too short to estimate anything, the stack then stops
fn enough_history(ctx: &AlgoContext, algo: &str, returns: &Array2<f64>) -> bool {
    if returns.nrows() < MIN_OBSERVATIONS {
        debug!(
            strategy = %ctx.name(),
            algo,
            observations = returns.nrows(),
            "not enough return history, skipping"
        );
        return false;
    }
    true
}

fn zip_weights(names: &[String], weights: &Array1<f64>) -> IndexMap<String, f64> {
    names
        .iter()
        .cloned()
        .zip(weights.iter().copied())
        .collect()
}

//return observations for the selected names: the stat window when it covers
//them, otherwise simple returns of the price window
fn selected_returns(ctx: &AlgoContext, names: &[String], lookback: usize, lag: usize) -> Array2<f64> {
    if let Some(window) = ctx.temp.returns.as_ref() {
        let columns: Option<Vec<usize>> = names
            .iter()
            .map(|n| window.names.iter().position(|w| w == n))
            .collect();
        if let Some(columns) = columns {
            let rows: Vec<usize> = (0..window.observations.nrows())
                .filter(|r| columns.iter().all(|c| window.observations[[*r, *c]].is_finite()))
                .collect();
            if rows.len() >= 2 {
                return Array2::from_shape_fn((rows.len(), columns.len()), |(r, c)| {
                    window.observations[[rows[r], columns[c]]]
                });
            }
        }
    }
    returns_from_prices(&ctx.price_window(names, lookback + 1, lag))
}

//1/n over the selection
#[derive(Debug, Clone, Default)]
pub struct EqualWeight;

impl EqualWeight {
    pub fn new() -> Self {
        EqualWeight
    }
}

impl Algo for EqualWeight {
    fn name(&self) -> &str {
        "EqualWeight"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        ctx.temp.weights = Some(equal_weights(ctx.temp.selected()));
        Ok(true)
    }
}

//1/n over the selection against a notional base, for fixed-income strategies
#[derive(Debug, Clone, Default)]
pub struct EqualNotionalWeight {
    notional: Option<f64>,
}

impl EqualNotionalWeight {
    //None keeps the strategy's own notional as base
    pub fn new(notional: Option<f64>) -> Self {
        EqualNotionalWeight { notional }
    }
}

impl Algo for EqualNotionalWeight {
    fn name(&self) -> &str {
        "EqualNotionalWeight"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        if let Some(notional) = self.notional {
            ctx.temp.notional_value = Some(notional);
        }
        ctx.temp.weights = Some(equal_weights(ctx.temp.selected()));
        Ok(true)
    }
}

//fixed weights, restricted to the selection when one exists
#[derive(Debug, Clone)]
pub struct SpecifiedWeight {
    weights: IndexMap<String, f64>,
}

impl SpecifiedWeight {
    pub fn new<I, S>(weights: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        SpecifiedWeight {
            weights: weights.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl Algo for SpecifiedWeight {
    fn name(&self) -> &str {
        "SpecifiedWeight"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let weights = match &ctx.temp.selected {
            Some(selected) => self
                .weights
                .iter()
                .filter(|(k, _)| selected.contains(k))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            None => self.weights.clone(),
        };
        ctx.temp.weights = Some(weights);
        Ok(true)
    }
}

//weights read from a dated schedule, false on dates the schedule lacks
#[derive(Debug, Clone, Default)]
pub struct TargetWeight {
    schedule: Option<Panel>,
}

impl TargetWeight {
    //reads the target_weights panel of the additional data
    pub fn new() -> Self {
        TargetWeight { schedule: None }
    }

    pub fn with_schedule(schedule: Panel) -> Self {
        TargetWeight {
            schedule: Some(schedule),
        }
    }
}

impl Algo for TargetWeight {
    fn name(&self) -> &str {
        "TargetWeight"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let schedule = match self.schedule.as_ref().or(ctx.data.target_weights.as_ref()) {
            Some(schedule) => schedule,
            None => return Err(ctx.config_error("no target weight schedule")),
        };
        let Some(row) = schedule.row_of(ctx.date()?) else {
            return Ok(false);
        };

        let weights: IndexMap<String, f64> = schedule
            .columns()
            .enumerate()
            .map(|(col, name)| (name.to_string(), schedule.value(row, col)))
            .filter(|(_, w)| !w.is_nan())
            .collect();
        ctx.temp.weights = Some(weights);
        Ok(true)
    }
}

//weights proportional to inverse volatility over a lookback
#[derive(Debug, Clone)]
pub struct InvVolWeight {
    lookback: usize,
    lag: usize,
}

impl InvVolWeight {
    pub fn new(lookback: usize) -> Self {
        InvVolWeight { lookback, lag: 0 }
    }

    pub fn with_lag(mut self, lag: usize) -> Self {
        self.lag = lag;
        self
    }
}

impl Algo for InvVolWeight {
    fn name(&self) -> &str {
        "InvVolWeight"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let names = ctx.temp.selected().to_vec();
        if names.is_empty() {
            ctx.temp.weights = Some(IndexMap::new());
            return Ok(true);
        }

        let returns = selected_returns(ctx, &names, self.lookback, self.lag);
        if !enough_history(ctx, "InvVolWeight", &returns) {
            return Ok(false);
        }
        let weights: IndexMap<String, f64> = zip_weights(&names, &inverse_volatility(&returns))
            .into_iter()
            .filter(|(_, w)| !w.is_nan())
            .collect();
        //no finite volatility in the window
        if weights.is_empty() {
            return Ok(false);
        }
        ctx.temp.weights = Some(weights);
        Ok(true)
    }
}

//maximum sharpe ratio weights over a lookback
#[derive(Debug, Clone)]
pub struct MvoWeight {
    lookback: usize,
    lag: usize,
    bounds: (f64, f64),
    rf: f64,
    covariance: CovarianceMethod,
}

impl MvoWeight {
    pub fn new(lookback: usize) -> Self {
        MvoWeight {
            lookback,
            lag: 0,
            bounds: (0.0, 1.0),
            rf: 0.0,
            covariance: CovarianceMethod::Standard,
        }
    }

    pub fn with_lag(mut self, lag: usize) -> Self {
        self.lag = lag;
        self
    }

    pub fn with_bounds(mut self, lo: f64, hi: f64) -> Self {
        self.bounds = (lo, hi);
        self
    }

    //risk free rate per period
    pub fn with_rf(mut self, rf: f64) -> Self {
        self.rf = rf;
        self
    }

    pub fn with_covariance(mut self, covariance: CovarianceMethod) -> Self {
        self.covariance = covariance;
        self
    }
}

impl Algo for MvoWeight {
    fn name(&self) -> &str {
        "MvoWeight"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let names = ctx.temp.selected().to_vec();
        if names.is_empty() {
            ctx.temp.weights = Some(IndexMap::new());
            return Ok(true);
        }

        let returns = returns_from_prices(&ctx.price_window(&names, self.lookback + 1, self.lag));
        if !enough_history(ctx, "MvoWeight", &returns) {
            return Ok(false);
        }
        let weights = mean_variance(&returns, self.bounds, self.rf, self.covariance)
            .map_err(|e| ctx.relabel(e))?;
        ctx.temp.weights = Some(zip_weights(&names, &weights));
        Ok(true)
    }
}

//equal risk contribution weights over a lookback
#[derive(Debug, Clone)]
pub struct RiskParityWeight {
    lookback: usize,
    lag: usize,
    covariance: CovarianceMethod,
    method: RiskParityMethod,
    risk_budget: Option<IndexMap<String, f64>>,
    maximum_iterations: usize,
    tolerance: f64,
}

impl RiskParityWeight {
    pub fn new(lookback: usize) -> Self {
        RiskParityWeight {
            lookback,
            lag: 0,
            covariance: CovarianceMethod::Standard,
            method: RiskParityMethod::Ccd,
            risk_budget: None,
            maximum_iterations: 100,
            tolerance: 1e-8,
        }
    }

    pub fn with_lag(mut self, lag: usize) -> Self {
        self.lag = lag;
        self
    }

    pub fn with_covariance(mut self, covariance: CovarianceMethod) -> Self {
        self.covariance = covariance;
        self
    }

    pub fn with_method(mut self, method: RiskParityMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_risk_budget(mut self, budget: IndexMap<String, f64>) -> Self {
        self.risk_budget = Some(budget);
        self
    }

    pub fn with_solver(mut self, maximum_iterations: usize, tolerance: f64) -> Self {
        self.maximum_iterations = maximum_iterations;
        self.tolerance = tolerance;
        self
    }
}

impl Algo for RiskParityWeight {
    fn name(&self) -> &str {
        "RiskParityWeight"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let names = ctx.temp.selected().to_vec();
        if names.is_empty() {
            ctx.temp.weights = Some(IndexMap::new());
            return Ok(true);
        }

        let returns = selected_returns(ctx, &names, self.lookback, self.lag);
        if !enough_history(ctx, "RiskParityWeight", &returns) {
            return Ok(false);
        }
        let cov = self
            .covariance
            .estimate(&returns)
            .map_err(|e| ctx.relabel(e))?;

        let budget: Option<Array1<f64>> = match &self.risk_budget {
            Some(map) => {
                let raw: Array1<f64> = names
                    .iter()
                    .map(|n| map.get(n).copied().unwrap_or(0.0))
                    .collect();
                let total = raw.sum();
                if total <= 0.0 {
                    return Err(ctx.config_error("risk budget is empty for the selection"));
                }
                Some(raw / total)
            }
            None => None,
        };

        let weights = risk_parity(
            &cov,
            budget.as_ref(),
            None,
            self.method,
            self.maximum_iterations,
            self.tolerance,
        )
        .map_err(|e| ctx.relabel(e))?;
        ctx.temp.weights = Some(zip_weights(&names, &weights));
        Ok(true)
    }
}

//uniform random weights within bounds
#[derive(Debug, Clone)]
pub struct RandomWeight {
    bounds: (f64, f64),
    total: f64,
    rng: StdRng,
}

impl RandomWeight {
    pub fn new(seed: u64) -> Self {
        RandomWeight {
            bounds: (0.0, 1.0),
            total: 1.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_bounds(mut self, lo: f64, hi: f64) -> Self {
        self.bounds = (lo, hi);
        self
    }

    pub fn with_total(mut self, total: f64) -> Self {
        self.total = total;
        self
    }
}

impl Algo for RandomWeight {
    fn name(&self) -> &str {
        "RandomWeight"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let names = ctx.temp.selected().to_vec();
        let weights = random_weights(names.len(), self.bounds, self.total, &mut self.rng)
            .map_err(|e| ctx.relabel(e))?;
        ctx.temp.weights = Some(names.into_iter().zip(weights).collect());
        Ok(true)
    }
}

//multiplies every weight by a constant
#[derive(Debug, Clone)]
pub struct ScaleWeights {
    scale: f64,
}

impl ScaleWeights {
    pub fn new(scale: f64) -> Self {
        ScaleWeights { scale }
    }
}

impl Algo for ScaleWeights {
    fn name(&self) -> &str {
        "ScaleWeights"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let Some(weights) = ctx.temp.weights.as_mut() else {
            return Err(ctx.config_error("ScaleWeights needs weights, run a weighting algo first"));
        };
        for w in weights.values_mut() {
            *w *= self.scale;
        }
        Ok(true)
    }
}

//caps each weight, redistributing the excess
#[derive(Debug, Clone)]
pub struct LimitWeights {
    limit: f64,
}

impl LimitWeights {
    pub fn new(limit: f64) -> Self {
        LimitWeights { limit }
    }
}

impl Algo for LimitWeights {
    fn name(&self) -> &str {
        "LimitWeights"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let Some(weights) = ctx.temp.weights.as_ref() else {
            return Err(ctx.config_error("LimitWeights needs weights, run a weighting algo first"));
        };
        let limited = limit_weights(weights, self.limit).map_err(|e| ctx.relabel(e))?;
        ctx.temp.weights = Some(limited);
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeltaLimit {
    Global(f64),
    PerAsset(IndexMap<String, f64>),
}

//clamps the change from current to target weight
#[derive(Debug, Clone)]
pub struct LimitDeltas {
    limit: DeltaLimit,
}

impl LimitDeltas {
    pub fn new(limit: f64) -> Self {
        LimitDeltas {
            limit: DeltaLimit::Global(limit),
        }
    }

    //names without a limit are not clamped
    pub fn per_asset(limits: IndexMap<String, f64>) -> Self {
        LimitDeltas {
            limit: DeltaLimit::PerAsset(limits),
        }
    }
}

impl Algo for LimitDeltas {
    fn name(&self) -> &str {
        "LimitDeltas"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let Some(mut weights) = ctx.temp.weights.take() else {
            return Err(ctx.config_error("LimitDeltas needs weights, run a weighting algo first"));
        };

        let mut names: Vec<String> = ctx.tree.node(ctx.target).children.keys().cloned().collect();
        for name in weights.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }

        for name in names {
            let limit = match &self.limit {
                DeltaLimit::Global(l) => *l,
                DeltaLimit::PerAsset(map) => match map.get(&name) {
                    Some(l) => *l,
                    None => continue,
                },
            };
            let target = weights.get(&name).copied().unwrap_or(0.0);
            let current = ctx.tree.child_weight(ctx.target, &name);
            let delta = target - current;
            if delta.abs() > limit {
                weights.insert(name, current + limit * delta.signum());
            }
        }

        ctx.temp.weights = Some(weights);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algos::testing::{day, Fixture};
    use crate::data::AdditionalData;
    use approx::assert_relative_eq;

    fn zigzag(n: usize, base: f64, amp: f64) -> Vec<f64> {
        (0..n)
            .map(|i| base * (1.0 + if i % 2 == 0 { amp } else { -amp }) * (1.0 + 0.001 * i as f64))
            .collect()
    }

    fn select(fx: &mut Fixture, names: &[&str]) {
        fx.temp.selected = Some(names.iter().map(|s| s.to_string()).collect());
    }

    #[test]
    fn empty_selection_gives_empty_weights() {
        let mut fx = Fixture::new(vec![("A", vec![1.0, 1.0])], vec![]);
        fx.advance(2);
        select(&mut fx, &[]);

        let mut algos: Vec<Box<dyn Algo>> = vec![
            Box::new(EqualWeight::new()),
            Box::new(InvVolWeight::new(1)),
            Box::new(MvoWeight::new(1)),
            Box::new(RiskParityWeight::new(1)),
            Box::new(RandomWeight::new(1)),
        ];
        for algo in algos.iter_mut() {
            let root = fx.tree.root();
            let mut ctx = AlgoContext {
                tree: &mut fx.tree,
                target: root,
                engines: &fx.engines,
                data: &fx.data,
                temp: &mut fx.temp,
                perm: &mut fx.perm,
            };
            assert!(algo.run(&mut ctx).unwrap());
            assert!(fx.temp.weights.as_ref().unwrap().is_empty(), "{}", algo.name());
        }
    }

    #[test]
    fn equal_and_specified() {
        let mut fx = Fixture::new(vec![("A", vec![1.0]), ("B", vec![1.0])], vec![]);
        fx.advance(1);
        select(&mut fx, &["A", "B"]);
        fx.run(&mut EqualWeight::new()).unwrap();
        assert_eq!(fx.temp.weights.as_ref().unwrap()["A"], 0.5);

        select(&mut fx, &["B"]);
        fx.run(&mut SpecifiedWeight::new([("A", 0.3), ("B", 0.7)])).unwrap();
        let w = fx.temp.weights.as_ref().unwrap();
        assert_eq!(w.len(), 1);
        assert_eq!(w["B"], 0.7);
    }

    #[test]
    fn target_weight_skips_missing_dates() {
        let schedule = Panel::from_columns(
            vec![day(2)],
            vec![("A", vec![0.6]), ("B", vec![f64::NAN])],
        )
        .unwrap();
        let data = AdditionalData::new().with_target_weights(schedule);
        let mut fx = Fixture::with_data(
            vec![("A", vec![1.0, 1.0]), ("B", vec![1.0, 1.0])],
            vec![],
            data,
        );
        fx.advance(1);
        assert!(!fx.run(&mut TargetWeight::new()).unwrap());
        fx.advance(2);
        assert!(fx.run(&mut TargetWeight::new()).unwrap());
        let w = fx.temp.weights.as_ref().unwrap();
        assert_eq!(w.len(), 1);
        assert_eq!(w["A"], 0.6);
    }

    #[test]
    fn inverse_vol_prefers_the_calmer_asset() {
        let mut fx = Fixture::new(
            vec![("A", zigzag(30, 100.0, 0.01)), ("B", zigzag(30, 100.0, 0.03))],
            vec![],
        );
        fx.advance(30);
        select(&mut fx, &["A", "B"]);
        fx.run(&mut InvVolWeight::new(20)).unwrap();
        let w = fx.temp.weights.as_ref().unwrap();
        assert!(w["A"] > w["B"]);
        assert_relative_eq!(w["A"] + w["B"], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn mvo_and_risk_parity_sum_to_one() {
        let a: Vec<f64> = (0..40).map(|i| 100.0 * 1.002f64.powi(i) * (1.0 + 0.01 * ((i % 3) as f64 - 1.0))).collect();
        let b: Vec<f64> = (0..40).map(|i| 50.0 * 1.001f64.powi(i) * (1.0 + 0.02 * ((i % 4) as f64 - 1.5))).collect();
        let mut fx = Fixture::new(vec![("A", a), ("B", b)], vec![]);
        fx.advance(40);
        select(&mut fx, &["A", "B"]);

        fx.run(&mut MvoWeight::new(30)).unwrap();
        let w = fx.temp.weights.clone().unwrap();
        assert_relative_eq!(w.values().sum::<f64>(), 1.0, epsilon = 1e-8);
        assert!(w.values().all(|x| *x >= -1e-12 && *x <= 1.0 + 1e-12));

        fx.run(&mut RiskParityWeight::new(30)).unwrap();
        let w = fx.temp.weights.clone().unwrap();
        assert_relative_eq!(w.values().sum::<f64>(), 1.0, epsilon = 1e-6);
        assert!(w["A"] > w["B"]);
    }

    #[test]
    fn random_weights_respect_bounds() {
        let mut fx = Fixture::new(
            vec![("A", vec![1.0]), ("B", vec![1.0]), ("C", vec![1.0])],
            vec![],
        );
        fx.advance(1);
        select(&mut fx, &["A", "B", "C"]);
        fx.run(&mut RandomWeight::new(42).with_bounds(0.1, 0.5)).unwrap();
        let w = fx.temp.weights.as_ref().unwrap();
        assert_relative_eq!(w.values().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(w.values().all(|x| *x >= 0.1 - 1e-12 && *x <= 0.5 + 1e-12));
    }

    #[test]
    fn scale_limit_and_delta_post_processing() {
        let mut fx = Fixture::new(vec![("A", vec![10.0]), ("B", vec![10.0])], vec![]);
        fx.advance(1);
        let root = fx.tree.root();
        fx.tree.allocate(root, 500_000.0, Some("A")).unwrap();
        fx.tree.refresh().unwrap();

        fx.temp.weights = Some([("A".to_string(), 0.8), ("B".to_string(), 0.2)].into_iter().collect());
        fx.run(&mut ScaleWeights::new(2.0)).unwrap();
        assert_eq!(fx.temp.weights.as_ref().unwrap()["A"], 1.6);

        fx.temp.weights = Some([("A".to_string(), 0.8), ("B".to_string(), 0.2)].into_iter().collect());
        fx.run(&mut LimitWeights::new(0.6)).unwrap();
        let w = fx.temp.weights.as_ref().unwrap();
        assert_relative_eq!(w["A"], 0.6, epsilon = 1e-9);
        assert_relative_eq!(w["B"], 0.4, epsilon = 1e-9);

        assert!(fx.run(&mut LimitWeights::new(0.4)).is_err());

        //A sits at 0.5, B at 0
        fx.temp.weights = Some([("A".to_string(), 1.0), ("B".to_string(), 0.0)].into_iter().collect());
        fx.run(&mut LimitDeltas::new(0.1)).unwrap();
        let w = fx.temp.weights.as_ref().unwrap();
        assert_relative_eq!(w["A"], 0.6, epsilon = 1e-9);
        assert_eq!(w["B"], 0.0);

        fx.temp.weights = None;
        assert!(fx.run(&mut ScaleWeights::new(2.0)).is_err());
    }
    #[test]
    fn short_history_stops_the_stack_without_weights() {
        let mut fx = Fixture::new(
            vec![("A", zigzag(3, 100.0, 0.01)), ("B", zigzag(3, 50.0, 0.02))],
            vec![],
        );
        for row in [1, 2] {
            fx.advance(row);
            select(&mut fx, &["A", "B"]);
            let mut algos: Vec<Box<dyn Algo>> = vec![
                Box::new(InvVolWeight::new(20)),
                Box::new(MvoWeight::new(20)),
                Box::new(RiskParityWeight::new(20)),
            ];
            for algo in algos.iter_mut() {
                fx.temp.weights = None;
                let root = fx.tree.root();
                let mut ctx = AlgoContext {
                    tree: &mut fx.tree,
                    target: root,
                    engines: &fx.engines,
                    data: &fx.data,
                    temp: &mut fx.temp,
                    perm: &mut fx.perm,
                };
                assert!(!algo.run(&mut ctx).unwrap(), "{} row {}", algo.name(), row);
                assert!(fx.temp.weights.is_none(), "{}", algo.name());
            }
        }
    }

    #[test]
    fn new_listing_gap_skips_inverse_vol() {
        let c: Vec<f64> = (0..14)
            .map(|i| if i < 10 { f64::NAN } else { 20.0 + i as f64 })
            .collect();
        let mut fx = Fixture::new(
            vec![("A", zigzag(14, 100.0, 0.01)), ("B", zigzag(14, 50.0, 0.02)), ("C", c)],
            vec![],
        );
        //C has one price, the joint window keeps no row
        fx.advance(11);
        select(&mut fx, &["A", "B", "C"]);
        assert!(!fx.run(&mut InvVolWeight::new(5)).unwrap());
        assert!(fx.temp.weights.is_none());

        fx.advance(14);
        assert!(fx.run(&mut InvVolWeight::new(5)).unwrap());
        assert_eq!(fx.temp.weights.as_ref().unwrap().len(), 3);
    }
}
