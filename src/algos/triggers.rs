use crate::algos::{Algo, AlgoContext};
use crate::error::Result;
use crate::weighting::{predicted_tracking_error, returns_from_prices, CovarianceMethod};
use ndarray::Array1;
use tracing::debug;

//true when any child drifted more than `tolerance` (relative) from its last
//target weight, or when no target exists yet
#[derive(Debug, Clone)]
pub struct RunIfOutOfBounds {
    tolerance: f64,
}

impl RunIfOutOfBounds {
    pub fn new(tolerance: f64) -> Self {
        RunIfOutOfBounds {
            tolerance: tolerance.abs(),
        }
    }
}

fn relative_deviation(current: f64, target: f64) -> f64 {
    if target == 0.0 {
        current.abs()
    } else {
        ((current - target) / target).abs()
    }
}

impl Algo for RunIfOutOfBounds {
    fn name(&self) -> &str {
        "RunIfOutOfBounds"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let Some(targets) = ctx.temp.weights.as_ref() else {
            return Ok(true);
        };

        for (name, target) in targets {
            let current = ctx.tree.child_weight(ctx.target, name);
            if relative_deviation(current, *target) > self.tolerance {
                debug!(strategy = %ctx.name(), child = %name, current, target, "out of bounds");
                return Ok(true);
            }
        }

        if let Some(cash) = ctx.temp.cash {
            let node = ctx.tree.node(ctx.target);
            let current = if node.value != 0.0 {
                node.capital / node.value
            } else {
                0.0
            };
            if relative_deviation(current, cash) > self.tolerance {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

//true when the predicted tracking error between current and target weights
//exceeds the cap, or when no target exists yet
#[derive(Debug, Clone)]
pub struct PteRebalance {
    cap: f64,
    lookback: usize,
    lag: usize,
    covariance: CovarianceMethod,
    //falls back to the registry factor
    annualization: Option<f64>,
}

impl PteRebalance {
    pub fn new(cap: f64, lookback: usize) -> Self {
        PteRebalance {
            cap,
            lookback,
            lag: 0,
            covariance: CovarianceMethod::LedoitWolf,
            annualization: None,
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

    pub fn with_annualization(mut self, factor: f64) -> Self {
        self.annualization = Some(factor);
        self
    }
}

impl Algo for PteRebalance {
    fn name(&self) -> &str {
        "PteRebalance"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let Some(targets) = ctx.temp.weights.clone() else {
            return Ok(true);
        };

        let mut names: Vec<String> = ctx
            .tree
            .node(ctx.target)
            .children
            .keys()
            .filter(|n| ctx.tree.child_weight(ctx.target, n) != 0.0)
            .cloned()
            .collect();
        for name in targets.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.retain(|n| ctx.tree.in_universe(ctx.target, n));
        if names.is_empty() {
            return Ok(false);
        }

        let diff: Array1<f64> = names
            .iter()
            .map(|n| {
                ctx.tree.child_weight(ctx.target, n) - targets.get(n).copied().unwrap_or(0.0)
            })
            .collect();

        let prices = ctx.price_window(&names, self.lookback + 1, self.lag);
        let returns = returns_from_prices(&prices);
        let cov = match self.covariance.estimate(&returns) {
            Ok(cov) => cov,
            //not enough history, treat like an undefined estimate
            Err(_) => return Ok(false),
        };

        let factor = self
            .annualization
            .unwrap_or_else(|| ctx.engines.annualize_factor());
        let pte = predicted_tracking_error(&diff, &cov, factor);
        if pte.is_nan() {
            return Ok(false);
        }
        debug!(strategy = %ctx.name(), pte, cap = self.cap, "predicted tracking error");
        Ok(pte > self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algos::testing::Fixture;
    use crate::risk::EngineRegistry;
    use indexmap::IndexMap;

    fn weights(pairs: &[(&str, f64)]) -> IndexMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn out_of_bounds_without_target_runs() {
        let mut fx = Fixture::new(vec![("A", vec![10.0, 10.0])], vec![]);
        fx.advance(1);
        assert!(fx.run(&mut RunIfOutOfBounds::new(0.1)).unwrap());
    }

    #[test]
    fn out_of_bounds_detects_drift() {
        let mut fx = Fixture::new(
            vec![("A", vec![10.0, 20.0]), ("B", vec![10.0, 10.0])],
            vec![],
        );
        fx.advance(1);
        let root = fx.tree.root();
        fx.tree.allocate(root, 500_000.0, Some("A")).unwrap();
        fx.tree.allocate(root, 500_000.0, Some("B")).unwrap();
        fx.tree.refresh().unwrap();
        fx.temp.weights = Some(weights(&[("A", 0.5), ("B", 0.5)]));

        assert!(!fx.run(&mut RunIfOutOfBounds::new(0.1)).unwrap());

        //A doubles, weights move to 2/3 and 1/3
        fx.tree.post_settlement().unwrap();
        fx.advance(2);
        assert!(fx.run(&mut RunIfOutOfBounds::new(0.1)).unwrap());
        assert!(!fx.run(&mut RunIfOutOfBounds::new(0.5)).unwrap());
    }

    #[test]
    fn pte_without_target_runs_and_matching_target_does_not() {
        let a: Vec<f64> = (0..40).map(|i| 100.0 * (1.0 + 0.01 * ((i % 5) as f64 - 2.0))).collect();
        let b: Vec<f64> = (0..40).map(|i| 50.0 * (1.0 + 0.02 * ((i % 3) as f64 - 1.0))).collect();
        let mut fx = Fixture::new(vec![("A", a), ("B", b)], vec![]);
        fx.advance(30);

        let mut algo = PteRebalance::new(0.02, 20);
        assert!(fx.run(&mut algo).unwrap());

        let root = fx.tree.root();
        fx.tree.allocate(root, 400_000.0, Some("A")).unwrap();
        fx.tree.refresh().unwrap();
        let current = fx.tree.child_weight(root, "A");
        fx.temp.weights = Some(weights(&[("A", current)]));
        assert!(!fx.run(&mut algo).unwrap());

        //an entirely different target is far away
        fx.temp.weights = Some(weights(&[("B", 1.0)]));
        assert!(fx.run(&mut algo).unwrap());
    }
    #[test]
    fn pte_annualizes_with_the_registry_factor_unless_overridden() {
        let a: Vec<f64> = (0..40).map(|i| 100.0 * (1.0 + 0.01 * ((i % 5) as f64 - 2.0))).collect();
        let b: Vec<f64> = (0..40).map(|i| 50.0 * (1.0 + 0.02 * ((i % 3) as f64 - 1.0))).collect();
        let mut fx = Fixture::new(vec![("A", a), ("B", b)], vec![]);
        fx.advance(30);
        let root = fx.tree.root();
        fx.tree.allocate(root, 400_000.0, Some("A")).unwrap();
        fx.tree.refresh().unwrap();
        fx.temp.weights = Some(weights(&[("B", 1.0)]));
        assert!(fx.run(&mut PteRebalance::new(0.02, 20)).unwrap());

        //a near-zero factor shrinks the estimate below any sane cap
        fx.engines = EngineRegistry::new(1e-12);
        assert!(!fx.run(&mut PteRebalance::new(0.02, 20)).unwrap());
        assert!(fx
            .run(&mut PteRebalance::new(0.02, 20).with_annualization(252.0))
            .unwrap());
    }
}
