use crate::error::{BacktestError, Result};
use crate::weighting::covariance::CovarianceMethod;
use indexmap::IndexMap;
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

const MVO_MAX_ITERATIONS: usize = 10_000;

//1/n for every name
pub fn equal_weights(names: &[String]) -> IndexMap<String, f64> {
    if names.is_empty() {
        return IndexMap::new();
    }
    let w = 1.0 / names.len() as f64;
    names.iter().map(|n| (n.clone(), w)).collect()
}

//weights proportional to 1/sample volatility, NaN where volatility is zero or undefined
pub fn inverse_volatility(returns: &Array2<f64>) -> Array1<f64> {
    let inv: Array1<f64> = returns
        .axis_iter(Axis(1))
        .map(|col| {
            if col.len() < 2 {
                return f64::NAN;
            }
            let inv = 1.0 / col.iter().std_dev();
            if inv.is_finite() {
                inv
            } else {
                f64::NAN
            }
        })
        .collect();

    let total: f64 = inv.iter().filter(|x| !x.is_nan()).sum();
    inv.mapv(|x| x / total)
}

//maximum sharpe ratio weights on {sum w = 1, lo <= w <= hi}
//
//projected gradient ascent with armijo backtracking, rf is per period
pub fn mean_variance(
    returns: &Array2<f64>,
    bounds: (f64, f64),
    rf: f64,
    covariance: CovarianceMethod,
) -> Result<Array1<f64>> {
    let n = returns.ncols();
    if n == 0 {
        return Ok(Array1::zeros(0));
    }
    let (lo, hi) = bounds;
    check_bounds(n, lo, hi, 1.0)?;

    let mu = returns
        .mean_axis(Axis(0))
        .ok_or_else(|| BacktestError::numerical("mvo", None, "no return observations"))?;
    let cov = covariance.estimate(returns)?;

    let sharpe = |w: &Array1<f64>| -> Option<f64> {
        let var = w.dot(&cov.dot(w));
        if var <= 0.0 || !var.is_finite() {
            return None;
        }
        Some((mu.dot(w) - rf) / var.sqrt())
    };

    let mut w = project_capped_simplex(&Array1::from_elem(n, 1.0 / n as f64), lo, hi, 1.0);
    let mut f = sharpe(&w)
        .ok_or_else(|| BacktestError::numerical("mvo", None, "portfolio variance is zero"))?;
    let mut step = 1.0;

    for _ in 0..MVO_MAX_ITERATIONS {
        let sigma_w = cov.dot(&w);
        let var = w.dot(&sigma_w);
        let sd = var.sqrt();
        let excess = mu.dot(&w) - rf;
        let grad = &mu / sd - &sigma_w * (excess / (var * sd));

        let mut t = step;
        let accepted = loop {
            let candidate = project_capped_simplex(&(&w + &(&grad * t)), lo, hi, 1.0);
            let d = &candidate - &w;
            if d.iter().all(|x| x.abs() < 1e-12) {
                break None;
            }
            if let Some(fc) = sharpe(&candidate) {
                if fc >= f + 1e-4 * grad.dot(&d) {
                    break Some((candidate, fc));
                }
            }
            t *= 0.5;
            if t < 1e-20 {
                break None;
            }
        };

        match accepted {
            None => return Ok(w),
            Some((candidate, fc)) => {
                let moved = (&candidate - &w).iter().fold(0.0f64, |m, x| m.max(x.abs()));
                let gain = fc - f;
                w = candidate;
                f = fc;
                if moved < 1e-10 && gain.abs() < 1e-14 {
                    return Ok(w);
                }
                step = (t * 2.0).min(1e6);
            }
        }
    }

    Err(BacktestError::numerical(
        "mvo",
        None,
        format!("no solution after {} iterations", MVO_MAX_ITERATIONS),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskParityMethod {
    #[default]
    Ccd,
    Newton,
}

//equal risk contribution weights (or risk budgets when given)
pub fn risk_parity(
    cov: &Array2<f64>,
    risk_budget: Option<&Array1<f64>>,
    initial: Option<&Array1<f64>>,
    method: RiskParityMethod,
    maximum_iterations: usize,
    tolerance: f64,
) -> Result<Array1<f64>> {
    let n = cov.nrows();
    if n == 0 {
        return Ok(Array1::zeros(0));
    }
    if cov.diag().iter().any(|v| *v <= 0.0 || !v.is_finite()) {
        return Err(BacktestError::numerical(
            "erc",
            None,
            "covariance has a non-positive variance",
        ));
    }

    let b = risk_budget
        .cloned()
        .unwrap_or_else(|| Array1::from_elem(n, 1.0 / n as f64));
    let x0 = initial
        .cloned()
        .unwrap_or_else(|| Array1::from_elem(n, 1.0 / n as f64));

    match method {
        RiskParityMethod::Ccd => erc_ccd(x0, cov, &b, maximum_iterations, tolerance),
        RiskParityMethod::Newton => erc_newton(x0, cov, &b, maximum_iterations, tolerance),
    }
}

//cyclical coordinate descent (griveau-billion et al)
fn erc_ccd(
    mut x0: Array1<f64>,
    cov: &Array2<f64>,
    b: &Array1<f64>,
    maximum_iterations: usize,
    tolerance: f64,
) -> Result<Array1<f64>> {
    let n = x0.len();
    let mut x = x0.clone();
    let var = cov.diag().to_owned();
    let mut ctr = cov.dot(&x);
    let mut sigma_x = x.dot(&ctr).sqrt();

    for _ in 0..maximum_iterations {
        for i in 0..n {
            let alpha = var[i];
            let beta = ctr[i] - x[i] * alpha;
            let gamma = -b[i] * sigma_x;
            let x_tilde = (-beta + (beta * beta - 4.0 * alpha * gamma).sqrt()) / (2.0 * alpha);
            let x_i = x[i];

            let row = cov.row(i);
            ctr = &ctr - &(&row * x_i) + &(&row * x_tilde);
            let mut s2 = sigma_x * sigma_x - 2.0 * x_i * row.dot(&x) + x_i * x_i * var[i];
            x[i] = x_tilde;
            s2 += 2.0 * x_tilde * row.dot(&x) - x_tilde * x_tilde * var[i];
            sigma_x = s2.max(0.0).sqrt();
        }

        let total = x.sum();
        let change: f64 = (&x - &x0).mapv(|d| (d / total).powi(2)).sum();
        if change < tolerance {
            return Ok(x / total);
        }
        x0 = x.clone();
    }

    Err(BacktestError::numerical(
        "erc",
        None,
        format!("no solution found after {} iterations", maximum_iterations),
    ))
}

//newton's method on min 1/2 y'Sy - sum b ln y, weights are y / sum y
fn erc_newton(
    x0: Array1<f64>,
    cov: &Array2<f64>,
    b: &Array1<f64>,
    maximum_iterations: usize,
    tolerance: f64,
) -> Result<Array1<f64>> {
    let n = x0.len();
    let objective = |y: &Array1<f64>| -> f64 {
        0.5 * y.dot(&cov.dot(y)) - b.iter().zip(y.iter()).map(|(bi, yi)| bi * yi.ln()).sum::<f64>()
    };

    let mut y = x0.mapv(|v| v.max(1e-8));
    for _ in 0..maximum_iterations {
        let grad = cov.dot(&y) - b / &y;
        if grad.iter().map(|g| g * g).sum::<f64>() < tolerance * tolerance {
            return Ok(&y / y.sum());
        }

        let mut hess = cov.clone();
        for i in 0..n {
            hess[[i, i]] += b[i] / (y[i] * y[i]);
        }
        let direction = solve(&hess, &(-&grad)).ok_or_else(|| {
            BacktestError::numerical("erc", None, "singular hessian in newton step")
        })?;

        //stay strictly positive, then backtrack on the objective
        let mut t = 1.0;
        for i in 0..n {
            if direction[i] < 0.0 {
                t = f64::min(t, -0.99 * y[i] / direction[i]);
            }
        }
        let f0 = objective(&y);
        let slope = grad.dot(&direction);
        loop {
            let candidate = &y + &(&direction * t);
            if objective(&candidate) <= f0 + 1e-4 * t * slope || t < 1e-16 {
                y = candidate;
                break;
            }
            t *= 0.5;
        }
    }

    Err(BacktestError::numerical(
        "erc",
        None,
        format!("newton did not converge in {} iterations", maximum_iterations),
    ))
}

//uniform random weights within bounds adding up to total
pub fn random_weights<R: Rng + ?Sized>(
    n: usize,
    bounds: (f64, f64),
    total: f64,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let (low, high) = bounds;
    if n == 0 {
        return Ok(Vec::new());
    }
    if high < low {
        return Err(BacktestError::config(
            "random_weights",
            None,
            "upper bound below lower bound",
        ));
    }
    check_bounds(n, low, high, total)?;

    let mut w = vec![0.0; n];
    let mut tgt = -total;
    for (i, slot) in w.iter_mut().enumerate() {
        let rn = (n - i - 1) as f64;
        let lowb = f64::max(-rn * high - tgt, low);
        let highb = f64::min(-rn * low - tgt, high);
        let rw = if highb > lowb {
            rng.gen_range(lowb..=highb)
        } else {
            lowb
        };
        *slot = rw;
        tgt += rw;
    }
    w.shuffle(rng);
    Ok(w)
}

//caps every weight at `limit`, redistributing the excess pro rata, repeated until it holds
pub fn limit_weights(weights: &IndexMap<String, f64>, limit: f64) -> Result<IndexMap<String, f64>> {
    if weights.is_empty() {
        return Ok(IndexMap::new());
    }
    if 1.0 / limit > weights.len() as f64 {
        return Err(BacktestError::accessor(
            "limit_weights",
            None,
            format!(
                "limit {} is below 1/{} so the weights cannot sum to one",
                limit,
                weights.len()
            ),
        ));
    }
    let sum: f64 = weights.values().sum();
    if (sum * 10.0).round() / 10.0 != 1.0 {
        return Err(BacktestError::accessor(
            "limit_weights",
            None,
            format!("expecting weights that sum to 1, sum is {}", sum),
        ));
    }

    let mut res: IndexMap<String, f64> = weights
        .iter()
        .map(|(k, v)| (k.clone(), (v * 1e4).round() / 1e4))
        .collect();

    loop {
        let excess: f64 = res.values().filter(|v| **v > limit).map(|v| v - limit).sum();
        let ok_sum: f64 = res.values().filter(|v| **v < limit).sum();

        for v in res.values_mut() {
            if *v > limit {
                *v = limit;
            } else if *v < limit && ok_sum != 0.0 {
                *v += *v / ok_sum * excess;
            }
        }

        if !res.values().any(|v| *v > limit) {
            return Ok(res);
        }
    }
}

fn check_bounds(n: usize, lo: f64, hi: f64, total: f64) -> Result<()> {
    let nf = n as f64;
    if nf * hi < total || nf * lo > total {
        return Err(BacktestError::numerical(
            "weights",
            None,
            format!(
                "no solution possible for {} assets with bounds ({}, {}) and total {}",
                n, lo, hi, total
            ),
        ));
    }
    Ok(())
}

//euclidean projection onto {sum w = total, lo <= w <= hi} by bisection on the shift
pub(crate) fn project_capped_simplex(v: &Array1<f64>, lo: f64, hi: f64, total: f64) -> Array1<f64> {
    let clipped_sum = |tau: f64| -> f64 { v.iter().map(|x| (x - tau).clamp(lo, hi)).sum() };

    let max = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = v.iter().cloned().fold(f64::INFINITY, f64::min);
    let mut a = min - hi - 1.0;
    let mut b = max - lo + 1.0;
    for _ in 0..200 {
        let mid = 0.5 * (a + b);
        if clipped_sum(mid) > total {
            a = mid;
        } else {
            b = mid;
        }
    }
    let tau = 0.5 * (a + b);
    v.mapv(|x| (x - tau).clamp(lo, hi))
}

//gaussian elimination with partial pivoting
fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    let mut m = a.clone();
    let mut rhs = b.clone();

    for col in 0..n {
        let pivot = (col..n).max_by(|i, j| {
            m[[*i, col]]
                .abs()
                .partial_cmp(&m[[*j, col]].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if m[[pivot, col]].abs() < 1e-300 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                m.swap([col, k], [pivot, k]);
            }
            rhs.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = m[[row, col]] / m[[col, col]];
            for k in col..n {
                m[[row, k]] -= factor * m[[col, k]];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| m[[row, k]] * x[k]).sum();
        x[row] = (rhs[row] - tail) / m[[row, row]];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn equal_weights_split_evenly() {
        let w = equal_weights(&names(&["a", "b", "c", "d"]));
        assert_eq!(w["c"], 0.25);
        assert!(equal_weights(&[]).is_empty());
    }

    #[test]
    fn inverse_vol_prefers_calm_asset() {
        let r = array![[0.01, 0.02], [-0.01, -0.02], [0.01, 0.02], [-0.01, -0.02]];
        let w = inverse_volatility(&r);
        assert_relative_eq!(w[0], 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(w[1], 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn inverse_vol_zero_vol_is_nan() {
        let r = array![[0.0, 0.02], [0.0, -0.02], [0.0, 0.01]];
        let w = inverse_volatility(&r);
        assert!(w[0].is_nan());
        assert_relative_eq!(w[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn projection_respects_bounds_and_total() {
        let w = project_capped_simplex(&array![0.9, 0.5, -0.2], 0.0, 0.6, 1.0);
        assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-9);
        assert!(w.iter().all(|x| *x >= -1e-12 && *x <= 0.6 + 1e-12));
    }

    #[test]
    fn mean_variance_favours_higher_sharpe() {
        let r = array![
            [0.010, 0.001],
            [0.012, -0.002],
            [0.008, 0.003],
            [0.011, -0.001],
            [0.009, 0.002]
        ];
        let w = mean_variance(&r, (0.0, 1.0), 0.0, CovarianceMethod::Standard).unwrap();
        assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-8);
        assert!(w[0] > w[1]);
    }

    #[test]
    fn mean_variance_rejects_infeasible_bounds() {
        let r = array![[0.01, 0.02], [0.02, 0.01], [0.0, 0.03]];
        let err = mean_variance(&r, (0.0, 0.4), 0.0, CovarianceMethod::Standard).unwrap_err();
        assert!(matches!(err, BacktestError::Numerical { .. }));
    }

    #[test]
    fn erc_equalises_risk_contributions() {
        let cov = array![[0.04, 0.006, 0.0], [0.006, 0.09, 0.01], [0.0, 0.01, 0.01]];
        for method in [RiskParityMethod::Ccd, RiskParityMethod::Newton] {
            let w = risk_parity(&cov, None, None, method, 1_000, 1e-12).unwrap();
            assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-9);
            let marginal = cov.dot(&w);
            let contributions: Vec<f64> = (0..3).map(|i| w[i] * marginal[i]).collect();
            for c in &contributions[1..] {
                assert_relative_eq!(*c, contributions[0], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn random_weights_respect_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let w = random_weights(5, (0.05, 0.4), 1.0, &mut rng).unwrap();
            assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            assert!(w.iter().all(|x| *x >= 0.05 - 1e-12 && *x <= 0.4 + 1e-12));
        }
        assert!(random_weights(2, (0.0, 0.4), 1.0, &mut rng).is_err());
    }

    #[test]
    fn limit_weights_redistributes_excess() {
        let mut w = IndexMap::new();
        w.insert("a".to_string(), 0.6);
        w.insert("b".to_string(), 0.3);
        w.insert("c".to_string(), 0.1);
        let limited = limit_weights(&w, 0.5).unwrap();
        assert_relative_eq!(limited["a"], 0.5, epsilon = 1e-12);
        assert_relative_eq!(limited["b"], 0.375, epsilon = 1e-12);
        assert_relative_eq!(limited["c"], 0.125, epsilon = 1e-12);
    }

    #[test]
    fn limit_below_one_over_n_is_rejected() {
        let w = equal_weights(&names(&["a", "b"]));
        let err = limit_weights(&w, 0.3).unwrap_err();
        assert!(matches!(err, BacktestError::Accessor { .. }));
    }
}
