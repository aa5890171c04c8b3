use crate::error::{BacktestError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CovarianceMethod {
    #[default]
    Standard,
    LedoitWolf,
}

impl CovarianceMethod {
    pub fn estimate(self, returns: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            CovarianceMethod::Standard => sample_covariance(returns, 1),
            CovarianceMethod::LedoitWolf => ledoit_wolf(returns),
        }
    }
}

impl FromStr for CovarianceMethod {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standard" => Ok(CovarianceMethod::Standard),
            "ledoit-wolf" | "ledoit_wolf" => Ok(CovarianceMethod::LedoitWolf),
            other => Err(BacktestError::accessor(
                "covariance",
                None,
                format!("unsupported covariance method '{}'", other),
            )),
        }
    }
}

impl fmt::Display for CovarianceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovarianceMethod::Standard => write!(f, "standard"),
            CovarianceMethod::LedoitWolf => write!(f, "ledoit-wolf"),
        }
    }
}

//simple returns between consecutive price rows, rows with any NaN are dropped
pub fn returns_from_prices(prices: &Array2<f64>) -> Array2<f64> {
    let (rows, cols) = prices.dim();
    let mut kept: Vec<f64> = Vec::new();
    let mut count = 0;

    for t in 1..rows {
        let row: Vec<f64> = (0..cols)
            .map(|c| prices[[t, c]] / prices[[t - 1, c]] - 1.0)
            .collect();
        if row.iter().all(|x| x.is_finite()) {
            kept.extend(row);
            count += 1;
        }
    }

    Array2::from_shape_vec((count, cols), kept).unwrap_or_else(|_| Array2::zeros((0, cols)))
}

//sample covariance with the given delta degrees of freedom
pub fn sample_covariance(returns: &Array2<f64>, ddof: usize) -> Result<Array2<f64>> {
    let n = returns.nrows();
    if n <= ddof {
        return Err(BacktestError::numerical(
            "covariance",
            None,
            format!("{} observations are not enough for ddof {}", n, ddof),
        ));
    }
    let centered = center(returns);
    Ok(centered.t().dot(&centered) / (n - ddof) as f64)
}

//ledoit-wolf shrinkage toward a scaled identity
pub fn ledoit_wolf(returns: &Array2<f64>) -> Result<Array2<f64>> {
    let (n, p) = returns.dim();
    if n == 0 || p == 0 {
        return Err(BacktestError::numerical(
            "covariance",
            None,
            "ledoit-wolf needs at least one observation",
        ));
    }

    let x = center(returns);
    let nf = n as f64;
    let pf = p as f64;
    let emp_cov = x.t().dot(&x) / nf;

    let x2 = x.mapv(|v| v * v);
    let emp_cov_trace = x2.sum_axis(Axis(0)) / nf;
    let mu = emp_cov_trace.sum() / pf;

    let beta_ = x2.t().dot(&x2).sum();
    let delta_ = x.t().dot(&x).mapv(|v| v * v).sum() / (nf * nf);

    let beta = (beta_ / nf - delta_) / (pf * nf);
    let delta = (delta_ - 2.0 * mu * emp_cov_trace.sum() + pf * mu * mu) / pf;
    let beta = beta.min(delta);
    let shrinkage = if beta == 0.0 { 0.0 } else { beta / delta };

    let mut shrunk = emp_cov * (1.0 - shrinkage);
    for i in 0..p {
        shrunk[[i, i]] += shrinkage * mu;
    }
    Ok(shrunk)
}

//annualised predicted tracking error of a weight difference
pub fn predicted_tracking_error(diff: &Array1<f64>, cov: &Array2<f64>, annualization: f64) -> f64 {
    (diff.dot(&cov.dot(diff)) * annualization).max(0.0).sqrt()
}

fn center(returns: &Array2<f64>) -> Array2<f64> {
    match returns.mean_axis(Axis(0)) {
        Some(mean) => returns - &mean,
        None => returns.clone(),
    }
}
