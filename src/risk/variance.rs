use crate::risk::{ewm_weights, variance, Decay, History, RiskEngine};
use chrono::NaiveDate;
use ndarray::{Array1, Array2, ArrayView1};

//every variance engine reports annualised volatility: sqrt(variance * factor)
fn annualise(var: f64, factor: f64) -> f64 {
    (var * factor).sqrt()
}

fn log_values(r: &[f64]) -> Vec<f64> {
    r.iter().map(|x| x.ln_1p()).collect()
}

//volatility of log returns over the full history
#[derive(Debug, Clone)]
pub struct LogNormalVolEngine {
    history: History,
    ddof: usize,
}

impl LogNormalVolEngine {
    pub fn new(ddof: usize) -> Self {
        LogNormalVolEngine {
            history: History::new(None),
            ddof,
        }
    }
}

impl RiskEngine for LogNormalVolEngine {
    fn assign(&mut self, date: NaiveDate, returns: ArrayView1<f64>, annualize_factor: f64) {
        self.history.push(date, returns, annualize_factor);
    }

    fn reset_engine(&mut self) {
        self.history.clear();
    }

    fn is_ready(&self) -> bool {
        self.history.len() > self.ddof
    }

    fn estimate(&self) -> Array1<f64> {
        let (ddof, factor) = (self.ddof, self.history.annualize_factor);
        self.history
            .per_column(|r| annualise(variance(&log_values(r), ddof), factor))
    }

    fn window(&self) -> Array2<f64> {
        self.history.to_array()
    }

    fn observations(&self) -> usize {
        self.history.len()
    }
}

//volatility of log returns over a rolling window
#[derive(Debug, Clone)]
pub struct WindowLogNormalVolEngine {
    history: History,
    ddof: usize,
}

impl WindowLogNormalVolEngine {
    pub fn new(window: usize, ddof: usize) -> Self {
        WindowLogNormalVolEngine {
            history: History::new(Some(window)),
            ddof,
        }
    }
}

impl RiskEngine for WindowLogNormalVolEngine {
    fn assign(&mut self, date: NaiveDate, returns: ArrayView1<f64>, annualize_factor: f64) {
        self.history.push(date, returns, annualize_factor);
    }

    fn reset_engine(&mut self) {
        self.history.clear();
    }

    fn is_ready(&self) -> bool {
        self.history.is_full() && self.history.len() > self.ddof
    }

    fn estimate(&self) -> Array1<f64> {
        let (ddof, factor) = (self.ddof, self.history.annualize_factor);
        self.history
            .per_column(|r| annualise(variance(&log_values(r), ddof), factor))
    }

    fn window(&self) -> Array2<f64> {
        self.history.to_array()
    }

    fn observations(&self) -> usize {
        self.history.len()
    }
}

//recursive exponentially weighted variance of log returns
#[derive(Debug, Clone)]
pub struct LogNormalEwmaEngine {
    history: History,
    alpha: f64,
    means: Vec<f64>,
    variances: Vec<f64>,
    counts: Vec<usize>,
}

impl LogNormalEwmaEngine {
    pub fn new(decay: Decay) -> Self {
        LogNormalEwmaEngine {
            history: History::new(Some(1)),
            alpha: decay.alpha(),
            means: Vec::new(),
            variances: Vec::new(),
            counts: Vec::new(),
        }
    }
}

impl RiskEngine for LogNormalEwmaEngine {
    fn assign(&mut self, date: NaiveDate, returns: ArrayView1<f64>, annualize_factor: f64) {
        if !self.history.push(date, returns, annualize_factor) {
            return;
        }
        let width = returns.len();
        if self.means.len() != width {
            self.means.resize(width, f64::NAN);
            self.variances.resize(width, 0.0);
            self.counts.resize(width, 0);
        }

        for (col, r) in returns.iter().enumerate() {
            if r.is_nan() {
                continue;
            }
            let x = r.ln_1p();
            if self.counts[col] == 0 {
                self.means[col] = x;
                self.variances[col] = 0.0;
            } else {
                let diff = x - self.means[col];
                let incr = self.alpha * diff;
                self.means[col] += incr;
                self.variances[col] = (1.0 - self.alpha) * (self.variances[col] + diff * incr);
            }
            self.counts[col] += 1;
        }
    }

    //means and variances are kept
    fn reset_engine(&mut self) {
        self.history.clear();
    }

    fn is_ready(&self) -> bool {
        self.counts.iter().any(|c| *c >= 2)
    }

    fn estimate(&self) -> Array1<f64> {
        let factor = self.history.annualize_factor;
        Array1::from_iter(self.variances.iter().zip(&self.counts).map(|(v, c)| {
            if *c >= 2 {
                annualise(*v, factor)
            } else {
                f64::NAN
            }
        }))
    }

    fn window(&self) -> Array2<f64> {
        self.history.to_array()
    }

    fn observations(&self) -> usize {
        self.history.len()
    }
}

//exponentially weighted variance of log returns over a bounded window
#[derive(Debug, Clone)]
pub struct RollingLogNormalEwmaEngine {
    history: History,
    alpha: f64,
}

impl RollingLogNormalEwmaEngine {
    pub fn new(window: usize, decay: Decay) -> Self {
        RollingLogNormalEwmaEngine {
            history: History::new(Some(window)),
            alpha: decay.alpha(),
        }
    }
}

impl RiskEngine for RollingLogNormalEwmaEngine {
    fn assign(&mut self, date: NaiveDate, returns: ArrayView1<f64>, annualize_factor: f64) {
        self.history.push(date, returns, annualize_factor);
    }

    fn reset_engine(&mut self) {
        self.history.clear();
    }

    fn is_ready(&self) -> bool {
        self.history.is_full() && self.history.len() >= 2
    }

    fn estimate(&self) -> Array1<f64> {
        let (alpha, factor) = (self.alpha, self.history.annualize_factor);
        self.history.per_column(|r| {
            if r.len() < 2 {
                return f64::NAN;
            }
            let logs = log_values(r);
            let weights = ewm_weights(logs.len(), alpha);
            let mean: f64 = logs.iter().zip(&weights).map(|(x, w)| w * x).sum();
            let var: f64 = logs
                .iter()
                .zip(&weights)
                .map(|(x, w)| w * (x - mean).powi(2))
                .sum();
            annualise(var, factor)
        })
    }

    fn window(&self) -> Array2<f64> {
        self.history.to_array()
    }

    fn observations(&self) -> usize {
        self.history.len()
    }
}

//volatility of simple returns over a rolling window
#[derive(Debug, Clone)]
pub struct SimpleVolEngine {
    history: History,
    ddof: usize,
}

impl SimpleVolEngine {
    pub fn new(window: usize, ddof: usize) -> Self {
        SimpleVolEngine {
            history: History::new(Some(window)),
            ddof,
        }
    }
}

impl RiskEngine for SimpleVolEngine {
    fn assign(&mut self, date: NaiveDate, returns: ArrayView1<f64>, annualize_factor: f64) {
        self.history.push(date, returns, annualize_factor);
    }

    fn reset_engine(&mut self) {
        self.history.clear();
    }

    fn is_ready(&self) -> bool {
        self.history.is_full() && self.history.len() > self.ddof
    }

    fn estimate(&self) -> Array1<f64> {
        let (ddof, factor) = (self.ddof, self.history.annualize_factor);
        self.history
            .per_column(|r| annualise(variance(r, ddof), factor))
    }

    fn window(&self) -> Array2<f64> {
        self.history.to_array()
    }

    fn observations(&self) -> usize {
        self.history.len()
    }
}
