use crate::risk::{ewm_weights, Decay, History, RiskEngine};
use chrono::NaiveDate;
use ndarray::{Array1, Array2, ArrayView1};

//rolling sum of log returns
#[derive(Debug, Clone)]
pub struct LogReturnEngine {
    history: History,
}

impl LogReturnEngine {
    pub fn new(window: usize) -> Self {
        LogReturnEngine {
            history: History::new(Some(window)),
        }
    }
}

impl RiskEngine for LogReturnEngine {
    fn assign(&mut self, date: NaiveDate, returns: ArrayView1<f64>, annualize_factor: f64) {
        self.history.push(date, returns, annualize_factor);
    }

    fn reset_engine(&mut self) {
        self.history.clear();
    }

    fn is_ready(&self) -> bool {
        self.history.is_full()
    }

    fn estimate(&self) -> Array1<f64> {
        self.history
            .per_column(|r| r.iter().map(|x| x.ln_1p()).sum())
    }

    fn window(&self) -> Array2<f64> {
        self.history.to_array()
    }

    fn observations(&self) -> usize {
        self.history.len()
    }
}

//rolling sum of simple returns
#[derive(Debug, Clone)]
pub struct SimpleExpEngine {
    history: History,
}

impl SimpleExpEngine {
    pub fn new(window: usize) -> Self {
        SimpleExpEngine {
            history: History::new(Some(window)),
        }
    }
}

impl RiskEngine for SimpleExpEngine {
    fn assign(&mut self, date: NaiveDate, returns: ArrayView1<f64>, annualize_factor: f64) {
        self.history.push(date, returns, annualize_factor);
    }

    fn reset_engine(&mut self) {
        self.history.clear();
    }

    fn is_ready(&self) -> bool {
        self.history.is_full()
    }

    fn estimate(&self) -> Array1<f64> {
        self.history.per_column(|r| r.iter().sum())
    }

    fn window(&self) -> Array2<f64> {
        self.history.to_array()
    }

    fn observations(&self) -> usize {
        self.history.len()
    }
}

//compounded return, over the full history when no window is set
//with geo_base the estimate is the geometric mean per period instead
#[derive(Debug, Clone)]
pub struct CumProdEngine {
    history: History,
    geo_base: bool,
}

impl CumProdEngine {
    pub fn new(window: Option<usize>, geo_base: bool) -> Self {
        CumProdEngine {
            history: History::new(window),
            geo_base,
        }
    }
}

impl RiskEngine for CumProdEngine {
    fn assign(&mut self, date: NaiveDate, returns: ArrayView1<f64>, annualize_factor: f64) {
        self.history.push(date, returns, annualize_factor);
    }

    fn reset_engine(&mut self) {
        self.history.clear();
    }

    fn is_ready(&self) -> bool {
        self.history.is_full()
    }

    fn estimate(&self) -> Array1<f64> {
        let geo_base = self.geo_base;
        self.history.per_column(|r| {
            let growth: f64 = r.iter().map(|x| 1.0 + x).product();
            if geo_base {
                growth.powf(1.0 / r.len() as f64) - 1.0
            } else {
                growth - 1.0
            }
        })
    }

    fn window(&self) -> Array2<f64> {
        self.history.to_array()
    }

    fn observations(&self) -> usize {
        self.history.len()
    }
}

//exponentially weighted mean of log returns over the whole run
#[derive(Debug, Clone)]
pub struct LogEwmaEngine {
    history: History,
    alpha: f64,
    means: Vec<f64>,
}

impl LogEwmaEngine {
    pub fn new(decay: Decay) -> Self {
        LogEwmaEngine {
            history: History::new(Some(1)),
            alpha: decay.alpha(),
            means: Vec::new(),
        }
    }
}

impl RiskEngine for LogEwmaEngine {
    fn assign(&mut self, date: NaiveDate, returns: ArrayView1<f64>, annualize_factor: f64) {
        if !self.history.push(date, returns, annualize_factor) {
            return;
        }
        if self.means.len() != returns.len() {
            self.means.resize(returns.len(), f64::NAN);
        }
        for (mean, r) in self.means.iter_mut().zip(returns.iter()) {
            if r.is_nan() {
                continue;
            }
            let x = r.ln_1p();
            *mean = if mean.is_nan() {
                x
            } else {
                self.alpha * x + (1.0 - self.alpha) * *mean
            };
        }
    }

    //means are kept, only the last observation is dropped
    fn reset_engine(&mut self) {
        self.history.clear();
    }

    fn is_ready(&self) -> bool {
        self.means.iter().any(|m| !m.is_nan())
    }

    fn estimate(&self) -> Array1<f64> {
        Array1::from_vec(self.means.clone())
    }

    fn window(&self) -> Array2<f64> {
        self.history.to_array()
    }

    fn observations(&self) -> usize {
        self.history.len()
    }
}

//exponentially weighted mean of log returns over a bounded window
#[derive(Debug, Clone)]
pub struct RollingLogEwmaEngine {
    history: History,
    alpha: f64,
}

impl RollingLogEwmaEngine {
    pub fn new(window: usize, decay: Decay) -> Self {
        RollingLogEwmaEngine {
            history: History::new(Some(window)),
            alpha: decay.alpha(),
        }
    }
}

impl RiskEngine for RollingLogEwmaEngine {
    fn assign(&mut self, date: NaiveDate, returns: ArrayView1<f64>, annualize_factor: f64) {
        self.history.push(date, returns, annualize_factor);
    }

    fn reset_engine(&mut self) {
        self.history.clear();
    }

    fn is_ready(&self) -> bool {
        self.history.is_full()
    }

    fn estimate(&self) -> Array1<f64> {
        let alpha = self.alpha;
        self.history.per_column(|r| {
            let weights = ewm_weights(r.len(), alpha);
            r.iter().zip(weights).map(|(x, w)| w * x.ln_1p()).sum()
        })
    }

    fn window(&self) -> Array2<f64> {
        self.history.to_array()
    }

    fn observations(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn log_return_needs_full_window() {
        let mut engine = LogReturnEngine::new(2);
        engine.assign(day(1), array![0.1].view(), 252.0);
        assert!(!engine.is_ready());
        engine.assign(day(2), array![-0.05].view(), 252.0);
        assert!(engine.is_ready());
        assert_relative_eq!(engine.estimate()[0], (1.1f64 * 0.95).ln(), epsilon = 1e-12);
    }

    #[test]
    fn cum_prod_full_history_and_geometric() {
        let mut total = CumProdEngine::new(None, false);
        let mut geo = CumProdEngine::new(None, true);
        for (d, r) in [(1, 0.1), (2, 0.1)] {
            total.assign(day(d), array![r].view(), 252.0);
            geo.assign(day(d), array![r].view(), 252.0);
        }
        assert_relative_eq!(total.estimate()[0], 0.21, epsilon = 1e-12);
        assert_relative_eq!(geo.estimate()[0], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn ewma_survives_reset() {
        let mut engine = LogEwmaEngine::new(Decay::Span(3));
        engine.assign(day(1), array![0.0].view(), 252.0);
        engine.assign(day(2), array![(1.0f64).exp_m1()].view(), 252.0);
        assert_relative_eq!(engine.estimate()[0], 0.5, epsilon = 1e-12);

        engine.reset_engine();
        assert!(engine.is_ready());
        assert_eq!(engine.observations(), 0);
        assert_relative_eq!(engine.estimate()[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn rolling_ewma_weights_recent_more() {
        let mut engine = RollingLogEwmaEngine::new(2, Decay::Span(3));
        engine.assign(day(1), array![0.0].view(), 252.0);
        engine.assign(day(2), array![(1.0f64).exp_m1()].view(), 252.0);
        //weights 1/3 and 2/3
        assert_relative_eq!(engine.estimate()[0], 2.0 / 3.0, epsilon = 1e-12);
    }
}
