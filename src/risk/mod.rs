pub mod registry;
pub mod returns;
pub mod variance;

pub use registry::EngineRegistry;
pub use returns::{CumProdEngine, LogEwmaEngine, LogReturnEngine, RollingLogEwmaEngine, SimpleExpEngine};
pub use variance::{
    LogNormalEwmaEngine, LogNormalVolEngine, RollingLogNormalEwmaEngine, SimpleVolEngine,
    WindowLogNormalVolEngine,
};

use chrono::NaiveDate;
use ndarray::{Array1, Array2, ArrayView1};
use statrs::statistics::Statistics;
use std::collections::VecDeque;
use std::fmt;

//stateful estimator fed one vector of simple returns per date
pub trait RiskEngine: Send + Sync + fmt::Debug {
    //consumes one observation, repeated dates and all-NaN rows are ignored
    fn assign(&mut self, date: NaiveDate, returns: ArrayView1<f64>, annualize_factor: f64);

    //drops the rolling history, exponential means survive
    fn reset_engine(&mut self);

    fn is_ready(&self) -> bool;

    //current estimate per column, NaN where a column has no data
    fn estimate(&self) -> Array1<f64>;

    //retained simple-return observations, one row per date
    fn window(&self) -> Array2<f64>;

    fn observations(&self) -> usize;
}

//exponential decay parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decay {
    HalfLife(f64),
    Span(usize),
}

impl Decay {
    pub fn alpha(self) -> f64 {
        match self {
            Decay::HalfLife(h) => 1.0 - (0.5f64.ln() / h).exp(),
            Decay::Span(s) => 2.0 / (s as f64 + 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngineKind {
    LogReturn,
    SimpleExp,
    CumProd,
    LogEwma,
    RollingLogEwma,
    LogNormalVol,
    WindowLogNormalVol,
    LogNormalEwma,
    RollingLogNormalEwma,
    SimpleVol,
}

//identity of an engine, two algos asking for the same key share one estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineKey {
    pub kind: EngineKind,
    pub window: Option<usize>,
    //f64 bits so the key stays hashable
    pub half_life: Option<u64>,
    pub span: Option<usize>,
    pub ddof: usize,
    pub geo_base: bool,
}

impl EngineKey {
    fn plain(kind: EngineKind) -> Self {
        EngineKey {
            kind,
            window: None,
            half_life: None,
            span: None,
            ddof: 0,
            geo_base: false,
        }
    }

    fn with_decay(mut self, decay: Decay) -> Self {
        match decay {
            Decay::HalfLife(h) => self.half_life = Some(h.to_bits()),
            Decay::Span(s) => self.span = Some(s),
        }
        self
    }

    pub fn log_return(window: usize) -> Self {
        EngineKey {
            window: Some(window),
            ..EngineKey::plain(EngineKind::LogReturn)
        }
    }

    pub fn simple_exp(window: usize) -> Self {
        EngineKey {
            window: Some(window),
            ..EngineKey::plain(EngineKind::SimpleExp)
        }
    }

    pub fn cum_prod(window: Option<usize>, geo_base: bool) -> Self {
        EngineKey {
            window,
            geo_base,
            ..EngineKey::plain(EngineKind::CumProd)
        }
    }

    pub fn log_ewma(decay: Decay) -> Self {
        EngineKey::plain(EngineKind::LogEwma).with_decay(decay)
    }

    pub fn rolling_log_ewma(window: usize, decay: Decay) -> Self {
        EngineKey {
            window: Some(window),
            ..EngineKey::plain(EngineKind::RollingLogEwma)
        }
        .with_decay(decay)
    }

    pub fn log_normal_vol(ddof: usize) -> Self {
        EngineKey {
            ddof,
            ..EngineKey::plain(EngineKind::LogNormalVol)
        }
    }

    pub fn window_log_normal_vol(window: usize, ddof: usize) -> Self {
        EngineKey {
            window: Some(window),
            ddof,
            ..EngineKey::plain(EngineKind::WindowLogNormalVol)
        }
    }

    pub fn log_normal_ewma(decay: Decay) -> Self {
        EngineKey::plain(EngineKind::LogNormalEwma).with_decay(decay)
    }

    pub fn rolling_log_normal_ewma(window: usize, decay: Decay) -> Self {
        EngineKey {
            window: Some(window),
            ..EngineKey::plain(EngineKind::RollingLogNormalEwma)
        }
        .with_decay(decay)
    }

    pub fn simple_vol(window: usize, ddof: usize) -> Self {
        EngineKey {
            window: Some(window),
            ddof,
            ..EngineKey::plain(EngineKind::SimpleVol)
        }
    }

    pub fn decay(&self) -> Decay {
        match (self.half_life, self.span) {
            (Some(bits), _) => Decay::HalfLife(f64::from_bits(bits)),
            (None, Some(span)) => Decay::Span(span),
            (None, None) => Decay::Span(1),
        }
    }

    //instantiates the estimator described by this key
    pub fn build(&self) -> Box<dyn RiskEngine> {
        let window = self.window.unwrap_or(1).max(1);
        match self.kind {
            EngineKind::LogReturn => Box::new(LogReturnEngine::new(window)),
            EngineKind::SimpleExp => Box::new(SimpleExpEngine::new(window)),
            EngineKind::CumProd => Box::new(CumProdEngine::new(self.window, self.geo_base)),
            EngineKind::LogEwma => Box::new(LogEwmaEngine::new(self.decay())),
            EngineKind::RollingLogEwma => Box::new(RollingLogEwmaEngine::new(window, self.decay())),
            EngineKind::LogNormalVol => Box::new(LogNormalVolEngine::new(self.ddof)),
            EngineKind::WindowLogNormalVol => {
                Box::new(WindowLogNormalVolEngine::new(window, self.ddof))
            }
            EngineKind::LogNormalEwma => Box::new(LogNormalEwmaEngine::new(self.decay())),
            EngineKind::RollingLogNormalEwma => {
                Box::new(RollingLogNormalEwmaEngine::new(window, self.decay()))
            }
            EngineKind::SimpleVol => Box::new(SimpleVolEngine::new(window, self.ddof)),
        }
    }
}

//dated observation buffer shared by every engine, bounded when a capacity is set
#[derive(Debug, Clone, Default)]
pub(crate) struct History {
    capacity: Option<usize>,
    rows: VecDeque<Array1<f64>>,
    last_date: Option<NaiveDate>,
    width: usize,
    pub(crate) annualize_factor: f64,
}

impl History {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        History {
            capacity,
            annualize_factor: 1.0,
            ..History::default()
        }
    }

    //returns false when the observation was ignored
    pub(crate) fn push(&mut self, date: NaiveDate, row: ArrayView1<f64>, factor: f64) -> bool {
        if self.last_date == Some(date) || row.iter().all(|x| x.is_nan()) {
            return false;
        }
        self.last_date = Some(date);
        self.width = row.len();
        self.annualize_factor = factor;
        self.rows.push_back(row.to_owned());
        if let Some(cap) = self.capacity {
            while self.rows.len() > cap {
                self.rows.pop_front();
            }
        }
        true
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn width(&self) -> usize {
        self.width
    }

    pub(crate) fn is_full(&self) -> bool {
        match self.capacity {
            Some(cap) => self.rows.len() >= cap,
            None => !self.rows.is_empty(),
        }
    }

    //non-NaN observations of a column, oldest first
    pub(crate) fn column(&self, col: usize) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|r| r.get(col).copied())
            .filter(|x| !x.is_nan())
            .collect()
    }

    pub(crate) fn to_array(&self) -> Array2<f64> {
        let mut out = Array2::from_elem((self.rows.len(), self.width), f64::NAN);
        for (i, row) in self.rows.iter().enumerate() {
            for (j, x) in row.iter().enumerate().take(self.width) {
                out[[i, j]] = *x;
            }
        }
        out
    }

    //applies f to the non-NaN history of every column
    pub(crate) fn per_column<F>(&self, f: F) -> Array1<f64>
    where
        F: Fn(&[f64]) -> f64,
    {
        Array1::from_iter((0..self.width).map(|col| {
            let values = self.column(col);
            if values.is_empty() {
                f64::NAN
            } else {
                f(&values)
            }
        }))
    }
}

//sample or population variance of a slice
pub(crate) fn variance(values: &[f64], ddof: usize) -> f64 {
    let n = values.len();
    if n <= ddof {
        return f64::NAN;
    }
    match ddof {
        0 => values.population_variance(),
        1 => values.variance(),
        _ => {
            let mean = values.mean();
            values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - ddof) as f64
        }
    }
}

//decay weights for n observations, newest last, normalised to one
pub(crate) fn ewm_weights(n: usize, alpha: f64) -> Vec<f64> {
    let raw: Vec<f64> = (0..n).map(|k| (1.0 - alpha).powi((n - 1 - k) as i32)).collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}
