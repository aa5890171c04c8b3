use crate::risk::{EngineKey, RiskEngine};
use chrono::NaiveDate;
use indexmap::IndexMap;
use ndarray::ArrayView1;
use tracing::debug;

//owns every engine of one backtest, engines are fed once per date
#[derive(Debug)]
pub struct EngineRegistry {
    engines: IndexMap<EngineKey, Box<dyn RiskEngine>>,
    annualize_factor: f64,
}

impl EngineRegistry {
    pub fn new(annualize_factor: f64) -> Self {
        EngineRegistry {
            engines: IndexMap::new(),
            annualize_factor,
        }
    }

    //registers an engine unless an identical key exists, returns true if created
    pub fn register(&mut self, key: EngineKey) -> bool {
        if self.engines.contains_key(&key) {
            return false;
        }
        debug!(?key, "registering engine");
        self.engines.insert(key, key.build());
        true
    }

    pub fn get(&self, key: &EngineKey) -> Option<&dyn RiskEngine> {
        self.engines.get(key).map(|e| e.as_ref())
    }

    //feeds one return vector to every engine
    pub fn assign(&mut self, date: NaiveDate, returns: ArrayView1<f64>) {
        let factor = self.annualize_factor;
        for engine in self.engines.values_mut() {
            engine.assign(date, returns, factor);
        }
    }

    pub fn reset(&mut self) {
        for engine in self.engines.values_mut() {
            engine.reset_engine();
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &EngineKey> {
        self.engines.keys()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn annualize_factor(&self) -> f64 {
        self.annualize_factor
    }
}
