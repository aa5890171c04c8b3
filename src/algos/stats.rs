use crate::algos::{Algo, AlgoContext, ReturnWindow};
use crate::error::Result;
use crate::risk::{Decay, EngineKey};
use indexmap::IndexMap;
use ndarray::{Array1, Array2};

//reads an engine snapshot for the given names, None while the engine warms up
fn engine_window(ctx: &AlgoContext, key: &EngineKey, names: &[String]) -> Result<Option<ReturnWindow>> {
    let engine = ctx
        .engines
        .get(key)
        .ok_or_else(|| ctx.config_error(format!("engine {:?} is not registered", key.kind)))?;
    if !engine.is_ready() {
        return Ok(None);
    }

    let estimate = engine.estimate();
    let window = engine.window();
    let columns: Vec<Option<usize>> = names
        .iter()
        .map(|n| ctx.tree.prices().column_index(n))
        .collect();

    let total: Array1<f64> = columns
        .iter()
        .map(|c| c.and_then(|c| estimate.get(c).copied()).unwrap_or(f64::NAN))
        .collect();
    let observations = Array2::from_shape_fn((window.nrows(), names.len()), |(r, c)| {
        columns[c]
            .filter(|col| *col < window.ncols())
            .map(|col| window[[r, col]])
            .unwrap_or(f64::NAN)
    });

    Ok(Some(ReturnWindow {
        names: names.to_vec(),
        observations,
        total,
    }))
}

fn to_stat(window: &ReturnWindow) -> IndexMap<String, f64> {
    window
        .names
        .iter()
        .cloned()
        .zip(window.total.iter().copied())
        .collect()
}

//runs an engine-backed stat for the candidates
fn run_engine_stat(ctx: &mut AlgoContext, key: &EngineKey) -> Result<bool> {
    let names = ctx.candidates();
    let Some(window) = engine_window(ctx, key, &names)? else {
        return Ok(false);
    };
    ctx.temp.stat = Some(to_stat(&window));
    ctx.temp.returns = Some(window);
    Ok(true)
}

//rolling or exponentially weighted log return per name
#[derive(Debug, Clone)]
pub struct LogReturn {
    key: EngineKey,
}

impl LogReturn {
    pub fn new(window: usize) -> Self {
        LogReturn {
            key: EngineKey::log_return(window),
        }
    }

    pub fn ewma(decay: Decay) -> Self {
        LogReturn {
            key: EngineKey::log_ewma(decay),
        }
    }

    pub fn rolling_ewma(window: usize, decay: Decay) -> Self {
        LogReturn {
            key: EngineKey::rolling_log_ewma(window, decay),
        }
    }
}

impl Algo for LogReturn {
    fn name(&self) -> &str {
        "LogReturn"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        run_engine_stat(ctx, &self.key)
    }

    fn engine_keys(&self) -> Vec<EngineKey> {
        vec![self.key]
    }
}

//rolling sum of simple returns per name
#[derive(Debug, Clone)]
pub struct SimpleReturn {
    key: EngineKey,
}

impl SimpleReturn {
    pub fn new(window: usize) -> Self {
        SimpleReturn {
            key: EngineKey::simple_exp(window),
        }
    }
}

impl Algo for SimpleReturn {
    fn name(&self) -> &str {
        "SimpleReturn"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        run_engine_stat(ctx, &self.key)
    }

    fn engine_keys(&self) -> Vec<EngineKey> {
        vec![self.key]
    }
}

//compounded return per name, full history without a window
#[derive(Debug, Clone)]
pub struct CumProdReturn {
    key: EngineKey,
}

impl CumProdReturn {
    pub fn new(window: Option<usize>) -> Self {
        CumProdReturn {
            key: EngineKey::cum_prod(window, false),
        }
    }

    //geometric mean return per period instead of the total
    pub fn geometric(window: Option<usize>) -> Self {
        CumProdReturn {
            key: EngineKey::cum_prod(window, true),
        }
    }
}

impl Algo for CumProdReturn {
    fn name(&self) -> &str {
        "CumProdReturn"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        run_engine_stat(ctx, &self.key)
    }

    fn engine_keys(&self) -> Vec<EngineKey> {
        vec![self.key]
    }
}

//annualised volatility per name from a variance engine
#[derive(Debug, Clone)]
pub struct Volatility {
    key: EngineKey,
}

impl Volatility {
    pub fn expanding(ddof: usize) -> Self {
        Volatility {
            key: EngineKey::log_normal_vol(ddof),
        }
    }

    pub fn window(window: usize, ddof: usize) -> Self {
        Volatility {
            key: EngineKey::window_log_normal_vol(window, ddof),
        }
    }

    pub fn ewma(decay: Decay) -> Self {
        Volatility {
            key: EngineKey::log_normal_ewma(decay),
        }
    }

    pub fn rolling_ewma(window: usize, decay: Decay) -> Self {
        Volatility {
            key: EngineKey::rolling_log_normal_ewma(window, decay),
        }
    }

    pub fn simple(window: usize, ddof: usize) -> Self {
        Volatility {
            key: EngineKey::simple_vol(window, ddof),
        }
    }
}

impl Algo for Volatility {
    fn name(&self) -> &str {
        "Volatility"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        run_engine_stat(ctx, &self.key)
    }

    fn engine_keys(&self) -> Vec<EngineKey> {
        vec![self.key]
    }
}

//total return over the last `lookback` bars, ending `lag` bars ago
#[derive(Debug, Clone)]
pub struct StatTotalReturn {
    lookback: usize,
    lag: usize,
}

impl StatTotalReturn {
    pub fn new(lookback: usize) -> Self {
        StatTotalReturn { lookback, lag: 0 }
    }

    pub fn with_lag(mut self, lag: usize) -> Self {
        self.lag = lag;
        self
    }
}

impl Algo for StatTotalReturn {
    fn name(&self) -> &str {
        "StatTotalReturn"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let names = ctx.candidates();
        let prices = ctx.price_window(&names, self.lookback + 1, self.lag);
        let rows = prices.nrows();

        let total: Array1<f64> = (0..names.len())
            .map(|c| {
                if rows < 2 {
                    return f64::NAN;
                }
                prices[[rows - 1, c]] / prices[[0, c]] - 1.0
            })
            .collect();
        let observations = Array2::from_shape_fn((rows.saturating_sub(1), names.len()), |(r, c)| {
            prices[[r + 1, c]] / prices[[r, c]] - 1.0
        });

        let window = ReturnWindow {
            names,
            observations,
            total,
        };
        ctx.temp.stat = Some(to_stat(&window));
        ctx.temp.returns = Some(window);
        Ok(true)
    }
}
