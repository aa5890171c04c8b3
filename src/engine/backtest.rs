use crate::algos::Algo;
use crate::data::{AdditionalData, Panel, TransactionRecord};
use crate::error::{BacktestError, Result};
use crate::metrics::{calculate_equity_curve, EquityPoint, PerformanceStats};
use crate::risk::EngineRegistry;
use crate::tree::{Commission, Node, NodeId, StrategySpec, Tree};
use chrono::NaiveDate;
use indexmap::IndexMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

//engine level settings of a backtest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub integer_positions: bool,
    //periods per year of the date axis
    pub annualization_factor: f64,
    //annual rate, used by the stats and by mean-variance weighting
    pub risk_free_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 1_000_000.0,
            integer_positions: true,
            annualization_factor: 252.0,
            risk_free_rate: 0.0,
        }
    }
}

//snapshot of a finished backtest, every frame is on the padded axis
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub name: String,
    pub stats: PerformanceStats,
    pub equity_curve: Vec<EquityPoint>,
    pub prices: Panel,
    pub weights: Panel,
    pub security_weights: Panel,
    pub positions: Panel,
    pub turnover: Vec<f64>,
    pub herfindahl: Vec<f64>,
    pub transactions: Vec<TransactionRecord>,
    pub bankrupt: bool,
}

//a strategy tree evolved over a price panel
#[derive(Debug)]
pub struct Backtest {
    name: String,
    config: BacktestConfig,
    tree: Tree,
    engines: EngineRegistry,
    has_run: bool,
}

impl Backtest {
    //validates and pads the panels, builds the tree and registers every
    //engine the algo stacks ask for
    pub fn new(
        strategy: StrategySpec,
        prices: Panel,
        data: AdditionalData,
        config: BacktestConfig,
    ) -> Result<Self> {
        let name = strategy.name.clone();
        if prices.is_empty() || prices.width() == 0 {
            return Err(BacktestError::config(&name, None, "price panel is empty"));
        }

        let data = Arc::new(data.align(&prices)?);
        let padded = Arc::new(prices.with_seed_row());
        let tree = Tree::build(strategy, padded, data, config.integer_positions)?;

        let mut engines = EngineRegistry::new(config.annualization_factor);
        for (_, node) in tree.nodes() {
            if let Some(state) = node.strategy() {
                for key in state.stack.engine_keys() {
                    if engines.register(key) {
                        debug!(strategy = %node.full_name, kind = ?key.kind, "registered engine");
                    }
                }
            }
        }

        Ok(Backtest {
            name,
            config,
            tree,
            engines,
            has_run: false,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    //installs the commission on the root and every child strategy
    pub fn with_commission(mut self, commission: Commission) -> Self {
        let root = self.tree.root();
        self.tree.set_commissions(root, commission);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    //padded date axis, row 0 is the seed row
    pub fn dates(&self) -> &[NaiveDate] {
        self.tree.dates()
    }

    pub fn has_run(&self) -> bool {
        self.has_run
    }

    pub fn is_bankrupt(&self) -> bool {
        self.tree.is_bankrupt()
    }

    //runs the per-date protocol over every real date
    pub fn run(&mut self) -> Result<()> {
        if self.has_run {
            return Err(BacktestError::config(&self.name, None, "backtest has already run"));
        }
        self.has_run = true;

        let root = self.tree.root();
        let dates = self.tree.dates().to_vec();
        info!(
            backtest = %self.name,
            start = %dates[1],
            end = %dates[dates.len() - 1],
            capital = self.config.initial_capital,
            "starting backtest"
        );

        self.tree.adjust(root, self.config.initial_capital, true, 0.0)?;
        self.tree.pre_settlement(dates[0], 0)?;

        for (inow, date) in dates.iter().copied().enumerate().skip(1) {
            if !self.engines.is_empty() {
                let returns = self.return_row(inow);
                self.engines.assign(date, returns.view());
            }

            let was_bankrupt = self.tree.is_bankrupt();
            self.tree.pre_settlement(date, inow)?;
            if !self.tree.is_bankrupt() {
                self.tree.run_strategy(root, &self.engines)?;
                self.tree.post_settlement()?;
            } else if !was_bankrupt {
                //persist the liquidation trades once
                self.tree.post_settlement()?;
            }

            let node = self.tree.node(root);
            trace!(backtest = %self.name, %date, value = node.value, price = node.price, "tick");
        }

        let node = self.tree.node(root);
        if self.tree.is_bankrupt() {
            warn!(backtest = %self.name, value = node.value, "backtest finished bankrupt");
        }
        info!(
            backtest = %self.name,
            value = node.value,
            price = node.price,
            "backtest finished"
        );
        Ok(())
    }

    //simple returns of every panel column between row-1 and row
    fn return_row(&self, row: usize) -> Array1<f64> {
        let prices = self.tree.prices();
        Array1::from_iter(
            (0..prices.width()).map(|c| prices.value(row, c) / prices.value(row - 1, c) - 1.0),
        )
    }

    //node by full name ("root>child>leaf")
    pub fn node(&self, full_name: &str) -> Result<&Node> {
        self.tree
            .find(full_name)
            .map(|id| self.tree.node(id))
            .ok_or_else(|| BacktestError::accessor(&self.name, None, format!("no node named '{}'", full_name)))
    }

    //root price index
    pub fn prices(&self) -> &[f64] {
        &self.tree.node(self.tree.root()).prices
    }

    //root values
    pub fn values(&self) -> &[f64] {
        &self.tree.node(self.tree.root()).values
    }

    fn frame(&self, columns: IndexMap<String, Vec<f64>>) -> Result<Panel> {
        Panel::from_columns(self.dates().to_vec(), columns.into_iter().collect())
    }

    fn root_ratio(&self, numerators: &[f64]) -> Vec<f64> {
        numerators
            .iter()
            .zip(self.values())
            .map(|(v, total)| if *total == 0.0 { f64::NAN } else { v / total })
            .collect()
    }

    //price index of every strategy node
    pub fn strategy_prices(&self) -> Result<Panel> {
        let columns = self
            .tree
            .nodes()
            .filter(|(_, node)| node.is_strategy())
            .map(|(_, node)| (node.full_name.clone(), node.prices.clone()))
            .collect();
        self.frame(columns)
    }

    //value of every member over the root value
    pub fn weights(&self) -> Result<Panel> {
        let columns = self
            .tree
            .members(self.tree.root())
            .into_iter()
            .map(|id| {
                let node = self.tree.node(id);
                (node.full_name.clone(), self.root_ratio(&node.values))
            })
            .collect();
        self.frame(columns)
    }

    //security weights aggregated by name across the tree
    pub fn security_weights(&self) -> Result<Panel> {
        let columns = self
            .by_security_name(|node| node.values.clone())
            .into_iter()
            .map(|(name, values)| (name, self.root_ratio(&values)))
            .collect();
        self.frame(columns)
    }

    //positions aggregated by security name
    pub fn positions(&self) -> Result<Panel> {
        let columns = self.by_security_name(|node| {
            node.security()
                .map(|s| s.positions.clone())
                .unwrap_or_default()
        });
        self.frame(columns)
    }

    fn by_security_name<F>(&self, series: F) -> IndexMap<String, Vec<f64>>
    where
        F: Fn(&Node) -> Vec<f64>,
    {
        let n = self.dates().len();
        let mut out: IndexMap<String, Vec<f64>> = IndexMap::new();
        for id in self.tree.securities(self.tree.root()) {
            let node = self.tree.node(id);
            let entry = out.entry(node.name.clone()).or_insert_with(|| vec![0.0; n]);
            for (acc, x) in entry.iter_mut().zip(series(node)) {
                *acc += x;
            }
        }
        out
    }

    //min(bought, sold) over the root value, per row
    pub fn turnover(&self) -> Vec<f64> {
        let n = self.dates().len();
        let mut bought = vec![0.0; n];
        let mut sold = vec![0.0; n];
        for id in self.securities() {
            if let Some(sec) = self.tree.node(id).security() {
                for (t, outlay) in sec.outlays.iter().enumerate() {
                    if *outlay > 0.0 {
                        bought[t] += outlay;
                    } else {
                        sold[t] += outlay;
                    }
                }
            }
        }
        let traded: Vec<f64> = bought
            .iter()
            .zip(&sold)
            .map(|(b, s)| b.min(s.abs()))
            .collect();
        self.root_ratio(&traded)
    }

    //sum of squared security weights, per row
    pub fn herfindahl_index(&self) -> Result<Vec<f64>> {
        let weights = self.security_weights()?;
        Ok((0..weights.len())
            .map(|row| weights.row(row).iter().map(|w| w * w).sum())
            .collect())
    }

    fn securities(&self) -> Vec<NodeId> {
        self.tree.securities(self.tree.root())
    }

    //trades derived from position changes, grouped by security in date order
    //
    //with bid/offer tracking the price carries the bid/offer paid per unit
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        let dates = self.dates();
        let tracking = self.tree.data().tracks_bidoffer();
        let mut records = Vec::new();

        for id in self.securities() {
            let node = self.tree.node(id);
            let Some(sec) = node.security() else {
                continue;
            };
            for t in 1..dates.len() {
                let quantity = sec.positions[t] - sec.positions[t - 1];
                if quantity == 0.0 {
                    continue;
                }
                let mut price = node.prices[t];
                if tracking {
                    price += sec.bidoffers_paid[t] / quantity;
                }
                records.push(TransactionRecord {
                    date: dates[t],
                    security: node.name.clone(),
                    quantity,
                    price,
                });
            }
        }

        records.sort_by(|a, b| a.security.cmp(&b.security).then_with(|| a.date.cmp(&b.date)));
        records
    }

    //bid/offer paid by the root, only available when bid/offer is tracked
    pub fn bidoffers_paid(&self) -> Result<&[f64]> {
        if !self.tree.data().tracks_bidoffer() {
            return Err(BacktestError::accessor(
                &self.name,
                None,
                "bid/offer is not tracked, provide a bidoffer panel",
            ));
        }
        Ok(&self.tree.strategy_state(self.tree.root())?.bidoffers_paid)
    }

    pub fn stats(&self) -> Result<PerformanceStats> {
        if !self.has_run {
            return Err(BacktestError::accessor(&self.name, None, "backtest has not run"));
        }
        Ok(PerformanceStats::from_prices(
            &self.name,
            self.dates(),
            self.prices(),
            self.config.risk_free_rate,
            self.config.annualization_factor,
        ))
    }

    pub fn result(&self) -> Result<BacktestResult> {
        let stats = self.stats()?;
        Ok(BacktestResult {
            name: self.name.clone(),
            stats,
            equity_curve: calculate_equity_curve(&self.dates()[1..], &self.prices()[1..]),
            prices: self.strategy_prices()?,
            weights: self.weights()?,
            security_weights: self.security_weights()?,
            positions: self.positions()?,
            turnover: self.turnover(),
            herfindahl: self.herfindahl_index()?,
            transactions: self.transactions(),
            bankrupt: self.is_bankrupt(),
        })
    }
}
