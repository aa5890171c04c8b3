use crate::algos::{PermData, TempData};
use crate::data::{AdditionalData, Panel};
use crate::error::{BacktestError, Result};
use crate::tree::commission::Commission;
use crate::tree::node::{
    Node, NodeId, NodeKind, NodeSpec, SecurityKind, SecuritySpec, SecurityState, StrategySpec,
    StrategyState, UniverseColumn,
};
use chrono::NaiveDate;
use indexmap::IndexMap;
use ndarray::Array2;
use std::sync::Arc;
use tracing::debug;

//arena holding every node of one backtest, nodes refer to each other by index
#[derive(Debug)]
pub struct Tree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    pub(crate) prices: Arc<Panel>,
    pub(crate) data: Arc<AdditionalData>,
}

impl Tree {
    //builds the tree and installs every series on the padded axis
    //prices and data must already carry the synthetic seed row
    pub fn build(
        spec: StrategySpec,
        prices: Arc<Panel>,
        data: Arc<AdditionalData>,
        integer_positions: bool,
    ) -> Result<Self> {
        let mut tree = Tree {
            nodes: Vec::new(),
            root: NodeId(0),
            prices,
            data,
        };
        tree.root = tree.add_strategy(spec, None, integer_positions)?;
        Ok(tree)
    }

    fn add_strategy(
        &mut self,
        spec: StrategySpec,
        parent: Option<NodeId>,
        integer_positions: bool,
    ) -> Result<NodeId> {
        let n = self.prices.len();
        let full_name = self.full_name_for(&spec.name, parent);

        let state = StrategyState {
            par: spec.par,
            fixed_income: spec.fixed_income,
            bankrupt: false,
            stack: spec.stack,
            temp: TempData::default(),
            perm: PermData::default(),
            commission: parent
                .and_then(|p| self.nodes[p.0].strategy().map(|s| s.commission.clone()))
                .unwrap_or_default(),
            universe: IndexMap::new(),
            net_flows: 0.0,
            last_value: 0.0,
            last_price: spec.par,
            last_notional_value: 0.0,
            last_fee: 0.0,
            accrued: 0.0,
            bidoffer_paid: 0.0,
            cash: vec![0.0; n],
            fees: vec![0.0; n],
            flows: vec![0.0; n],
            bidoffers_paid: vec![0.0; n],
            accrued_interest: vec![0.0; n],
        };

        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: spec.name,
            full_name,
            parent,
            children: IndexMap::new(),
            now: None,
            inow: 0,
            price: spec.par,
            value: 0.0,
            notional_value: 0.0,
            weight: 0.0,
            capital: 0.0,
            integer_positions,
            prices: vec![f64::NAN; n],
            values: vec![0.0; n],
            notional_values: vec![0.0; n],
            kind: NodeKind::Strategy(Box::new(state)),
        });

        let mut universe = IndexMap::new();
        if spec.children.is_empty() {
            //no declared children, the whole panel is tradeable
            for (col, name) in self.prices.columns().enumerate() {
                universe.insert(name.to_string(), UniverseColumn::Panel(col));
            }
        }

        for child in spec.children {
            let name = child.name().to_string();
            if self.nodes[id.0].children.contains_key(&name) {
                return Err(BacktestError::config(
                    &self.nodes[id.0].full_name,
                    None,
                    format!("duplicate child name '{}'", name),
                ));
            }

            let child_id = match child {
                NodeSpec::Strategy(s) => {
                    let cid = self.add_strategy(s, Some(id), integer_positions)?;
                    universe.insert(name.clone(), UniverseColumn::Strategy(cid));
                    cid
                }
                NodeSpec::Security(s) => {
                    let col = self.prices.column_index(&s.name).ok_or_else(|| {
                        BacktestError::config(
                            &self.nodes[id.0].full_name,
                            None,
                            format!("security '{}' has no price column", s.name),
                        )
                    })?;
                    universe.insert(name.clone(), UniverseColumn::Panel(col));
                    self.add_security(&s, id)?
                }
            };
            self.nodes[id.0].children.insert(name, child_id);
        }

        if let Some(state) = self.nodes[id.0].strategy_mut() {
            state.universe = universe;
        }
        Ok(id)
    }

    pub(crate) fn add_security(&mut self, spec: &SecuritySpec, parent: NodeId) -> Result<NodeId> {
        let n = self.prices.len();
        let full_name = self.full_name_for(&spec.name, Some(parent));
        let integer_positions = self.nodes[parent.0].integer_positions;

        let price_series = self
            .prices
            .column(&spec.name)
            .map(|c| c.to_vec())
            .ok_or_else(|| {
                BacktestError::config(&full_name, None, "no price column for security")
            })?;

        let column_or_zero = |panel: &Option<Panel>| -> Vec<f64> {
            panel
                .as_ref()
                .and_then(|p| p.column(&spec.name))
                .map(|c| c.to_vec())
                .unwrap_or_else(|| vec![0.0; n])
        };

        let coupon_series = if spec.kind.pays_coupons() {
            self.data
                .coupons
                .as_ref()
                .and_then(|p| p.column(&spec.name))
                .map(|c| c.to_vec())
                .ok_or_else(|| {
                    BacktestError::config(
                        &full_name,
                        None,
                        "coupon-paying security requires a coupons column",
                    )
                })?
        } else {
            vec![0.0; n]
        };

        let schedule_series = self
            .data
            .payment_schedule
            .as_ref()
            .and_then(|p| p.column(&spec.name))
            .map(|c| c.to_vec());

        let state = SecurityState {
            kind: spec.kind,
            multiplier: spec.multiplier,
            position: 0.0,
            bidoffer: 0.0,
            accrued: 0.0,
            tracks_bidoffer: self.data.tracks_bidoffer(),
            outlay: 0.0,
            bidoffer_paid: 0.0,
            accrued_on: None,
            price_series,
            bidoffer_series: column_or_zero(&self.data.bidoffer),
            coupon_series,
            schedule_series,
            cost_long_series: column_or_zero(&self.data.cost_long),
            cost_short_series: column_or_zero(&self.data.cost_short),
            positions: vec![0.0; n],
            outlays: vec![0.0; n],
            bidoffers: vec![0.0; n],
            bidoffers_paid: vec![0.0; n],
            coupons: vec![0.0; n],
            holding_costs: vec![0.0; n],
            accrued_interest: vec![0.0; n],
        };

        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: spec.name.clone(),
            full_name,
            parent: Some(parent),
            children: IndexMap::new(),
            now: None,
            inow: 0,
            price: f64::NAN,
            value: 0.0,
            notional_value: 0.0,
            weight: 0.0,
            capital: 0.0,
            integer_positions,
            prices: vec![f64::NAN; n],
            values: vec![0.0; n],
            notional_values: vec![0.0; n],
            kind: NodeKind::Security(state),
        });
        Ok(id)
    }

    fn full_name_for(&self, name: &str, parent: Option<NodeId>) -> String {
        match parent {
            Some(p) => format!("{}>{}", self.nodes[p.0].full_name, name),
            None => name.to_string(),
        }
    }

    //returns the child with this name, creating a plain security on demand
    //when the name is a panel column of the strategy's universe
    pub fn ensure_child(&mut self, strategy: NodeId, name: &str) -> Result<NodeId> {
        if let Some(id) = self.nodes[strategy.0].children.get(name) {
            return Ok(*id);
        }

        let column = self
            .strategy_state(strategy)?
            .universe
            .get(name)
            .copied();

        match column {
            Some(UniverseColumn::Panel(_)) => {
                let id = self.add_security(&SecuritySpec::new(name), strategy)?;
                self.nodes[strategy.0]
                    .children
                    .insert(name.to_string(), id);

                //bring the new leaf to the current date
                let (now, inow) = (self.nodes[strategy.0].now, self.nodes[strategy.0].inow);
                if let Some(date) = now {
                    self.security_update(id, date, inow)?;
                }
                debug!(strategy = %self.nodes[strategy.0].full_name, security = name, "created child on demand");
                Ok(id)
            }
            Some(UniverseColumn::Strategy(id)) => Ok(id),
            None => Err(BacktestError::config(
                &self.nodes[strategy.0].full_name,
                self.nodes[strategy.0].now,
                format!("unknown child '{}'", name),
            )),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn prices(&self) -> &Panel {
        &self.prices
    }

    pub fn data(&self) -> &AdditionalData {
        &self.data
    }

    pub fn dates(&self) -> &[NaiveDate] {
        self.prices.dates()
    }

    //finds a node by full name (eg "root>sub>A")
    pub fn find(&self, full_name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.full_name == full_name)
            .map(NodeId)
    }

    pub fn child(&self, strategy: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[strategy.0].children.get(name).copied()
    }

    pub fn strategy_state(&self, id: NodeId) -> Result<&StrategyState> {
        let node = &self.nodes[id.0];
        node.strategy().ok_or_else(|| {
            BacktestError::config(&node.full_name, node.now, "node is not a strategy")
        })
    }

    pub fn strategy_state_mut(&mut self, id: NodeId) -> Result<&mut StrategyState> {
        let node = &mut self.nodes[id.0];
        let (name, now) = (node.full_name.clone(), node.now);
        node.strategy_mut()
            .ok_or_else(|| BacktestError::config(&name, now, "node is not a strategy"))
    }

    pub fn security_state(&self, id: NodeId) -> Result<&SecurityState> {
        let node = &self.nodes[id.0];
        node.security().ok_or_else(|| {
            BacktestError::config(&node.full_name, node.now, "node is not a security")
        })
    }

    //every descendant in depth-first, insertion order
    pub fn members(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        for child in self.nodes[id.0].children.values() {
            out.extend(self.members(*child));
        }
        out
    }

    //security leaves below a node
    pub fn securities(&self, id: NodeId) -> Vec<NodeId> {
        self.members(id)
            .into_iter()
            .filter(|m| self.nodes[m.0].is_security())
            .collect()
    }

    pub fn universe_names(&self, strategy: NodeId) -> Vec<String> {
        self.nodes[strategy.0]
            .strategy()
            .map(|s| s.universe.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn in_universe(&self, strategy: NodeId, name: &str) -> bool {
        self.nodes[strategy.0]
            .strategy()
            .map(|s| s.universe.contains_key(name))
            .unwrap_or(false)
    }

    //price of a universe member at a padded row, NaN when unknown
    pub fn universe_price(&self, strategy: NodeId, name: &str, row: usize) -> f64 {
        let column = self.nodes[strategy.0]
            .strategy()
            .and_then(|s| s.universe.get(name).copied());
        match column {
            Some(UniverseColumn::Panel(col)) => self.prices.value(row, col),
            Some(UniverseColumn::Strategy(id)) => self.nodes[id.0].prices[row],
            None => f64::NAN,
        }
    }

    //prices of the given members over rows [end - len + 1, end], one column per name
    pub fn universe_window(
        &self,
        strategy: NodeId,
        names: &[String],
        end: usize,
        len: usize,
    ) -> Array2<f64> {
        let start = (end + 1).saturating_sub(len);
        let rows = end + 1 - start;
        Array2::from_shape_fn((rows, names.len()), |(r, c)| {
            self.universe_price(strategy, &names[c], start + r)
        })
    }

    //current weight of a direct child, zero when absent
    pub fn child_weight(&self, strategy: NodeId, name: &str) -> f64 {
        self.child(strategy, name)
            .map(|c| self.nodes[c.0].weight)
            .unwrap_or(0.0)
    }

    pub fn commission(&self, strategy: NodeId) -> Commission {
        self.nodes[strategy.0]
            .strategy()
            .map(|s| s.commission.clone())
            .unwrap_or_default()
    }

    //installs a commission function on a strategy and every child strategy
    pub fn set_commissions(&mut self, id: NodeId, commission: Commission) {
        if let Some(state) = self.nodes[id.0].strategy_mut() {
            state.commission = commission.clone();
        }
        let children: Vec<NodeId> = self.nodes[id.0].children.values().copied().collect();
        for child in children {
            if self.nodes[child.0].is_strategy() {
                self.set_commissions(child, commission.clone());
            }
        }
    }
}
