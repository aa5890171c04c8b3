use crate::algos::AlgoContext;
use crate::error::{BacktestError, Result};
use crate::risk::EngineRegistry;
use crate::tree::arena::Tree;
use crate::tree::node::{is_zero, NodeId, NodeKind};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, trace, warn};

impl Tree {
    fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id.0].children.values().copied().collect()
    }

    //adds to capital, flows do not enter the return numerator
    pub fn adjust(&mut self, id: NodeId, amount: f64, flow: bool, fee: f64) -> Result<()> {
        let node = &mut self.nodes[id.0];
        node.capital += amount;
        let (name, now) = (node.full_name.clone(), node.now);
        let state = node
            .strategy_mut()
            .ok_or_else(|| BacktestError::config(&name, now, "only strategies hold capital"))?;
        state.last_fee += fee;
        if flow {
            state.net_flows += amount;
        }
        Ok(())
    }

    //allocates to a named child, or to the strategy itself when child is None
    pub fn allocate(&mut self, id: NodeId, amount: f64, child: Option<&str>) -> Result<()> {
        match child {
            Some(name) => {
                let c = self.ensure_child(id, name)?;
                self.allocate_node(c, amount)
            }
            None => self.allocate_node(id, amount),
        }
    }

    pub(crate) fn allocate_node(&mut self, id: NodeId, amount: f64) -> Result<()> {
        if self.nodes[id.0].is_security() {
            return self.security_allocate(id, amount);
        }

        match self.nodes[id.0].parent {
            None => self.adjust(id, -amount, true, 0.0)?,
            Some(parent) => self.adjust(parent, -amount, false, 0.0)?,
        }
        self.adjust(id, amount, true, 0.0)?;

        //weights as of the last update, not refreshed while pushing down
        let shares: Vec<(NodeId, f64)> = self
            .children_of(id)
            .into_iter()
            .map(|c| (c, self.nodes[c.0].weight))
            .collect();
        for (child, weight) in shares {
            self.allocate_node(child, amount * weight)?;
        }
        Ok(())
    }

    //trades a notional quantity, pushed down by weight for strategies
    pub fn transact(&mut self, id: NodeId, q: f64, child: Option<&str>) -> Result<()> {
        match child {
            Some(name) => {
                let c = self.ensure_child(id, name)?;
                self.transact_node(c, q, None)
            }
            None => self.transact_node(id, q, None),
        }
    }

    //trades a security child at a given price (replayed executions)
    pub fn transact_at(&mut self, id: NodeId, child: &str, q: f64, price: f64) -> Result<()> {
        let c = self.ensure_child(id, child)?;
        self.transact_node(c, q, Some(price))
    }

    pub(crate) fn transact_node(&mut self, id: NodeId, q: f64, price: Option<f64>) -> Result<()> {
        if self.nodes[id.0].is_security() {
            return self.security_transact(id, q, price);
        }
        let shares: Vec<(NodeId, f64)> = self
            .children_of(id)
            .into_iter()
            .map(|c| (c, self.nodes[c.0].weight))
            .collect();
        for (child, weight) in shares {
            self.transact_node(child, q * weight, price)?;
        }
        Ok(())
    }

    //moves a child to a target weight of `base`
    pub fn rebalance(&mut self, id: NodeId, child: &str, weight: f64, base: f64) -> Result<()> {
        if is_zero(weight) {
            return self.close(id, child);
        }

        let c = self.ensure_child(id, child)?;
        let current = self.nodes[c.0].weight;
        let fixed_income = self.strategy_state(id)?.fixed_income;

        debug!(
            strategy = %self.nodes[id.0].full_name,
            child,
            from = current,
            to = weight,
            base,
            "rebalance"
        );

        if fixed_income {
            let notional = self.nodes[id.0].notional_value;
            let delta = if base != 0.0 {
                weight - current * notional / base
            } else {
                weight - current
            };
            self.transact_node(c, delta * base, None)
        } else {
            self.allocate_node(c, (weight - current) * base)
        }
    }

    //closes a child completely, no-op for unknown children
    pub fn close(&mut self, id: NodeId, child: &str) -> Result<()> {
        match self.child(id, child) {
            Some(c) => self.close_node(c),
            None => Ok(()),
        }
    }

    pub(crate) fn close_node(&mut self, id: NodeId) -> Result<()> {
        if self.nodes[id.0].is_security() {
            let position = self.nodes[id.0].position();
            return self.security_transact(id, -position, None);
        }

        self.flatten(id)?;
        self.value_update(id)?;
        let value = self.nodes[id.0].value;
        if value != 0.0 && !value.is_nan() {
            self.allocate_node(id, -value)?;
        }
        Ok(())
    }

    //closes every child with a non-zero value or position
    pub fn flatten(&mut self, id: NodeId) -> Result<()> {
        for child in self.children_of(id) {
            let node = &self.nodes[child.0];
            if node.value != 0.0 || node.position() != 0.0 {
                self.close_node(child)?;
            }
        }
        Ok(())
    }

    //pre-settlement: roll period state on a new date, update every child,
    //then aggregate
    pub(crate) fn strategy_update(&mut self, id: NodeId, date: NaiveDate, inow: usize) -> Result<()> {
        {
            let node = &mut self.nodes[id.0];
            let rolled = node.now.map(|prev| prev != date).unwrap_or(false);
            let (price, value, notional) = (node.price, node.value, node.notional_value);
            node.now = Some(date);
            node.inow = inow;

            if rolled {
                if let Some(state) = node.strategy_mut() {
                    state.last_price = price;
                    state.last_value = value;
                    state.last_notional_value = notional;
                    state.last_fee = 0.0;
                    state.net_flows = 0.0;
                }
            }
        }

        for child in self.children_of(id) {
            if self.nodes[child.0].is_security() {
                self.security_update(child, date, inow)?;
            } else {
                self.strategy_update(child, date, inow)?;
            }
        }

        self.value_update(id)
    }

    //re-aggregates value, notional, price and weights from the children's
    //current state and writes the strategy rows for the current index
    pub(crate) fn value_update(&mut self, id: NodeId) -> Result<()> {
        let children = self.children_of(id);

        for child in &children {
            if self.nodes[child.0].is_strategy() {
                self.value_update(*child)?;
            }
        }

        //sweep coupon income and holding costs up from the leaves
        let mut swept = 0.0;
        for child in &children {
            let node = &mut self.nodes[child.0];
            if node.is_security() && node.capital != 0.0 {
                swept += node.capital;
                node.capital = 0.0;
            }
        }
        if swept != 0.0 {
            self.adjust(id, swept, false, 0.0)?;
        }

        let mut value = self.nodes[id.0].capital;
        let mut notional = 0.0;
        let mut accrued = 0.0;
        let mut bidoffer_paid = 0.0;
        for child in &children {
            let node = &self.nodes[child.0];
            value += node.value;
            notional += node.notional_value.abs();
            match &node.kind {
                NodeKind::Security(sec) => {
                    accrued += sec.accrued;
                    bidoffer_paid += sec.bidoffer_paid;
                }
                NodeKind::Strategy(state) => bidoffer_paid += state.bidoffer_paid,
            }
        }
        value += accrued;

        let node = &self.nodes[id.0];
        let (full_name, now, inow, is_root) =
            (node.full_name.clone(), node.now, node.inow, node.is_root());
        let state = self.strategy_state(id)?;
        let (bankrupt, fixed_income, par) = (state.bankrupt, state.fixed_income, state.par);
        let (last_value, last_price, last_notional, net_flows) = (
            state.last_value,
            state.last_price,
            state.last_notional_value,
            state.net_flows,
        );

        if is_root && value < 0.0 && !is_zero(value) && !bankrupt {
            warn!(strategy = %full_name, date = ?now, value, "bankruptcy declared, flattening");
            self.strategy_state_mut(id)?.bankrupt = true;
            self.flatten(id)?;
            return self.value_update(id);
        }

        let price = if fixed_income {
            let pnl = value - (last_value + net_flows);
            let ret = if !is_zero(last_notional) {
                pnl / last_notional * par
            } else if !is_zero(notional) {
                pnl / notional * par
            } else if is_zero(pnl) {
                0.0
            } else {
                return Err(BacktestError::accounting(
                    &full_name,
                    now,
                    format!("pnl {} with zero notional", pnl),
                ));
            };
            last_price + ret
        } else {
            let bottom = last_value + net_flows;
            let ret = if bottom != 0.0 {
                value / bottom - 1.0
            } else if is_zero(value) {
                0.0
            } else {
                return Err(BacktestError::accounting(
                    &full_name,
                    now,
                    format!("return denominator is zero with value {}", value),
                ));
            };
            last_price * (1.0 + ret)
        };

        for child in &children {
            let node = &mut self.nodes[child.0];
            node.weight = if fixed_income {
                if notional != 0.0 {
                    node.notional_value / notional
                } else {
                    0.0
                }
            } else if value != 0.0 {
                node.value / value
            } else {
                0.0
            };
        }

        let node = &mut self.nodes[id.0];
        node.value = value;
        node.notional_value = notional;
        node.price = price;
        node.values[inow] = value;
        node.notional_values[inow] = notional;
        node.prices[inow] = price;
        let capital = node.capital;

        let state = self.strategy_state_mut(id)?;
        state.accrued = accrued;
        state.bidoffer_paid = bidoffer_paid;
        state.cash[inow] = capital;
        state.fees[inow] = state.last_fee;
        state.flows[inow] = state.net_flows;
        state.accrued_interest[inow] = accrued;

        trace!(strategy = %full_name, inow, value, price, "value update");
        Ok(())
    }

    //post-settlement: finalise rows, persist children and reset flows
    pub(crate) fn strategy_post_settlement(&mut self, id: NodeId) -> Result<()> {
        self.value_update(id)?;
        let pending = self.strategy_state(id)?.bidoffer_paid;

        for child in self.children_of(id) {
            if self.nodes[child.0].is_security() {
                self.security_post_settlement(child)?;
            } else {
                self.strategy_post_settlement(child)?;
            }
        }

        let inow = self.nodes[id.0].inow;
        let state = self.strategy_state_mut(id)?;
        state.bidoffers_paid[inow] += pending;
        state.bidoffer_paid = 0.0;
        state.flows[inow] = state.net_flows;
        state.net_flows = 0.0;
        Ok(())
    }

    //runs the strategy's algo stack and then its child strategies
    pub fn run_strategy(&mut self, id: NodeId, engines: &EngineRegistry) -> Result<()> {
        //the stack and scratchpads leave the node while the algos borrow the tree
        let (mut stack, mut temp, mut perm) = {
            let state = self.strategy_state_mut(id)?;
            state.temp.clear();
            (
                std::mem::take(&mut state.stack),
                std::mem::take(&mut state.temp),
                std::mem::take(&mut state.perm),
            )
        };

        let data = Arc::clone(&self.data);
        let result = {
            let mut ctx = AlgoContext {
                tree: self,
                target: id,
                engines,
                data: &data,
                temp: &mut temp,
                perm: &mut perm,
            };
            stack.run(&mut ctx)
        };

        let state = self.strategy_state_mut(id)?;
        state.stack = stack;
        state.temp = temp;
        state.perm = perm;
        result?;

        for child in self.children_of(id) {
            if self.nodes[child.0].is_strategy() {
                self.run_strategy(child, engines)?;
            }
        }
        Ok(())
    }

    //re-aggregates the whole tree after trades
    pub fn refresh(&mut self) -> Result<()> {
        self.value_update(self.root)
    }

    pub fn pre_settlement(&mut self, date: NaiveDate, inow: usize) -> Result<()> {
        self.strategy_update(self.root, date, inow)
    }

    pub fn post_settlement(&mut self) -> Result<()> {
        self.strategy_post_settlement(self.root)
    }

    pub fn is_bankrupt(&self) -> bool {
        self.nodes[self.root.0]
            .strategy()
            .map(|s| s.bankrupt)
            .unwrap_or(false)
    }
}
