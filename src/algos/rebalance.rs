use crate::algos::{Algo, AlgoContext};
use crate::error::Result;
use chrono::NaiveDate;
use indexmap::IndexMap;
use tracing::debug;

//moves every child to its target weight
//
//children missing from the targets are closed first, then each target is
//rebalanced against a common base and the tree is re-aggregated once
#[derive(Debug, Clone, Default)]
pub struct Rebalance {
    exclude_cash: bool,
}

impl Rebalance {
    pub fn new() -> Self {
        Rebalance::default()
    }

    //uses value minus uninvested capital as the base
    pub fn excluding_cash(mut self) -> Self {
        self.exclude_cash = true;
        self
    }
}

impl Algo for Rebalance {
    fn name(&self) -> &str {
        "Rebalance"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let Some(targets) = ctx.temp.weights.clone() else {
            return Ok(true);
        };
        let id = ctx.target;
        let fixed_income = ctx.tree.strategy_state(id)?.fixed_income;

        let stale: Vec<String> = ctx
            .tree
            .node(id)
            .children
            .iter()
            .filter(|(name, _)| !targets.contains_key(*name))
            .filter(|(_, child)| {
                let node = ctx.tree.node(**child);
                let v = if fixed_income {
                    node.notional_value
                } else {
                    node.value
                };
                v != 0.0 && !v.is_nan()
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            ctx.tree.close(id, name)?;
        }
        if !stale.is_empty() {
            ctx.tree.value_update(id)?;
        }

        let node = ctx.tree.node(id);
        let mut base = if fixed_income {
            ctx.temp.notional_value.unwrap_or(node.notional_value)
        } else if self.exclude_cash {
            node.value - node.capital
        } else {
            node.value
        };
        if !fixed_income {
            if let Some(cash) = ctx.temp.cash {
                base *= 1.0 - cash;
            }
        }

        debug!(
            strategy = %ctx.name(),
            base,
            targets = targets.len(),
            closed = stale.len(),
            "rebalancing"
        );
        for (name, weight) in &targets {
            ctx.tree.rebalance(id, name, *weight, base)?;
        }

        ctx.tree.refresh()?;
        Ok(true)
    }
}

//replays a blotter: every record dated in (previous bar, now] is traded at
//its recorded price
#[derive(Debug, Clone, Default)]
pub struct ReplayTransactions;

impl ReplayTransactions {
    pub fn new() -> Self {
        ReplayTransactions
    }
}

impl Algo for ReplayTransactions {
    fn name(&self) -> &str {
        "ReplayTransactions"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let inow = ctx.inow();
        if inow == 0 {
            return Ok(false);
        }
        let start = ctx.dates()[inow - 1];
        let end = ctx.date()?;

        let records: Vec<_> = ctx
            .data
            .transactions_between(Some(start), end)
            .cloned()
            .collect();
        if records.is_empty() {
            return Ok(true);
        }
        for record in records {
            debug!(
                strategy = %ctx.name(),
                security = %record.security,
                quantity = record.quantity,
                price = record.price,
                "replaying"
            );
            ctx.tree
                .transact_at(ctx.target, &record.security, record.quantity, record.price)?;
        }
        ctx.tree.refresh()?;
        Ok(true)
    }
}

//adds (or withdraws) capital as an external flow
#[derive(Debug, Clone)]
pub struct CapitalFlow {
    amount: f64,
}

impl CapitalFlow {
    pub fn new(amount: f64) -> Self {
        CapitalFlow { amount }
    }
}

impl Algo for CapitalFlow {
    fn name(&self) -> &str {
        "CapitalFlow"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        ctx.tree.adjust(ctx.target, self.amount, true, 0.0)?;
        Ok(true)
    }
}

//closes securities once their close date is reached and remembers them in
//perm.closed so SelectActive skips them afterwards
#[derive(Debug, Clone, Default)]
pub struct ClosePositionsAfterDates {
    close_dates: Option<IndexMap<String, NaiveDate>>,
}

impl ClosePositionsAfterDates {
    //reads the close_dates map of the additional data
    pub fn new() -> Self {
        ClosePositionsAfterDates { close_dates: None }
    }

    pub fn with_dates(close_dates: IndexMap<String, NaiveDate>) -> Self {
        ClosePositionsAfterDates {
            close_dates: Some(close_dates),
        }
    }
}

impl Algo for ClosePositionsAfterDates {
    fn name(&self) -> &str {
        "ClosePositionsAfterDates"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let now = ctx.date()?;
        let dates = self.close_dates.as_ref().unwrap_or(&ctx.data.close_dates);
        let id = ctx.target;

        let due: Vec<String> = ctx
            .tree
            .node(id)
            .children
            .iter()
            .filter(|(_, child)| ctx.tree.node(**child).is_security())
            .filter(|(name, _)| !ctx.perm.closed.contains(*name))
            .filter(|(name, _)| dates.get(*name).map(|d| *d <= now).unwrap_or(false))
            .map(|(name, _)| name.clone())
            .collect();

        for name in due {
            debug!(strategy = %ctx.name(), security = %name, "closing after close date");
            ctx.tree.close(id, &name)?;
            ctx.perm.closed.insert(name);
        }
        ctx.tree.refresh()?;
        Ok(true)
    }
}
