use crate::algos::{AlgoStack, PermData, TempData};
use crate::tree::commission::Commission;
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

//tolerance used for zero tests throughout the tree
pub const TOL: f64 = 1e-16;

pub fn is_zero(x: f64) -> bool {
    x.abs() < TOL
}

//numpy-style isclose with atol 1e-8 and rtol TOL
pub fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-8 + TOL * b.abs()
}

//index of a node in the tree arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

//security flavours, coupon and hedge behaviour are flags on top of the base leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityKind {
    #[default]
    Equity,
    FixedIncome,
    CouponPaying,
    Hedge,
    CouponPayingHedge,
}

impl SecurityKind {
    pub fn pays_coupons(self) -> bool {
        matches!(self, SecurityKind::CouponPaying | SecurityKind::CouponPayingHedge)
    }

    pub fn is_hedge(self) -> bool {
        matches!(self, SecurityKind::Hedge | SecurityKind::CouponPayingHedge)
    }

    //par-valued: notional is the position itself
    pub fn is_fixed_income(self) -> bool {
        matches!(self, SecurityKind::FixedIncome | SecurityKind::CouponPaying)
    }
}

//where a strategy finds the price of a universe member
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniverseColumn {
    Panel(usize),
    Strategy(NodeId),
}

//leaf state
#[derive(Debug, Clone)]
pub struct SecurityState {
    pub kind: SecurityKind,
    pub multiplier: f64,
    pub position: f64,
    pub bidoffer: f64,
    pub accrued: f64,
    pub(crate) tracks_bidoffer: bool,

    //pending until post-settlement
    pub(crate) outlay: f64,
    pub(crate) bidoffer_paid: f64,

    //row index on which coupons and holding costs were last applied
    pub(crate) accrued_on: Option<usize>,

    //inputs on the padded axis
    pub(crate) price_series: Vec<f64>,
    pub(crate) bidoffer_series: Vec<f64>,
    pub(crate) coupon_series: Vec<f64>,
    pub(crate) schedule_series: Option<Vec<f64>>,
    pub(crate) cost_long_series: Vec<f64>,
    pub(crate) cost_short_series: Vec<f64>,

    //outputs on the padded axis
    pub positions: Vec<f64>,
    pub outlays: Vec<f64>,
    pub bidoffers: Vec<f64>,
    pub bidoffers_paid: Vec<f64>,
    pub coupons: Vec<f64>,
    pub holding_costs: Vec<f64>,
    pub accrued_interest: Vec<f64>,
}

//internal node state
#[derive(Debug)]
pub struct StrategyState {
    pub par: f64,
    pub fixed_income: bool,
    pub bankrupt: bool,
    pub stack: AlgoStack,
    pub temp: TempData,
    pub perm: PermData,
    pub(crate) commission: Commission,
    pub(crate) universe: IndexMap<String, UniverseColumn>,

    //period bookkeeping
    pub(crate) net_flows: f64,
    pub(crate) last_value: f64,
    pub(crate) last_price: f64,
    pub(crate) last_notional_value: f64,
    pub(crate) last_fee: f64,
    pub(crate) accrued: f64,
    pub(crate) bidoffer_paid: f64,

    //outputs on the padded axis
    pub cash: Vec<f64>,
    pub fees: Vec<f64>,
    pub flows: Vec<f64>,
    pub bidoffers_paid: Vec<f64>,
    pub accrued_interest: Vec<f64>,
}

#[derive(Debug)]
pub enum NodeKind {
    Strategy(Box<StrategyState>),
    Security(SecurityState),
}

//a node in the arena, shared attributes first
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub full_name: String,
    pub parent: Option<NodeId>,
    pub children: IndexMap<String, NodeId>,
    pub now: Option<NaiveDate>,
    pub inow: usize,
    pub price: f64,
    pub value: f64,
    pub notional_value: f64,
    pub weight: f64,
    pub capital: f64,
    pub integer_positions: bool,

    pub prices: Vec<f64>,
    pub values: Vec<f64>,
    pub notional_values: Vec<f64>,

    pub kind: NodeKind,
}

impl Node {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_security(&self) -> bool {
        matches!(self.kind, NodeKind::Security(_))
    }

    pub fn is_strategy(&self) -> bool {
        matches!(self.kind, NodeKind::Strategy(_))
    }

    pub fn security(&self) -> Option<&SecurityState> {
        match &self.kind {
            NodeKind::Security(s) => Some(s),
            NodeKind::Strategy(_) => None,
        }
    }

    pub fn security_mut(&mut self) -> Option<&mut SecurityState> {
        match &mut self.kind {
            NodeKind::Security(s) => Some(s),
            NodeKind::Strategy(_) => None,
        }
    }

    pub fn strategy(&self) -> Option<&StrategyState> {
        match &self.kind {
            NodeKind::Strategy(s) => Some(s),
            NodeKind::Security(_) => None,
        }
    }

    pub fn strategy_mut(&mut self) -> Option<&mut StrategyState> {
        match &mut self.kind {
            NodeKind::Strategy(s) => Some(s),
            NodeKind::Security(_) => None,
        }
    }

    //signed quantity held, zero for strategies
    pub fn position(&self) -> f64 {
        self.security().map(|s| s.position).unwrap_or(0.0)
    }
}

//declaration of a security child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecuritySpec {
    pub name: String,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub kind: SecurityKind,
}

fn default_multiplier() -> f64 {
    1.0
}

impl SecuritySpec {
    pub fn new(name: impl Into<String>) -> Self {
        SecuritySpec {
            name: name.into(),
            multiplier: 1.0,
            kind: SecurityKind::Equity,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_kind(mut self, kind: SecurityKind) -> Self {
        self.kind = kind;
        self
    }
}

//declaration of a strategy and its subtree
#[derive(Debug)]
pub struct StrategySpec {
    pub name: String,
    pub stack: AlgoStack,
    pub children: Vec<NodeSpec>,
    pub par: f64,
    pub fixed_income: bool,
}

impl StrategySpec {
    pub fn new(name: impl Into<String>, stack: AlgoStack) -> Self {
        StrategySpec {
            name: name.into(),
            stack,
            children: Vec::new(),
            par: 100.0,
            fixed_income: false,
        }
    }

    pub fn with_children<I, N>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeSpec>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn with_child(mut self, child: impl Into<NodeSpec>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_par(mut self, par: f64) -> Self {
        self.par = par;
        self
    }

    pub fn fixed_income(mut self) -> Self {
        self.fixed_income = true;
        self
    }
}

#[derive(Debug)]
pub enum NodeSpec {
    Strategy(StrategySpec),
    Security(SecuritySpec),
}

impl NodeSpec {
    pub fn name(&self) -> &str {
        match self {
            NodeSpec::Strategy(s) => &s.name,
            NodeSpec::Security(s) => &s.name,
        }
    }
}

impl From<StrategySpec> for NodeSpec {
    fn from(spec: StrategySpec) -> Self {
        NodeSpec::Strategy(spec)
    }
}

impl From<SecuritySpec> for NodeSpec {
    fn from(spec: SecuritySpec) -> Self {
        NodeSpec::Security(spec)
    }
}

impl From<&str> for NodeSpec {
    fn from(name: &str) -> Self {
        NodeSpec::Security(SecuritySpec::new(name))
    }
}

impl From<String> for NodeSpec {
    fn from(name: String) -> Self {
        NodeSpec::Security(SecuritySpec::new(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_flags() {
        assert!(SecurityKind::CouponPaying.pays_coupons());
        assert!(SecurityKind::CouponPaying.is_fixed_income());
        assert!(!SecurityKind::CouponPayingHedge.is_fixed_income());
        assert!(SecurityKind::CouponPayingHedge.is_hedge());
        assert!(!SecurityKind::Equity.pays_coupons());
    }

    #[test]
    fn closeness() {
        assert!(is_close(1_000_000.0, 1_000_000.0 + 1e-9));
        assert!(!is_close(999_999.0, 1_000_000.0));
        assert!(is_zero(0.0));
        assert!(!is_zero(1e-12));
    }

    #[test]
    fn spec_from_names() {
        let spec = StrategySpec::new("s", AlgoStack::default()).with_children(["a", "b"]);
        let names: Vec<_> = spec.children.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(spec.par, 100.0);
    }
}
