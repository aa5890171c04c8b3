use crate::algos::stats::StatTotalReturn;
use crate::algos::{Algo, AlgoContext};
use crate::error::{BacktestError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use std::cmp::Ordering;

//price filter shared by the selection algos
#[derive(Debug, Clone, Copy, Default)]
struct PriceFilter {
    include_no_data: bool,
    include_negative: bool,
}

impl PriceFilter {
    fn keep(&self, ctx: &AlgoContext, name: &str) -> bool {
        if self.include_no_data {
            return true;
        }
        let price = ctx.price(name);
        if price.is_nan() {
            return false;
        }
        self.include_negative || price > 0.0
    }

    fn apply(&self, ctx: &AlgoContext, names: Vec<String>) -> Vec<String> {
        names.into_iter().filter(|n| self.keep(ctx, n)).collect()
    }
}

//selects every universe member with a usable price today
#[derive(Debug, Clone, Default)]
pub struct SelectAll {
    filter: PriceFilter,
}

impl SelectAll {
    pub fn new() -> Self {
        SelectAll::default()
    }

    pub fn include_no_data(mut self, flag: bool) -> Self {
        self.filter.include_no_data = flag;
        self
    }

    pub fn include_negative(mut self, flag: bool) -> Self {
        self.filter.include_negative = flag;
        self
    }
}

impl Algo for SelectAll {
    fn name(&self) -> &str {
        "SelectAll"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let selected = self.filter.apply(ctx, ctx.universe());
        ctx.temp.selected = Some(selected);
        Ok(true)
    }
}

//selects a fixed list of names
#[derive(Debug, Clone)]
pub struct SelectThese {
    names: Vec<String>,
    filter: PriceFilter,
}

impl SelectThese {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SelectThese {
            names: names.into_iter().map(Into::into).collect(),
            filter: PriceFilter::default(),
        }
    }

    pub fn include_no_data(mut self, flag: bool) -> Self {
        self.filter.include_no_data = flag;
        self
    }

    pub fn include_negative(mut self, flag: bool) -> Self {
        self.filter.include_negative = flag;
        self
    }
}

impl Algo for SelectThese {
    fn name(&self) -> &str {
        "SelectThese"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let names: Vec<String> = self
            .names
            .iter()
            .filter(|n| ctx.tree.in_universe(ctx.target, n))
            .cloned()
            .collect();
        let selected = self.filter.apply(ctx, names);
        ctx.temp.selected = Some(selected);
        Ok(true)
    }
}

//keeps names with at least `min_count` prices over the last `lookback` rows
#[derive(Debug, Clone)]
pub struct SelectHasData {
    lookback: usize,
    min_count: usize,
    filter: PriceFilter,
}

impl SelectHasData {
    pub fn new(lookback: usize) -> Self {
        SelectHasData {
            lookback,
            min_count: lookback,
            filter: PriceFilter::default(),
        }
    }

    pub fn with_min_count(mut self, min_count: usize) -> Self {
        self.min_count = min_count;
        self
    }

    pub fn include_no_data(mut self, flag: bool) -> Self {
        self.filter.include_no_data = flag;
        self
    }

    pub fn include_negative(mut self, flag: bool) -> Self {
        self.filter.include_negative = flag;
        self
    }
}

impl Algo for SelectHasData {
    fn name(&self) -> &str {
        "SelectHasData"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let names = ctx.candidates();
        let window = ctx.price_window(&names, self.lookback, 0);

        let selected: Vec<String> = names
            .into_iter()
            .enumerate()
            .filter(|(col, _)| {
                window.column(*col).iter().filter(|p| !p.is_nan()).count() >= self.min_count
            })
            .map(|(_, name)| name)
            .collect();
        let selected = self.filter.apply(ctx, selected);
        ctx.temp.selected = Some(selected);
        Ok(true)
    }
}

//drops names that were closed for good
#[derive(Debug, Clone, Default)]
pub struct SelectActive;

impl SelectActive {
    pub fn new() -> Self {
        SelectActive
    }
}

impl Algo for SelectActive {
    fn name(&self) -> &str {
        "SelectActive"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let selected: Vec<String> = ctx
            .candidates()
            .into_iter()
            .filter(|n| !ctx.perm.closed.contains(n))
            .collect();
        ctx.temp.selected = Some(selected);
        Ok(true)
    }
}

//selects names whose signal is non-zero today
#[derive(Debug, Clone)]
pub struct SelectWhere {
    signal: String,
    filter: PriceFilter,
}

impl SelectWhere {
    pub fn new(signal: impl Into<String>) -> Self {
        SelectWhere {
            signal: signal.into(),
            filter: PriceFilter::default(),
        }
    }

    pub fn include_no_data(mut self, flag: bool) -> Self {
        self.filter.include_no_data = flag;
        self
    }

    pub fn include_negative(mut self, flag: bool) -> Self {
        self.filter.include_negative = flag;
        self
    }
}

impl Algo for SelectWhere {
    fn name(&self) -> &str {
        "SelectWhere"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let Some(panel) = ctx.data.signals.get(&self.signal) else {
            return Err(ctx.config_error(format!("no signal named '{}'", self.signal)));
        };
        let row = ctx.inow();

        let names: Vec<String> = panel
            .columns()
            .enumerate()
            .filter(|(col, _)| {
                let v = panel.value(row, *col);
                !v.is_nan() && v != 0.0
            })
            .map(|(_, name)| name.to_string())
            .filter(|name| ctx.tree.in_universe(ctx.target, name))
            .collect();
        let selected = self.filter.apply(ctx, names);
        ctx.temp.selected = Some(selected);
        Ok(true)
    }
}

//picks n names at random from the candidates
#[derive(Debug, Clone)]
pub struct SelectRandomly {
    n: Option<usize>,
    rng: StdRng,
    filter: PriceFilter,
}

impl SelectRandomly {
    //None keeps every candidate in random order
    pub fn new(n: Option<usize>, seed: u64) -> Self {
        SelectRandomly {
            n,
            rng: StdRng::seed_from_u64(seed),
            filter: PriceFilter::default(),
        }
    }

    pub fn include_no_data(mut self, flag: bool) -> Self {
        self.filter.include_no_data = flag;
        self
    }

    pub fn include_negative(mut self, flag: bool) -> Self {
        self.filter.include_negative = flag;
        self
    }
}

impl Algo for SelectRandomly {
    fn name(&self) -> &str {
        "SelectRandomly"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let mut names = self.filter.apply(ctx, ctx.candidates());
        names.shuffle(&mut self.rng);
        if let Some(n) = self.n {
            names.truncate(n);
        }
        ctx.temp.selected = Some(names);
        Ok(true)
    }
}

//keeps names matching a regular expression
#[derive(Debug, Clone)]
pub struct SelectRegex {
    regex: Regex,
}

impl SelectRegex {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            BacktestError::config("SelectRegex", None, format!("invalid pattern '{}': {}", pattern, e))
        })?;
        Ok(SelectRegex { regex })
    }
}

impl Algo for SelectRegex {
    fn name(&self) -> &str {
        "SelectRegex"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let selected: Vec<String> = ctx
            .candidates()
            .into_iter()
            .filter(|n| self.regex.is_match(n))
            .collect();
        ctx.temp.selected = Some(selected);
        Ok(true)
    }
}

//how many names SelectN keeps
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Count {
    Absolute(usize),
    Fraction(f64),
}

impl From<usize> for Count {
    fn from(n: usize) -> Self {
        Count::Absolute(n)
    }
}

impl From<f64> for Count {
    //values below one are a fraction of the ranked names
    fn from(n: f64) -> Self {
        if n < 1.0 {
            Count::Fraction(n)
        } else {
            Count::Absolute(n as usize)
        }
    }
}

//keeps the top (or bottom) n names ranked by temp.stat
#[derive(Debug, Clone)]
pub struct SelectN {
    n: Count,
    sort_descending: bool,
    all_or_none: bool,
    filter_selected: bool,
}

impl SelectN {
    pub fn new(n: impl Into<Count>) -> Self {
        SelectN {
            n: n.into(),
            sort_descending: true,
            all_or_none: false,
            filter_selected: false,
        }
    }

    pub fn ascending(mut self) -> Self {
        self.sort_descending = false;
        self
    }

    pub fn all_or_none(mut self, flag: bool) -> Self {
        self.all_or_none = flag;
        self
    }

    pub fn filter_selected(mut self, flag: bool) -> Self {
        self.filter_selected = flag;
        self
    }
}

impl Algo for SelectN {
    fn name(&self) -> &str {
        "SelectN"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let Some(stat) = ctx.temp.stat.as_ref() else {
            return Err(ctx.config_error("SelectN needs a stat, run a stat algo first"));
        };

        let mut ranked: Vec<(String, f64)> = stat
            .iter()
            .filter(|(_, v)| !v.is_nan())
            .filter(|(k, _)| !self.filter_selected || ctx.temp.selected().contains(k))
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        //stable so ties keep stat order
        ranked.sort_by(|a, b| {
            let ord = a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal);
            if self.sort_descending {
                ord.reverse()
            } else {
                ord
            }
        });

        let keep = match self.n {
            Count::Absolute(n) => n,
            Count::Fraction(f) => (f * ranked.len() as f64) as usize,
        };

        let selected: Vec<String> = if self.all_or_none && ranked.len() < keep {
            Vec::new()
        } else {
            ranked.into_iter().take(keep).map(|(k, _)| k).collect()
        };
        ctx.temp.selected = Some(selected);
        Ok(true)
    }
}

//top n names by total return over a lookback
pub struct SelectMomentum {
    stat: StatTotalReturn,
    select: SelectN,
}

impl SelectMomentum {
    pub fn new(n: impl Into<Count>, lookback: usize) -> Self {
        SelectMomentum {
            stat: StatTotalReturn::new(lookback),
            select: SelectN::new(n),
        }
    }

    pub fn with_lag(mut self, lag: usize) -> Self {
        self.stat = self.stat.with_lag(lag);
        self
    }

    pub fn ascending(mut self) -> Self {
        self.select = self.select.ascending();
        self
    }

    pub fn all_or_none(mut self, flag: bool) -> Self {
        self.select = self.select.all_or_none(flag);
        self
    }
}

impl Algo for SelectMomentum {
    fn name(&self) -> &str {
        "SelectMomentum"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        Ok(self.stat.run(ctx)? && self.select.run(ctx)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algos::testing::Fixture;
    use crate::data::{AdditionalData, Panel};
    use crate::algos::testing::day;
    use indexmap::IndexMap;

    fn fixture() -> Fixture {
        let mut fx = Fixture::new(
            vec![
                ("AAA", vec![10.0, 11.0, 12.0]),
                ("BBB", vec![10.0, 9.0, 8.0]),
                ("CCC", vec![f64::NAN, -1.0, 5.0]),
                ("XYZ", vec![10.0, 10.0, 10.0]),
            ],
            vec![],
        );
        fx.advance(2);
        fx
    }

    #[test]
    fn select_all_filters_missing_and_negative() {
        let mut fx = fixture();
        fx.run(&mut SelectAll::new()).unwrap();
        assert_eq!(fx.temp.selected(), ["AAA", "BBB", "XYZ"]);

        fx.run(&mut SelectAll::new().include_negative(true)).unwrap();
        assert_eq!(fx.temp.selected(), ["AAA", "BBB", "CCC", "XYZ"]);
    }

    #[test]
    fn select_these_ignores_unknown_names() {
        let mut fx = fixture();
        fx.run(&mut SelectThese::new(["BBB", "NOPE", "CCC"])).unwrap();
        assert_eq!(fx.temp.selected(), ["BBB"]);
    }

    #[test]
    fn has_data_counts_prices_in_window() {
        let mut fx = fixture();
        fx.advance(3);
        fx.run(&mut SelectHasData::new(3).include_negative(true)).unwrap();
        assert_eq!(fx.temp.selected(), ["AAA", "BBB", "XYZ"]);

        fx.temp.selected = None;
        fx.run(&mut SelectHasData::new(3).with_min_count(2)).unwrap();
        assert_eq!(fx.temp.selected(), ["AAA", "BBB", "CCC", "XYZ"]);
    }

    #[test]
    fn active_drops_closed_names() {
        let mut fx = fixture();
        fx.perm.closed.insert("BBB".to_string());
        fx.run(&mut SelectAll::new()).unwrap();
        fx.run(&mut SelectActive::new()).unwrap();
        assert_eq!(fx.temp.selected(), ["AAA", "XYZ"]);
    }

    #[test]
    fn regex_filters_selection() {
        let mut fx = fixture();
        fx.run(&mut SelectRegex::new("^[AB]").unwrap()).unwrap();
        assert_eq!(fx.temp.selected(), ["AAA", "BBB"]);
        assert!(SelectRegex::new("(").is_err());
    }

    #[test]
    fn randomly_is_seeded() {
        let mut a = fixture();
        let mut b = fixture();
        a.run(&mut SelectRandomly::new(Some(2), 7)).unwrap();
        b.run(&mut SelectRandomly::new(Some(2), 7)).unwrap();
        assert_eq!(a.temp.selected().len(), 2);
        assert_eq!(a.temp.selected(), b.temp.selected());
        assert!(!a.temp.selected().contains(&"CCC".to_string()));
    }

    #[test]
    fn select_n_ranks_stat() {
        let mut fx = fixture();
        let stat: IndexMap<String, f64> = [("AAA", 0.1), ("BBB", -0.2), ("CCC", f64::NAN), ("XYZ", 0.0)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();

        fx.temp.stat = Some(stat.clone());
        fx.run(&mut SelectN::new(2usize)).unwrap();
        assert_eq!(fx.temp.selected(), ["AAA", "XYZ"]);

        fx.run(&mut SelectN::new(1usize).ascending()).unwrap();
        assert_eq!(fx.temp.selected(), ["BBB"]);

        fx.run(&mut SelectN::new(0.5)).unwrap();
        assert_eq!(fx.temp.selected(), ["AAA"]);

        fx.run(&mut SelectN::new(5usize).all_or_none(true)).unwrap();
        assert!(fx.temp.selected().is_empty());

        fx.temp.stat = None;
        assert!(fx.run(&mut SelectN::new(1usize)).is_err());
    }

    #[test]
    fn momentum_picks_best_performer() {
        let mut fx = fixture();
        fx.advance(3);
        fx.run(&mut SelectAll::new()).unwrap();
        fx.run(&mut SelectMomentum::new(1usize, 2)).unwrap();
        assert_eq!(fx.temp.selected(), ["AAA"]);
    }

    #[test]
    fn where_uses_signal_panel() {
        let dates: Vec<_> = (1..=2).map(day).collect();
        let signal = Panel::from_columns(
            dates,
            vec![("AAA", vec![1.0, 0.0]), ("BBB", vec![0.0, 1.0])],
        )
        .unwrap();
        let data = AdditionalData::new().with_signal("trend", signal);
        let mut fx = Fixture::with_data(
            vec![("AAA", vec![10.0, 11.0]), ("BBB", vec![10.0, 9.0])],
            vec![],
            data,
        );
        fx.advance(1);
        fx.run(&mut SelectWhere::new("trend")).unwrap();
        assert_eq!(fx.temp.selected(), ["AAA"]);
        fx.advance(2);
        fx.run(&mut SelectWhere::new("trend")).unwrap();
        assert_eq!(fx.temp.selected(), ["BBB"]);
        assert!(fx.run(&mut SelectWhere::new("missing")).is_err());
    }
}
