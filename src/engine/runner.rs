use crate::data::Panel;
use crate::engine::backtest::Backtest;
use crate::error::{BacktestError, Result};
use crate::metrics::{comparison_table, PerformanceStats};
use prettytable::Table;
use rayon::prelude::*;
use tracing::info;

//runs independent backtests, in parallel when asked
//
//a failing backtest does not stop the others, each outcome is returned in input order
pub fn run_batch(backtests: Vec<Backtest>, parallel: bool) -> Vec<Result<Backtest>> {
    info!(count = backtests.len(), parallel, "running backtest batch");
    let run = |mut bt: Backtest| -> Result<Backtest> {
        bt.run()?;
        Ok(bt)
    };

    if parallel {
        backtests.into_par_iter().map(run).collect()
    } else {
        backtests.into_iter().map(run).collect()
    }
}

//root price index of every backtest side by side, the date axes must match
pub fn combined_prices(backtests: &[Backtest]) -> Result<Panel> {
    let Some(first) = backtests.first() else {
        return Err(BacktestError::accessor("batch", None, "no backtests to combine"));
    };
    let dates = first.dates().to_vec();

    let mut columns = Vec::with_capacity(backtests.len());
    for bt in backtests {
        if bt.dates() != dates.as_slice() {
            return Err(BacktestError::config(
                bt.name(),
                None,
                "date axis differs from the first backtest",
            ));
        }
        columns.push((bt.name().to_string(), bt.prices().to_vec()));
    }
    Panel::from_columns(dates, columns)
}

//stats of every backtest as one table
pub fn compare(backtests: &[Backtest]) -> Result<Table> {
    let stats: Vec<PerformanceStats> = backtests
        .iter()
        .map(|bt| bt.stats())
        .collect::<Result<_>>()?;
    Ok(comparison_table(&stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algos::{AlgoStack, EqualWeight, Rebalance, RunOnce, SelectThese, SelectWhere};
    use crate::data::AdditionalData;
    use crate::engine::BacktestConfig;
    use crate::tree::StrategySpec;
    use chrono::NaiveDate;

    fn prices() -> Panel {
        let dates = (1..=4)
            .map(|d| NaiveDate::from_ymd_opt(2024, 6, d).unwrap())
            .collect();
        Panel::from_columns(
            dates,
            vec![("A", vec![10.0, 11.0, 12.0, 13.0]), ("B", vec![10.0, 9.0, 8.0, 7.0])],
        )
        .unwrap()
    }

    fn holding(name: &str, security: &str) -> Backtest {
        let stack = AlgoStack::new()
            .with(RunOnce::new())
            .with(SelectThese::new(vec![security.to_string()]))
            .with(EqualWeight::new())
            .with(Rebalance::new());
        Backtest::new(
            StrategySpec::new(name, stack),
            prices(),
            AdditionalData::new(),
            BacktestConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn batch_runs_in_parallel_and_keeps_order() {
        let results = run_batch(vec![holding("long_a", "A"), holding("long_b", "B")], true);
        let done: Vec<Backtest> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(done[0].name(), "long_a");
        assert!(done[0].prices()[4] > 100.0);
        assert!(done[1].prices()[4] < 100.0);

        let combined = combined_prices(&done).unwrap();
        assert_eq!(combined.column_names(), vec!["long_a", "long_b"]);
        assert!(compare(&done).is_ok());
    }

    #[test]
    fn sequential_batch_matches_parallel() {
        let par = run_batch(vec![holding("x", "A")], true).pop().unwrap().unwrap();
        let seq = run_batch(vec![holding("x", "A")], false).pop().unwrap().unwrap();
        assert_eq!(par.prices(), seq.prices());
    }

    #[test]
    fn compare_requires_finished_backtests() {
        assert!(compare(&[holding("x", "A")]).is_err());
        assert!(combined_prices(&[]).is_err());
    }

    #[test]
    fn batch_reports_individual_failures() {
        let stack = AlgoStack::new().with(SelectWhere::new("missing"));
        let bad = Backtest::new(
            StrategySpec::new("bad", stack),
            prices(),
            AdditionalData::new(),
            BacktestConfig::default(),
        )
        .unwrap();
        let results = run_batch(vec![bad, holding("ok", "A")], true);
        assert!(matches!(results[0], Err(BacktestError::Config { .. })));
        assert!(results[1].is_ok());
    }
}
