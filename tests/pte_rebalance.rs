use arbor::prelude::*;
use arbor::weighting::{ledoit_wolf, predicted_tracking_error, returns_from_prices};
use chrono::{Duration, NaiveDate};
use ndarray::{Array1, Array2};

const BARS: usize = 120;
const CAP: f64 = 0.005;
const LOOKBACK: usize = 20;

fn prices() -> Panel {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let dates = (0..BARS).map(|i| start + Duration::days(i as i64)).collect();
    let a = (0..BARS)
        .map(|i| 100.0 * 1.01f64.powi(i as i32) * (1.0 + 0.03 * (0.7 * i as f64).sin()))
        .collect();
    let b = (0..BARS)
        .map(|i| 50.0 * (1.0 + 0.02 * (0.3 * i as f64).cos()))
        .collect();
    Panel::from_columns(dates, vec![("A", a), ("B", b)]).unwrap()
}

fn run(cap: f64, lookback: usize) -> Backtest {
    let stack = AlgoStack::new()
        .with(SelectAll::new())
        .with(SpecifiedWeight::new(vec![("A", 0.5), ("B", 0.5)]))
        .with(PteRebalance::new(cap, lookback))
        .with(Rebalance::new());
    let mut bt = Backtest::new(
        StrategySpec::new("pte", stack),
        prices(),
        AdditionalData::new(),
        BacktestConfig::default(),
    )
    .unwrap();
    bt.run().unwrap();
    bt
}

//predicted tracking error seen by the algo at a row, from the previous
//row's holdings marked at the current prices
fn pte_at(bt: &Backtest, row: usize, lookback: usize) -> f64 {
    let padded = bt.tree().prices();
    let positions = bt.positions().unwrap();
    let cash = &bt.tree().strategy_state(bt.tree().root()).unwrap().cash;

    let held: Vec<f64> = ["A", "B"]
        .iter()
        .map(|n| positions.column(n).unwrap()[row - 1] * padded.get(row, n).unwrap())
        .collect();
    let total = held.iter().sum::<f64>() + cash[row - 1];
    let diff: Array1<f64> = held.iter().map(|v| v / total - 0.5).collect();

    let start = (row + 1).saturating_sub(lookback + 1);
    let window = Array2::from_shape_fn((row + 1 - start, 2), |(r, c)| padded.value(start + r, c));
    match ledoit_wolf(&returns_from_prices(&window)) {
        Ok(cov) => predicted_tracking_error(&diff, &cov, 252.0),
        Err(_) => f64::NAN,
    }
}

fn traded(bt: &Backtest, row: usize) -> bool {
    let positions = bt.positions().unwrap();
    ["A", "B"].iter().any(|n| {
        let q = positions.column(n).unwrap();
        q[row] != q[row - 1]
    })
}

fn assert_trades_iff_above_cap(cap: f64, lookback: usize) {
    let bt = run(cap, lookback);
    let mut checked = 0;
    for row in 1..=BARS {
        let pte = pte_at(&bt, row, lookback);
        if pte.is_nan() {
            assert!(!traded(&bt, row), "row {} traded without a covariance", row);
            continue;
        }
        //skip rows too close to the cap to call
        if (pte - cap).abs() < 1e-6 {
            continue;
        }
        assert_eq!(traded(&bt, row), pte > cap, "row {} pte {}", row, pte);
        checked += 1;
    }
    assert!(checked > BARS / 2);
}

#[test]
fn trades_exactly_when_tracking_error_breaches_cap() {
    assert_trades_iff_above_cap(CAP, LOOKBACK);
}

#[test]
fn wide_cap_over_a_quarter_of_history() {
    assert_trades_iff_above_cap(0.02, 63);
}

#[test]
fn drift_triggers_repeated_rebalances() {
    let bt = run(CAP, LOOKBACK);
    let trades = (1..=BARS).filter(|r| traded(&bt, *r)).count();
    assert!(trades >= 3, "only {} rebalances", trades);
    assert!(trades < BARS - 10, "{} rebalances", trades);
}

#[test]
fn first_rows_wait_for_history() {
    let bt = run(CAP, LOOKBACK);
    //one return is not enough for a non-zero covariance
    assert!(!traded(&bt, 1));
    assert!(!traded(&bt, 2));
}
