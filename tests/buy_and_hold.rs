use approx::assert_relative_eq;
use arbor::prelude::*;
use chrono::NaiveDate;

fn dates(n: u32) -> Vec<NaiveDate> {
    (0..n)
        .map(|i| NaiveDate::from_ymd_opt(2024, 1, 2).unwrap() + chrono::Duration::days(i as i64))
        .collect()
}

fn buy_and_hold() -> AlgoStack {
    AlgoStack::new()
        .with(RunOnce::new())
        .with(SelectAll::new())
        .with(EqualWeight::new())
        .with(Rebalance::new())
}

#[test]
fn single_security_is_bought_once_and_held() {
    let prices = Panel::from_columns(dates(3), vec![("A", vec![10.0, 11.0, 12.0])]).unwrap();
    let mut bt = Backtest::new(
        StrategySpec::new("bh", buy_and_hold()),
        prices,
        AdditionalData::new(),
        BacktestConfig::default(),
    )
    .unwrap();
    bt.run().unwrap();

    let positions = bt.positions().unwrap();
    let a = positions.column("A").unwrap();
    assert_eq!(a, &[0.0, 100_000.0, 100_000.0, 100_000.0]);

    let prices = bt.prices();
    assert_relative_eq!(prices[1], 100.0, epsilon = 1e-9);
    assert_relative_eq!(prices[2], 110.0, epsilon = 1e-9);
    assert_relative_eq!(prices[3], 120.0, epsilon = 1e-9);

    //a buy-only tick has no turnover
    let turnover = bt.turnover();
    assert_eq!(turnover[1], 0.0);
    assert!(turnover.iter().all(|t| *t == 0.0));

    let trades = bt.transactions();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].quantity, 100_000.0);
    assert_eq!(trades[0].price, 10.0);
}

#[test]
fn stats_follow_the_price_index() {
    let prices = Panel::from_columns(dates(3), vec![("A", vec![10.0, 11.0, 12.0])]).unwrap();
    let mut bt = Backtest::new(
        StrategySpec::new("bh", buy_and_hold()),
        prices,
        AdditionalData::new(),
        BacktestConfig::default(),
    )
    .unwrap();
    bt.run().unwrap();

    let result = bt.result().unwrap();
    assert_relative_eq!(result.stats.total_return, 0.2, epsilon = 1e-9);
    assert_eq!(result.stats.max_drawdown, 0.0);
    assert_eq!(result.equity_curve.len(), 3);
    assert!(!result.bankrupt);
}

#[test]
fn commission_reduces_the_position() {
    let prices = Panel::from_columns(dates(2), vec![("A", vec![10.0, 10.0])]).unwrap();
    let mut bt = Backtest::new(
        StrategySpec::new("bh", buy_and_hold()),
        prices,
        AdditionalData::new(),
        BacktestConfig::default(),
    )
    .unwrap()
    .with_commission(Commission::per_unit(0.1));
    bt.run().unwrap();

    let root = bt.tree().root();
    let state = bt.tree().strategy_state(root).unwrap();
    let position = bt.positions().unwrap().get(1, "A").unwrap();
    assert!(position < 100_000.0);
    assert_relative_eq!(state.fees[1], position * 0.1, epsilon = 1e-6);
    assert!(state.cash[1] >= 0.0);
}
