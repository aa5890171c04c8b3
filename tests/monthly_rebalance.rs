use arbor::prelude::*;
use chrono::NaiveDate;

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn setup() -> Backtest {
    let dates = vec![
        ymd(2024, 1, 30),
        ymd(2024, 1, 31),
        ymd(2024, 2, 1),
        ymd(2024, 2, 2),
        ymd(2024, 2, 29),
        ymd(2024, 3, 1),
        ymd(2024, 3, 4),
    ];
    let prices = Panel::from_columns(
        dates,
        vec![
            ("A", vec![10.0, 11.0, 12.0, 11.0, 12.5, 13.0, 14.0]),
            ("B", vec![20.0, 19.0, 18.0, 20.0, 21.0, 21.5, 22.0]),
        ],
    )
    .unwrap();
    let stack = AlgoStack::new()
        .with(RunPeriod::monthly())
        .with(SelectAll::new())
        .with(EqualWeight::new())
        .with(Rebalance::new());
    Backtest::new(
        StrategySpec::new("monthly", stack),
        prices,
        AdditionalData::new(),
        BacktestConfig::default(),
    )
    .unwrap()
}

#[test]
fn trades_only_on_the_first_bar_of_each_month() {
    let mut bt = setup();
    bt.run().unwrap();

    let rebalance_days = [ymd(2024, 1, 30), ymd(2024, 2, 1), ymd(2024, 3, 1)];
    let trades = bt.transactions();
    assert!(!trades.is_empty());
    assert!(trades.iter().all(|t| rebalance_days.contains(&t.date)));
    assert!(trades.iter().any(|t| t.date == ymd(2024, 1, 30)));
    assert!(trades.iter().any(|t| t.date == ymd(2024, 2, 1)));
    assert!(trades.iter().any(|t| t.date == ymd(2024, 3, 1)));
}

#[test]
fn weights_return_to_half_after_each_rebalance() {
    let mut bt = setup();
    bt.run().unwrap();
    let weights = bt.weights().unwrap();

    //padded rows of the rebalance days
    for row in [1, 3, 6] {
        for name in ["monthly>A", "monthly>B"] {
            let w = weights.get(row, name).unwrap();
            assert!((w - 0.5).abs() < 1e-3, "row {} {} weight {}", row, name, w);
        }
    }

    //between rebalances the weights drift with prices
    let drifted = weights.get(2, "monthly>A").unwrap();
    assert!((drifted - 0.5).abs() > 1e-3);
}

#[test]
fn positions_are_flat_between_rebalances() {
    let mut bt = setup();
    bt.run().unwrap();
    let positions = bt.positions().unwrap();
    for name in ["A", "B"] {
        let column = positions.column(name).unwrap();
        assert_eq!(column[1], column[2]);
        assert_eq!(column[3], column[4]);
        assert_eq!(column[3], column[5]);
        assert_eq!(column[6], column[7]);
    }
}
