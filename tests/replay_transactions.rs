use approx::assert_relative_eq;
use arbor::prelude::*;
use chrono::NaiveDate;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, d).unwrap()
}

fn prices() -> Panel {
    Panel::from_columns(vec![day(2), day(3), day(4)], vec![("A", vec![10.0, 11.0, 12.0])]).unwrap()
}

fn blotter() -> Vec<TransactionRecord> {
    vec![
        TransactionRecord {
            date: day(2),
            security: "A".to_string(),
            quantity: 100.0,
            price: 10.05,
        },
        TransactionRecord {
            date: day(3),
            security: "A".to_string(),
            quantity: -40.0,
            price: 11.10,
        },
    ]
}

fn replay(data: AdditionalData) -> Backtest {
    let stack = AlgoStack::new().with(ReplayTransactions::new());
    Backtest::new(StrategySpec::new("replay", stack), prices(), data, BacktestConfig::default()).unwrap()
}

#[test]
fn replayed_blotter_reproduces_positions_and_bidoffer() {
    let bidoffer =
        Panel::from_columns(vec![day(2), day(3), day(4)], vec![("A", vec![0.1, 0.1, 0.1])]).unwrap();
    let data = AdditionalData::new()
        .with_bidoffer(bidoffer)
        .with_transactions(blotter());
    let mut bt = replay(data);
    bt.run().unwrap();

    let positions = bt.positions().unwrap();
    assert_eq!(positions.column("A").unwrap(), &[0.0, 100.0, 60.0, 60.0]);

    let paid = bt.bidoffers_paid().unwrap();
    assert_relative_eq!(paid[1], 5.0, epsilon = 1e-9);
    assert_relative_eq!(paid[2], -4.0, epsilon = 1e-9);
    assert_relative_eq!(paid[3], 0.0, epsilon = 1e-9);

    let tree = bt.tree();
    let securities = tree.securities(tree.root());
    assert_eq!(securities.len(), 1);
    let sec = tree.security_state(securities[0]).unwrap();
    assert_relative_eq!(sec.bidoffers_paid[1], 5.0, epsilon = 1e-9);
    assert_relative_eq!(sec.bidoffers_paid[2], -4.0, epsilon = 1e-9);

    let trades = bt.transactions();
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].quantity, 100.0);
    assert_relative_eq!(trades[0].price, 10.05, epsilon = 1e-9);
    assert_eq!(trades[1].quantity, -40.0);
    assert_relative_eq!(trades[1].price, 11.10, epsilon = 1e-9);
}

#[test]
fn cash_reflects_execution_prices() {
    let bidoffer =
        Panel::from_columns(vec![day(2), day(3), day(4)], vec![("A", vec![0.1, 0.1, 0.1])]).unwrap();
    let data = AdditionalData::new()
        .with_bidoffer(bidoffer)
        .with_transactions(blotter());
    let mut bt = replay(data);
    bt.run().unwrap();

    //paid 1005 on the buy, received 444 on the sale
    let values = bt.values();
    assert_relative_eq!(values[1], 1_000_000.0 - 1005.0 + 1000.0, epsilon = 1e-6);
    assert_relative_eq!(values[2], 1_000_000.0 - 1005.0 + 444.0 + 60.0 * 11.0, epsilon = 1e-6);
}

#[test]
fn custom_prices_require_bidoffer_tracking() {
    let data = AdditionalData::new().with_transactions(blotter());
    let mut bt = replay(data);
    assert!(matches!(bt.run(), Err(BacktestError::Config { .. })));
    assert!(bt.bidoffers_paid().is_err());
}
