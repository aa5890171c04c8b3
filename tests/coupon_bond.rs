use approx::assert_relative_eq;
use arbor::prelude::*;
use chrono::NaiveDate;

const BARS: usize = 62;
//per unit and per bar, 0.5 per unit over 30 bars
const COUPON: f64 = 0.5 / 30.0;

fn dates() -> Vec<NaiveDate> {
    (0..BARS)
        .map(|i| NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + chrono::Duration::days(i as i64))
        .collect()
}

//payments on padded rows 31 and 61, i.e. every 30th bar after the purchase
fn is_payment_row(row: usize) -> bool {
    row == 31 || row == 61
}

fn setup() -> Backtest {
    let prices = Panel::from_columns(dates(), vec![("BOND", vec![100.0; BARS])]).unwrap();
    let coupons = Panel::from_columns(dates(), vec![("BOND", vec![COUPON; BARS])]).unwrap();
    let schedule: Vec<f64> = (1..=BARS)
        .map(|row| if is_payment_row(row) { 1.0 } else { 0.0 })
        .collect();
    let schedule = Panel::from_columns(dates(), vec![("BOND", schedule)]).unwrap();
    let data = AdditionalData::new()
        .with_coupons(coupons)
        .with_payment_schedule(schedule);

    let stack = AlgoStack::new()
        .with(RunOnce::new())
        .with(SelectAll::new())
        .with(SpecifiedWeight::new(vec![("BOND", 0.1)]))
        .with(Rebalance::new());
    let spec = StrategySpec::new("carry", stack)
        .with_child(SecuritySpec::new("BOND").with_kind(SecurityKind::CouponPaying));

    Backtest::new(spec, prices, data, BacktestConfig::default()).unwrap()
}

#[test]
fn coupons_accrue_linearly_and_pay_into_cash() {
    let mut bt = setup();
    bt.run().unwrap();

    let bond = bt.node("carry>BOND").unwrap();
    let sec = bond.security().unwrap();
    assert_eq!(sec.positions[1], 1_000.0);

    let root = bt.tree().root();
    let state = bt.tree().strategy_state(root).unwrap();
    let per_bar = 1_000.0 * COUPON;

    //accrues from the first bar after the purchase
    for row in 2..=30 {
        assert_relative_eq!(state.accrued_interest[row], (row - 1) as f64 * per_bar, epsilon = 1e-6);
        assert_relative_eq!(state.cash[row], state.cash[1], epsilon = 1e-6);
    }

    //each payment flushes the bucket into cash
    for row in [31, 61] {
        assert_relative_eq!(state.accrued_interest[row], 0.0, epsilon = 1e-9);
        assert_relative_eq!(state.cash[row] - state.cash[row - 1], 500.0, epsilon = 1e-6);
        assert_relative_eq!(sec.accrued_interest[row], 0.0, epsilon = 1e-9);
    }
    assert_relative_eq!(state.accrued_interest[32], per_bar, epsilon = 1e-6);
}

#[test]
fn price_includes_accrued_coupons() {
    let mut bt = setup();
    bt.run().unwrap();
    let prices = bt.prices();
    let values = bt.values();

    assert_relative_eq!(values[1], 1_000_000.0, epsilon = 1e-6);
    assert_relative_eq!(values[30], 1_000_000.0 + 29.0 * 1_000.0 * COUPON, epsilon = 1e-6);
    assert_relative_eq!(prices[30] / prices[1], values[30] / values[1], epsilon = 1e-9);

    //paying the coupon moves it from accrued to cash, the value is unchanged
    assert_relative_eq!(values[31] - values[30], 1_000.0 * COUPON, epsilon = 1e-6);
    assert!(prices.windows(2).skip(1).all(|w| w[1] >= w[0]));
}

#[test]
fn coupon_paying_security_without_coupons_is_rejected() {
    let prices = Panel::from_columns(dates(), vec![("BOND", vec![100.0; BARS])]).unwrap();
    let spec = StrategySpec::new("carry", AlgoStack::new())
        .with_child(SecuritySpec::new("BOND").with_kind(SecurityKind::CouponPaying));
    let err = Backtest::new(spec, prices, AdditionalData::new(), BacktestConfig::default());
    assert!(matches!(err, Err(BacktestError::Config { .. })));
}
