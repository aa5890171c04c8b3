use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

//a point in the equity curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub price: f64,
    pub drawdown: f64,
    pub returns: f64,
}

impl EquityPoint {
    pub fn new(date: NaiveDate, price: f64, drawdown: f64, returns: f64) -> Self {
        EquityPoint {
            date,
            price,
            drawdown,
            returns,
        }
    }
}

//builds the equity curve (price, drawdown from peak, period return)
pub fn calculate_equity_curve(dates: &[NaiveDate], prices: &[f64]) -> Vec<EquityPoint> {
    let drawdowns = drawdown_series(prices);
    let mut curve = Vec::with_capacity(dates.len());

    for (i, (&date, &price)) in dates.iter().zip(prices.iter()).enumerate() {
        let returns = if i == 0 {
            0.0
        } else {
            price / prices[i - 1] - 1.0
        };
        curve.push(EquityPoint::new(date, price, drawdowns[i], returns));
    }

    curve
}

//simple returns between consecutive prices
pub fn to_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

//log returns between consecutive prices
pub fn to_log_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect()
}

//price / running peak - 1, zero at a new high
pub fn drawdown_series(prices: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    prices
        .iter()
        .map(|&p| {
            if p.is_nan() {
                return f64::NAN;
            }
            if p > peak {
                peak = p;
            }
            if peak == 0.0 {
                0.0
            } else {
                p / peak - 1.0
            }
        })
        .collect()
}

//deepest drawdown, zero or negative
pub fn max_drawdown(prices: &[f64]) -> f64 {
    drawdown_series(prices)
        .into_iter()
        .filter(|d| !d.is_nan())
        .fold(0.0, f64::min)
}

//contiguous drawdown episodes as (start index, end index, depth)
pub fn drawdown_episodes(prices: &[f64]) -> Vec<(usize, usize, f64)> {
    let mut episodes = Vec::new();
    let mut current: Option<(usize, f64)> = None;

    for (i, dd) in drawdown_series(prices).into_iter().enumerate() {
        match (current, dd < 0.0) {
            (None, true) => current = Some((i, dd)),
            (Some((start, depth)), true) => current = Some((start, depth.min(dd))),
            (Some((start, depth)), false) => {
                episodes.push((start, i, depth));
                current = None;
            }
            (None, false) => {}
        }
    }
    if let Some((start, depth)) = current {
        episodes.push((start, prices.len().saturating_sub(1), depth));
    }
    episodes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Month,
    Year,
}

//last observation of every calendar month or year
pub fn resample_last(dates: &[NaiveDate], prices: &[f64], period: Period) -> Vec<(NaiveDate, f64)> {
    let key = |d: &NaiveDate| match period {
        Period::Month => (d.year(), d.month()),
        Period::Year => (d.year(), 1),
    };

    let mut out: Vec<(NaiveDate, f64)> = Vec::new();
    for (date, price) in dates.iter().zip(prices.iter()) {
        match out.last_mut() {
            Some(last) if key(&last.0) == key(date) => *last = (*date, *price),
            _ => out.push((*date, *price)),
        }
    }
    out
}

//compound annual growth rate between two dated prices
pub fn cagr(start: (NaiveDate, f64), end: (NaiveDate, f64)) -> f64 {
    let years = (end.0 - start.0).num_days() as f64 / 365.0;
    if years <= 0.0 || start.1 == 0.0 {
        return f64::NAN;
    }
    (end.1 / start.1).powf(1.0 / years) - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn drawdowns_track_the_running_peak() {
        let prices = [100.0, 110.0, 99.0, 121.0, 60.5];
        let dd = drawdown_series(&prices);
        assert_eq!(dd[1], 0.0);
        assert_relative_eq!(dd[2], -0.1, epsilon = 1e-12);
        assert_relative_eq!(max_drawdown(&prices), -0.5, epsilon = 1e-12);

        let episodes = drawdown_episodes(&prices);
        assert_eq!(episodes.len(), 2);
        assert_eq!((episodes[0].0, episodes[0].1), (2, 3));
        assert_relative_eq!(episodes[1].2, -0.5, epsilon = 1e-12);
    }

    #[test]
    fn equity_curve_carries_returns() {
        let dates = [ymd(2024, 1, 1), ymd(2024, 1, 2)];
        let curve = calculate_equity_curve(&dates, &[100.0, 105.0]);
        assert_eq!(curve[0].returns, 0.0);
        assert_relative_eq!(curve[1].returns, 0.05, epsilon = 1e-12);
    }

    #[test]
    fn resample_keeps_period_ends() {
        let dates = [ymd(2024, 1, 30), ymd(2024, 1, 31), ymd(2024, 2, 1), ymd(2025, 3, 3)];
        let prices = [1.0, 2.0, 3.0, 4.0];
        let months = resample_last(&dates, &prices, Period::Month);
        assert_eq!(months, vec![(ymd(2024, 1, 31), 2.0), (ymd(2024, 2, 1), 3.0), (ymd(2025, 3, 3), 4.0)]);
        let years = resample_last(&dates, &prices, Period::Year);
        assert_eq!(years.len(), 2);
    }

    #[test]
    fn cagr_over_two_years() {
        let r = cagr((ymd(2020, 1, 1), 100.0), (ymd(2021, 12, 31), 121.0));
        assert_relative_eq!(r, 0.1, epsilon = 1e-3);
        assert!(cagr((ymd(2020, 1, 1), 100.0), (ymd(2020, 1, 1), 121.0)).is_nan());
    }
}
