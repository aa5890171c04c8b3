use crate::metrics::timeseries::{
    cagr, drawdown_episodes, max_drawdown, resample_last, to_returns, Period,
};
use chrono::{Datelike, Months, NaiveDate};
use prettytable::{Cell, Row, Table};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

//performance statistics of one price series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub name: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub risk_free_rate: f64,
    pub total_return: f64,
    pub cagr: f64,
    pub max_drawdown: f64,
    pub calmar: f64,
    pub mtd: f64,
    pub three_month: f64,
    pub six_month: f64,
    pub ytd: f64,
    pub one_year: f64,
    pub three_year: f64,
    pub five_year: f64,
    pub ten_year: f64,
    pub incep: f64,
    pub daily_mean: f64,
    pub daily_vol: f64,
    pub daily_sharpe: f64,
    pub daily_sortino: f64,
    pub daily_skew: f64,
    pub daily_kurt: f64,
    pub best_day: f64,
    pub worst_day: f64,
    pub monthly_mean: f64,
    pub monthly_vol: f64,
    pub monthly_sharpe: f64,
    pub monthly_sortino: f64,
    pub monthly_skew: f64,
    pub monthly_kurt: f64,
    pub best_month: f64,
    pub worst_month: f64,
    pub avg_up_month: f64,
    pub avg_down_month: f64,
    pub win_month_pct: f64,
    pub twelve_month_win_pct: f64,
    pub yearly_mean: f64,
    pub yearly_vol: f64,
    pub yearly_sharpe: f64,
    pub yearly_sortino: f64,
    pub yearly_skew: f64,
    pub yearly_kurt: f64,
    pub best_year: f64,
    pub worst_year: f64,
    pub win_year_pct: f64,
    pub avg_drawdown: f64,
    pub avg_drawdown_days: f64,
}

impl PerformanceStats {
    //computes stats from a dated price series
    //
    //leading NaN prices are skipped; the annual risk free rate is converted
    //to a per period rate with the annualization factor
    pub fn from_prices(
        name: &str,
        dates: &[NaiveDate],
        prices: &[f64],
        risk_free_rate: f64,
        annualization: f64,
    ) -> Self {
        let first = prices.iter().position(|p| !p.is_nan()).unwrap_or(prices.len());
        let dates = &dates[first.min(dates.len())..];
        let prices = &prices[first..];

        let mut stats = PerformanceStats::empty(name, risk_free_rate);
        if prices.is_empty() {
            return stats;
        }
        stats.start = dates.first().copied();
        stats.end = dates.last().copied();
        if prices.len() < 2 {
            return stats;
        }

        let start = (dates[0], prices[0]);
        let end = (dates[dates.len() - 1], prices[prices.len() - 1]);
        stats.total_return = end.1 / start.1 - 1.0;
        stats.cagr = cagr(start, end);
        stats.max_drawdown = max_drawdown(prices);
        stats.calmar = if stats.max_drawdown < 0.0 {
            stats.cagr / stats.max_drawdown.abs()
        } else {
            f64::NAN
        };
        stats.incep = stats.cagr;
        stats.mtd = since_period_end(dates, prices, Period::Month);
        stats.ytd = since_period_end(dates, prices, Period::Year);
        stats.three_year = trailing_cagr(dates, prices, 3);
        stats.five_year = trailing_cagr(dates, prices, 5);
        stats.ten_year = trailing_cagr(dates, prices, 10);

        let daily = to_returns(prices);
        stats.daily_mean = daily.as_slice().mean() * annualization;
        stats.daily_vol = daily.as_slice().std_dev() * annualization.sqrt();
        stats.daily_sharpe = sharpe_ratio(&daily, risk_free_rate, annualization);
        stats.daily_sortino = sortino_ratio(&daily, risk_free_rate, annualization);
        stats.daily_skew = skew(&daily);
        stats.daily_kurt = kurtosis(&daily);
        stats.best_day = daily.iter().copied().fold(f64::NAN, f64::max);
        stats.worst_day = daily.iter().copied().fold(f64::NAN, f64::min);

        let month_ends: Vec<f64> = resample_last(dates, prices, Period::Month)
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        //month end prices anchored on the first price
        let anchored: Vec<f64> = std::iter::once(prices[0]).chain(month_ends.iter().copied()).collect();
        stats.three_month = months_back(&anchored, 3);
        stats.six_month = months_back(&anchored, 6);
        stats.one_year = months_back(&anchored, 12);
        let rolling: Vec<f64> = (12..anchored.len())
            .map(|i| anchored[i] / anchored[i - 12] - 1.0)
            .collect();
        if !rolling.is_empty() {
            stats.twelve_month_win_pct = win_fraction(&rolling);
        }

        let monthly = period_returns(prices[0], &month_ends);
        if !monthly.is_empty() {
            stats.monthly_mean = monthly.as_slice().mean() * 12.0;
            stats.monthly_vol = monthly.as_slice().std_dev() * 12f64.sqrt();
            stats.monthly_sharpe = sharpe_ratio(&monthly, risk_free_rate, 12.0);
            stats.monthly_sortino = sortino_ratio(&monthly, risk_free_rate, 12.0);
            stats.monthly_skew = skew(&monthly);
            stats.monthly_kurt = kurtosis(&monthly);
            stats.best_month = monthly.iter().copied().fold(f64::NAN, f64::max);
            stats.worst_month = monthly.iter().copied().fold(f64::NAN, f64::min);
            stats.avg_up_month = mean_where(&monthly, |r| r > 0.0);
            stats.avg_down_month = mean_where(&monthly, |r| r < 0.0);
            stats.win_month_pct = win_fraction(&monthly);
        }

        let yearly: Vec<f64> = resample_last(dates, prices, Period::Year)
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        let yearly = period_returns(prices[0], &yearly);
        if !yearly.is_empty() {
            stats.yearly_mean = yearly.as_slice().mean();
            stats.yearly_vol = yearly.as_slice().std_dev();
            stats.yearly_sharpe = sharpe_ratio(&yearly, risk_free_rate, 1.0);
            stats.yearly_sortino = sortino_ratio(&yearly, risk_free_rate, 1.0);
            stats.yearly_skew = skew(&yearly);
            stats.yearly_kurt = kurtosis(&yearly);
            stats.win_year_pct = win_fraction(&yearly);
            stats.best_year = yearly.iter().copied().fold(f64::NAN, f64::max);
            stats.worst_year = yearly.iter().copied().fold(f64::NAN, f64::min);
        }

        let episodes = drawdown_episodes(prices);
        if !episodes.is_empty() {
            let depths: Vec<f64> = episodes.iter().map(|e| e.2).collect();
            let days: Vec<f64> = episodes
                .iter()
                .map(|(s, e, _)| (dates[*e] - dates[*s]).num_days() as f64)
                .collect();
            stats.avg_drawdown = depths.as_slice().mean();
            stats.avg_drawdown_days = days.as_slice().mean();
        }

        stats
    }

    fn empty(name: &str, risk_free_rate: f64) -> Self {
        PerformanceStats {
            name: name.to_string(),
            start: None,
            end: None,
            risk_free_rate,
            total_return: f64::NAN,
            cagr: f64::NAN,
            max_drawdown: f64::NAN,
            calmar: f64::NAN,
            mtd: f64::NAN,
            three_month: f64::NAN,
            six_month: f64::NAN,
            ytd: f64::NAN,
            one_year: f64::NAN,
            three_year: f64::NAN,
            five_year: f64::NAN,
            ten_year: f64::NAN,
            incep: f64::NAN,
            daily_mean: f64::NAN,
            daily_vol: f64::NAN,
            daily_sharpe: f64::NAN,
            daily_sortino: f64::NAN,
            daily_skew: f64::NAN,
            daily_kurt: f64::NAN,
            best_day: f64::NAN,
            worst_day: f64::NAN,
            monthly_mean: f64::NAN,
            monthly_vol: f64::NAN,
            monthly_sharpe: f64::NAN,
            monthly_sortino: f64::NAN,
            monthly_skew: f64::NAN,
            monthly_kurt: f64::NAN,
            best_month: f64::NAN,
            worst_month: f64::NAN,
            avg_up_month: f64::NAN,
            avg_down_month: f64::NAN,
            win_month_pct: f64::NAN,
            twelve_month_win_pct: f64::NAN,
            yearly_mean: f64::NAN,
            yearly_vol: f64::NAN,
            yearly_sharpe: f64::NAN,
            yearly_sortino: f64::NAN,
            yearly_skew: f64::NAN,
            yearly_kurt: f64::NAN,
            best_year: f64::NAN,
            worst_year: f64::NAN,
            win_year_pct: f64::NAN,
            avg_drawdown: 0.0,
            avg_drawdown_days: 0.0,
        }
    }

    //stats as label / formatted value rows
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        let date = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
        vec![
            ("Start", date(self.start)),
            ("End", date(self.end)),
            ("Risk-free rate", pct(self.risk_free_rate)),
            ("Total Return", pct(self.total_return)),
            ("CAGR", pct(self.cagr)),
            ("Max Drawdown", pct(self.max_drawdown)),
            ("Calmar Ratio", num(self.calmar)),
            ("MTD", pct(self.mtd)),
            ("3m", pct(self.three_month)),
            ("6m", pct(self.six_month)),
            ("YTD", pct(self.ytd)),
            ("1Y", pct(self.one_year)),
            ("3Y (ann.)", pct(self.three_year)),
            ("5Y (ann.)", pct(self.five_year)),
            ("10Y (ann.)", pct(self.ten_year)),
            ("Since Incep. (ann.)", pct(self.incep)),
            ("Daily Sharpe", num(self.daily_sharpe)),
            ("Daily Sortino", num(self.daily_sortino)),
            ("Daily Mean (ann.)", pct(self.daily_mean)),
            ("Daily Vol (ann.)", pct(self.daily_vol)),
            ("Daily Skew", num(self.daily_skew)),
            ("Daily Kurt", num(self.daily_kurt)),
            ("Best Day", pct(self.best_day)),
            ("Worst Day", pct(self.worst_day)),
            ("Monthly Sharpe", num(self.monthly_sharpe)),
            ("Monthly Sortino", num(self.monthly_sortino)),
            ("Monthly Mean (ann.)", pct(self.monthly_mean)),
            ("Monthly Vol (ann.)", pct(self.monthly_vol)),
            ("Monthly Skew", num(self.monthly_skew)),
            ("Monthly Kurt", num(self.monthly_kurt)),
            ("Best Month", pct(self.best_month)),
            ("Worst Month", pct(self.worst_month)),
            ("Avg. Up Month", pct(self.avg_up_month)),
            ("Avg. Down Month", pct(self.avg_down_month)),
            ("% Winning Months", pct(self.win_month_pct)),
            ("% Winning 12m", pct(self.twelve_month_win_pct)),
            ("Yearly Sharpe", num(self.yearly_sharpe)),
            ("Yearly Sortino", num(self.yearly_sortino)),
            ("Yearly Mean", pct(self.yearly_mean)),
            ("Yearly Vol", pct(self.yearly_vol)),
            ("Yearly Skew", num(self.yearly_skew)),
            ("Yearly Kurt", num(self.yearly_kurt)),
            ("Best Year", pct(self.best_year)),
            ("Worst Year", pct(self.worst_year)),
            ("% Winning Years", pct(self.win_year_pct)),
            ("Avg. Drawdown", pct(self.avg_drawdown)),
            ("Avg. Drawdown Days", format!("{:.1}", self.avg_drawdown_days)),
        ]
    }

    //prints stats in a formatted table
    pub fn pretty_print_table(&self) {
        let mut table = Table::new();
        table.add_row(Row::new(vec![Cell::new("Stat"), Cell::new(&self.name)]));
        for (label, value) in self.rows() {
            table.add_row(Row::new(vec![Cell::new(label), Cell::new(&value)]));
        }
        table.printstd();
    }
}

//side by side stats of several series
pub fn comparison_table(stats: &[PerformanceStats]) -> Table {
    let mut table = Table::new();
    let mut header = vec![Cell::new("Stat")];
    header.extend(stats.iter().map(|s| Cell::new(&s.name)));
    table.add_row(Row::new(header));

    let columns: Vec<Vec<(&'static str, String)>> = stats.iter().map(|s| s.rows()).collect();
    let labels: Vec<&'static str> = columns
        .first()
        .map(|c| c.iter().map(|(l, _)| *l).collect())
        .unwrap_or_default();
    for (i, label) in labels.into_iter().enumerate() {
        let mut row = vec![Cell::new(label)];
        row.extend(columns.iter().map(|c| Cell::new(&c[i].1)));
        table.add_row(Row::new(row));
    }
    table
}

fn pct(v: f64) -> String {
    if v.is_nan() {
        "-".to_string()
    } else {
        format!("{:.2}%", v * 100.0)
    }
}

fn num(v: f64) -> String {
    if v.is_nan() {
        "-".to_string()
    } else {
        format!("{:.3}", v)
    }
}

//returns of period end prices, the first against the series start
fn period_returns(start: f64, ends: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(ends.len());
    let mut prev = start;
    for &p in ends {
        out.push(p / prev - 1.0);
        prev = p;
    }
    out
}

//return of the last price over the previous period's close, or over the
//first price when the series starts inside the period
fn since_period_end(dates: &[NaiveDate], prices: &[f64], period: Period) -> f64 {
    let last = dates[dates.len() - 1];
    let same = |d: &NaiveDate| match period {
        Period::Month => d.year() == last.year() && d.month() == last.month(),
        Period::Year => d.year() == last.year(),
    };
    let anchor = match dates.iter().rposition(|d| !same(d)) {
        Some(i) => prices[i],
        None => prices[0],
    };
    if anchor == 0.0 {
        return 0.0;
    }
    prices[prices.len() - 1] / anchor - 1.0
}

//annualized return over the last `years`, NaN without that much history
fn trailing_cagr(dates: &[NaiveDate], prices: &[f64], years: u32) -> f64 {
    let last = dates.len() - 1;
    let Some(from) = dates[last].checked_sub_months(Months::new(12 * years)) else {
        return f64::NAN;
    };
    if dates[0] > from {
        return f64::NAN;
    }
    let i = dates.iter().position(|d| *d >= from).unwrap_or(last);
    cagr((dates[i], prices[i]), (dates[last], prices[last]))
}

fn months_back(anchored: &[f64], n: usize) -> f64 {
    if anchored.len() <= n {
        return f64::NAN;
    }
    let last = anchored.len() - 1;
    anchored[last] / anchored[last - n] - 1.0
}

fn win_fraction(returns: &[f64]) -> f64 {
    returns.iter().filter(|r| **r > 0.0).count() as f64 / returns.len() as f64
}

fn mean_where<F: Fn(f64) -> bool>(returns: &[f64], keep: F) -> f64 {
    let kept: Vec<f64> = returns.iter().copied().filter(|r| keep(*r)).collect();
    if kept.is_empty() {
        return f64::NAN;
    }
    kept.as_slice().mean()
}

//bias-adjusted sample skewness
fn skew(x: &[f64]) -> f64 {
    let n = x.len() as f64;
    if x.len() < 3 {
        return f64::NAN;
    }
    let mean = x.mean();
    let m2 = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let m3 = x.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n;
    if m2 == 0.0 {
        return f64::NAN;
    }
    (n * (n - 1.0)).sqrt() / (n - 2.0) * m3 / m2.powf(1.5)
}

//bias-adjusted sample excess kurtosis
fn kurtosis(x: &[f64]) -> f64 {
    let n = x.len() as f64;
    if x.len() < 4 {
        return f64::NAN;
    }
    let mean = x.mean();
    let m2 = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let m4 = x.iter().map(|v| (v - mean).powi(4)).sum::<f64>() / n;
    if m2 == 0.0 {
        return f64::NAN;
    }
    let g2 = m4 / (m2 * m2) - 3.0;
    (n - 1.0) / ((n - 2.0) * (n - 3.0)) * ((n + 1.0) * g2 + 6.0)
}

//annualized mean excess return over its standard deviation
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64, annualization: f64) -> f64 {
    if returns.len() < 2 {
        return f64::NAN;
    }
    let excess: Vec<f64> = returns
        .iter()
        .map(|r| r - risk_free_rate / annualization)
        .collect();
    let std_dev = excess.as_slice().std_dev();
    if std_dev == 0.0 {
        return f64::NAN;
    }
    excess.as_slice().mean() / std_dev * annualization.sqrt()
}

//annualized mean excess return over the deviation of its negative part
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64, annualization: f64) -> f64 {
    if returns.len() < 2 {
        return f64::NAN;
    }
    let excess: Vec<f64> = returns
        .iter()
        .map(|r| r - risk_free_rate / annualization)
        .collect();
    let downside: Vec<f64> = excess.iter().map(|r| r.min(0.0)).collect();
    let downside_dev = downside.as_slice().std_dev();
    if downside_dev == 0.0 {
        return f64::NAN;
    }
    excess.as_slice().mean() / downside_dev * annualization.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect()
    }

    #[test]
    fn flat_series_has_zero_return_and_no_ratios() {
        let d = dates(40);
        let stats = PerformanceStats::from_prices("flat", &d, &[100.0; 40], 0.0, 252.0);
        assert_relative_eq!(stats.total_return, 0.0);
        assert_relative_eq!(stats.max_drawdown, 0.0);
        assert!(stats.daily_sharpe.is_nan());
        assert!(stats.calmar.is_nan());
    }

    #[test]
    fn leading_nan_is_skipped() {
        let d = dates(4);
        let stats = PerformanceStats::from_prices("s", &d, &[f64::NAN, 100.0, 110.0, 99.0], 0.0, 252.0);
        assert_eq!(stats.start, Some(d[1]));
        assert_relative_eq!(stats.total_return, -0.01, epsilon = 1e-12);
        assert_relative_eq!(stats.max_drawdown, -0.1, epsilon = 1e-12);
        assert_relative_eq!(stats.best_day, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn sharpe_uses_excess_returns() {
        let r = [0.01, 0.02, 0.0, 0.01];
        let plain = sharpe_ratio(&r, 0.0, 252.0);
        let excess = sharpe_ratio(&r, 0.252, 252.0);
        assert!(plain > excess);
        assert!(sortino_ratio(&[0.01, 0.02], 0.0, 252.0).is_nan());
    }

    #[test]
    fn comparison_table_has_a_row_per_stat() {
        let d = dates(3);
        let a = PerformanceStats::from_prices("a", &d, &[1.0, 1.1, 1.2], 0.0, 252.0);
        let b = PerformanceStats::from_prices("b", &d, &[1.0, 0.9, 0.8], 0.0, 252.0);
        let table = comparison_table(&[a.clone(), b]);
        assert_eq!(table.len(), a.rows().len() + 1);
    }
    #[test]
    fn trailing_returns_use_period_anchors() {
        let d = vec![
            NaiveDate::from_ymd_opt(2023, 12, 29).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(),
        ];
        let stats = PerformanceStats::from_prices("s", &d, &[100.0, 110.0, 121.0, 132.0], 0.0, 252.0);
        assert_relative_eq!(stats.mtd, 0.2, epsilon = 1e-12);
        assert_relative_eq!(stats.ytd, 0.32, epsilon = 1e-12);
        assert!(stats.three_month.is_nan());
        assert!(stats.three_year.is_nan());
        assert_relative_eq!(stats.avg_up_month, (0.1 + 0.2) / 2.0, epsilon = 1e-12);
        assert!(stats.avg_down_month.is_nan());
        //the first month closes flat against the start
        assert_relative_eq!(stats.win_month_pct, 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_anchor_gives_zero_period_return() {
        let d = vec![
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        ];
        assert_eq!(since_period_end(&d, &[0.0, 5.0], Period::Month), 0.0);
    }

    #[test]
    fn skew_and_kurtosis_of_symmetric_sample() {
        let x = [-2.0, -1.0, 0.0, 1.0, 2.0];
        assert_relative_eq!(skew(&x), 0.0, epsilon = 1e-12);
        assert_relative_eq!(kurtosis(&x), -1.2, epsilon = 1e-12);
        assert!(skew(&[1.0, 2.0]).is_nan());
    }
}
