use crate::data::panel::Panel;
use crate::error::{BacktestError, Result};
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

//a single executed trade to be replayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub date: NaiveDate,
    pub security: String,
    pub quantity: f64,
    pub price: f64,
}

//auxiliary inputs supplied next to the price panel
//
//bidoffer, coupons, payment_schedule, cost_long, cost_short and signal panels
//must share the price panel's dates. target_weights is a sparse schedule and
//transactions is a blotter, neither is aligned.
#[derive(Debug, Clone, Default)]
pub struct AdditionalData {
    pub bidoffer: Option<Panel>,
    pub coupons: Option<Panel>,
    pub payment_schedule: Option<Panel>,
    pub cost_long: Option<Panel>,
    pub cost_short: Option<Panel>,
    pub transactions: Vec<TransactionRecord>,
    pub target_weights: Option<Panel>,
    pub signals: IndexMap<String, Panel>,
    pub close_dates: IndexMap<String, NaiveDate>,
}

impl AdditionalData {
    pub fn new() -> Self {
        AdditionalData::default()
    }

    pub fn with_bidoffer(mut self, panel: Panel) -> Self {
        self.bidoffer = Some(panel);
        self
    }

    pub fn with_coupons(mut self, panel: Panel) -> Self {
        self.coupons = Some(panel);
        self
    }

    pub fn with_payment_schedule(mut self, panel: Panel) -> Self {
        self.payment_schedule = Some(panel);
        self
    }

    pub fn with_cost_long(mut self, panel: Panel) -> Self {
        self.cost_long = Some(panel);
        self
    }

    pub fn with_cost_short(mut self, panel: Panel) -> Self {
        self.cost_short = Some(panel);
        self
    }

    pub fn with_transactions(mut self, mut transactions: Vec<TransactionRecord>) -> Self {
        //stable so same-date records keep blotter order
        transactions.sort_by(|a, b| a.date.cmp(&b.date));
        self.transactions = transactions;
        self
    }

    pub fn with_target_weights(mut self, panel: Panel) -> Self {
        self.target_weights = Some(panel);
        self
    }

    pub fn with_signal(mut self, name: impl Into<String>, panel: Panel) -> Self {
        self.signals.insert(name.into(), panel);
        self
    }

    pub fn with_close_date(mut self, security: impl Into<String>, date: NaiveDate) -> Self {
        self.close_dates.insert(security.into(), date);
        self
    }

    pub fn tracks_bidoffer(&self) -> bool {
        self.bidoffer.is_some()
    }

    //validates aligned panels against the (unpadded) price panel and
    //prepends the synthetic seed row to each of them
    pub fn align(mut self, prices: &Panel) -> Result<Self> {
        let aligned = [
            ("bidoffer", &mut self.bidoffer),
            ("coupons", &mut self.coupons),
            ("payment_schedule", &mut self.payment_schedule),
            ("cost_long", &mut self.cost_long),
            ("cost_short", &mut self.cost_short),
        ];

        for (name, panel) in aligned {
            if let Some(p) = panel.as_mut() {
                if !p.same_index(prices) {
                    return Err(BacktestError::config(
                        name,
                        None,
                        "panel dates do not match the price panel",
                    ));
                }
                *p = p.with_seed_row();
            }
        }

        for (name, p) in self.signals.iter_mut() {
            if !p.same_index(prices) {
                return Err(BacktestError::config(
                    name,
                    None,
                    "signal panel dates do not match the price panel",
                ));
            }
            *p = p.with_seed_row();
        }

        Ok(self)
    }

    //transactions dated in the half-open window (after, until]
    pub fn transactions_between(
        &self,
        after: Option<NaiveDate>,
        until: NaiveDate,
    ) -> impl Iterator<Item = &TransactionRecord> {
        self.transactions.iter().filter(move |t| {
            t.date <= until && after.map(|a| t.date > a).unwrap_or(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    #[test]
    fn align_rejects_mismatched_index() {
        let prices = Panel::from_columns(vec![day(1), day(2)], vec![("a", vec![1.0, 1.0])]).unwrap();
        let coupons = Panel::from_columns(vec![day(1), day(3)], vec![("a", vec![0.1, 0.1])]).unwrap();

        let result = AdditionalData::new().with_coupons(coupons).align(&prices);
        assert!(matches!(result, Err(BacktestError::Config { .. })));
    }

    #[test]
    fn align_prepends_seed_row() {
        let prices = Panel::from_columns(vec![day(1), day(2)], vec![("a", vec![1.0, 1.0])]).unwrap();
        let bidoffer = Panel::from_columns(vec![day(1), day(2)], vec![("a", vec![0.1, 0.2])]).unwrap();

        let data = AdditionalData::new().with_bidoffer(bidoffer).align(&prices).unwrap();
        let panel = data.bidoffer.unwrap();
        assert_eq!(panel.len(), 3);
        assert!(panel.get(0, "a").unwrap().is_nan());
    }

    #[test]
    fn transaction_window_is_half_open() {
        let data = AdditionalData::new().with_transactions(vec![
            TransactionRecord {
                date: day(3),
                security: "a".into(),
                quantity: -1.0,
                price: 1.0,
            },
            TransactionRecord {
                date: day(2),
                security: "a".into(),
                quantity: 2.0,
                price: 1.0,
            },
        ]);

        let hits: Vec<_> = data.transactions_between(Some(day(2)), day(3)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].quantity, -1.0);

        let first: Vec<_> = data.transactions_between(None, day(2)).collect();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].quantity, 2.0);
    }
}
