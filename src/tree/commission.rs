use std::fmt;
use std::sync::Arc;

//fee charged for trading `quantity` units at `price` (price already includes the multiplier)
pub type CommissionFn = dyn Fn(f64, f64) -> f64 + Send + Sync;

//shared commission function, installed on the root and inherited by child strategies
#[derive(Clone)]
pub struct Commission(Arc<CommissionFn>);

impl Commission {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        Commission(Arc::new(f))
    }

    //no fees
    pub fn zero() -> Self {
        Commission::new(|_, _| 0.0)
    }

    //fixed fee per unit traded
    pub fn per_unit(rate: f64) -> Self {
        Commission::new(move |q, _| q.abs() * rate)
    }

    //fraction of traded notional
    pub fn percentage(rate: f64) -> Self {
        Commission::new(move |q, p| (q * p).abs() * rate)
    }

    //per unit with a minimum ticket charge
    pub fn per_unit_with_minimum(rate: f64, minimum: f64) -> Self {
        Commission::new(move |q, _| (q.abs() * rate).max(minimum))
    }

    pub fn fee(&self, quantity: f64, price: f64) -> f64 {
        (self.0)(quantity, price)
    }
}

impl Default for Commission {
    fn default() -> Self {
        Commission::zero()
    }
}

impl fmt::Debug for Commission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Commission(..)")
    }
}
