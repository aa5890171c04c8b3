use crate::error::{BacktestError, Result};
use crate::tree::arena::Tree;
use crate::tree::node::{is_close, is_zero, NodeId, SecurityKind, SecurityState};
use chrono::NaiveDate;
use tracing::debug;

//cap on the outlay search in allocate
const MAX_ALLOCATE_ITERATIONS: usize = 10_000;

//result of pricing a trade
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outlay {
    pub full: f64,
    pub outlay: f64,
    pub fee: f64,
    pub bidoffer: f64,
}

impl Tree {
    fn sec(&self, id: NodeId) -> Result<&SecurityState> {
        self.security_state(id)
    }

    fn sec_mut(&mut self, id: NodeId) -> Result<&mut SecurityState> {
        let node = &mut self.nodes[id.0];
        let (name, now) = (node.full_name.clone(), node.now);
        node.security_mut()
            .ok_or_else(|| BacktestError::config(&name, now, "node is not a security"))
    }

    //pre-settlement for a leaf: refresh price and bid/offer, accrue coupons
    //and holding costs (once per row), then revalue
    pub(crate) fn security_update(&mut self, id: NodeId, date: NaiveDate, inow: usize) -> Result<()> {
        {
            let node = &mut self.nodes[id.0];
            node.now = Some(date);
            node.inow = inow;
        }

        let (price, bidoffer) = {
            let sec = self.sec(id)?;
            (sec.price_series[inow], sec.bidoffer_series[inow])
        };
        let node = &mut self.nodes[id.0];
        node.price = price;
        node.prices[inow] = price;

        let full_name = node.full_name.clone();
        let mut capital = node.capital;
        let Some(sec) = node.security_mut() else {
            return Err(BacktestError::config(&full_name, Some(date), "node is not a security"));
        };

        sec.bidoffer = if bidoffer.is_nan() { 0.0 } else { bidoffer };
        sec.bidoffers[inow] = sec.bidoffer;

        if sec.kind.pays_coupons() && sec.accrued_on != Some(inow) {
            let coupon = sec.coupon_series[inow];
            let income = if sec.position == 0.0 {
                0.0
            } else if coupon.is_nan() {
                return Err(BacktestError::accounting(
                    &full_name,
                    Some(date),
                    format!("coupon is NaN with open position {}", sec.position),
                ));
            } else {
                sec.position * coupon
            };
            sec.accrued += income;
            sec.coupons[inow] = income;

            let pays_today = sec
                .schedule_series
                .as_ref()
                .map(|s| s[inow] == 1.0)
                .unwrap_or(true);
            if pays_today {
                capital += sec.accrued;
                sec.accrued = 0.0;
            }

            let rate = if sec.position > 0.0 {
                sec.cost_long_series[inow]
            } else {
                sec.cost_short_series[inow]
            };
            let holding_cost = if rate.is_nan() { 0.0 } else { sec.position.abs() * rate };
            capital -= holding_cost;
            sec.holding_costs[inow] = holding_cost;
            sec.accrued_interest[inow] = sec.accrued;
            sec.accrued_on = Some(inow);
        }
        node.capital = capital;

        self.revalue(id)
    }

    //recomputes value and notional from position and current price
    pub(crate) fn revalue(&mut self, id: NodeId) -> Result<()> {
        let node = &mut self.nodes[id.0];
        let (full_name, now, inow, price) = (node.full_name.clone(), node.now, node.inow, node.price);
        let Some(sec) = node.security_mut() else {
            return Err(BacktestError::config(&full_name, now, "node is not a security"));
        };

        let value = if price.is_nan() {
            if sec.position == 0.0 {
                0.0
            } else {
                return Err(BacktestError::accounting(
                    &full_name,
                    now,
                    format!("price is NaN with open position {}", sec.position),
                ));
            }
        } else {
            sec.position * price * sec.multiplier
        };

        let notional = match sec.kind {
            SecurityKind::Equity => value,
            SecurityKind::FixedIncome | SecurityKind::CouponPaying => sec.position,
            SecurityKind::Hedge | SecurityKind::CouponPayingHedge => 0.0,
        };

        sec.positions[inow] = sec.position;
        node.value = value;
        node.notional_value = notional;
        node.values[inow] = value;
        node.notional_values[inow] = notional;
        Ok(())
    }

    //persists the tick's trades and resets the pending counters
    pub(crate) fn security_post_settlement(&mut self, id: NodeId) -> Result<()> {
        self.revalue(id)?;
        let inow = self.nodes[id.0].inow;
        let sec = self.sec_mut(id)?;
        sec.outlays[inow] += sec.outlay;
        sec.bidoffers_paid[inow] += sec.bidoffer_paid;
        sec.accrued_interest[inow] = sec.accrued;
        sec.outlay = 0.0;
        sec.bidoffer_paid = 0.0;
        Ok(())
    }

    //prices a trade of q units, at the current price or at an override price
    pub fn outlay(&self, id: NodeId, q: f64, price: Option<f64>) -> Result<Outlay> {
        let node = &self.nodes[id.0];
        let sec = self.sec(id)?;
        let commission = node
            .parent
            .map(|p| self.commission(p))
            .unwrap_or_default();
        let mult = sec.multiplier;

        let (fee, bidoffer) = match price {
            None => (
                commission.fee(q, node.price * mult),
                q.abs() * 0.5 * sec.bidoffer * mult,
            ),
            Some(p) => (commission.fee(q, p * mult), q * (p - node.price) * mult),
        };
        let outlay = q * node.price * mult + bidoffer;

        Ok(Outlay {
            full: outlay + fee,
            outlay,
            fee,
            bidoffer,
        })
    }

    //trades q units and charges the full outlay to the parent's capital
    pub(crate) fn security_transact(&mut self, id: NodeId, q: f64, price: Option<f64>) -> Result<()> {
        if q == 0.0 || q.is_nan() {
            return Ok(());
        }

        let (full_name, now, parent) = {
            let node = &self.nodes[id.0];
            (node.full_name.clone(), node.now, node.parent)
        };

        if price.is_some() && !self.sec(id)?.tracks_bidoffer {
            return Err(BacktestError::config(
                &full_name,
                now,
                "a custom transaction price requires bid/offer tracking",
            ));
        }

        let out = self.outlay(id, q, price)?;
        {
            let sec = self.sec_mut(id)?;
            sec.position += q;
            sec.outlay += out.outlay;
            sec.bidoffer_paid += out.bidoffer;
        }

        let parent = parent.ok_or_else(|| {
            BacktestError::config(&full_name, now, "security has no parent strategy")
        })?;
        self.adjust(parent, -out.full, false, out.fee)?;
        self.revalue(id)?;

        debug!(
            security = %full_name,
            quantity = q,
            full_outlay = out.full,
            fee = out.fee,
            "transact"
        );
        Ok(())
    }

    //spends (or raises) `amount` including fees and bid/offer, choosing the
    //quantity whose full outlay is closest to it
    pub(crate) fn security_allocate(&mut self, id: NodeId, amount: f64) -> Result<()> {
        let node = &self.nodes[id.0];
        let (full_name, now) = (node.full_name.clone(), node.now);
        let sec = self.sec(id)?;
        let (price, mult, position, value, integer) = (
            node.price,
            sec.multiplier,
            sec.position,
            node.value,
            node.integer_positions,
        );

        if amount == 0.0 {
            return Ok(());
        }
        if price.is_nan() || price == 0.0 {
            return Err(BacktestError::accounting(
                &full_name,
                now,
                format!("cannot allocate {} at price {}", amount, price),
            ));
        }

        let unit = price * mult;
        let mut q = if is_zero(amount + value) {
            -position
        } else {
            let raw = amount / unit;
            if integer {
                if position > 0.0 || (position == 0.0 && amount > 0.0) {
                    raw.floor()
                } else {
                    raw.ceil()
                }
            } else {
                raw
            }
        };

        if q == 0.0 || q.is_nan() {
            return Ok(());
        }

        if q != -position {
            let mut full = self.outlay(id, q, None)?.full;
            let mut iterations = 0;
            let mut last_q = q;
            let mut last_gap = full - amount;

            while !is_close(full, amount) && q != 0.0 {
                q -= (full - amount) / unit;
                if integer {
                    q = q.floor();
                }
                full = self.outlay(id, q, None)?.full;

                if integer {
                    let one_more = self.outlay(id, q + 1.0, None)?.full;
                    if full < amount && one_more > amount {
                        break;
                    }
                }

                iterations += 1;
                if iterations > MAX_ALLOCATE_ITERATIONS {
                    return Err(BacktestError::numerical(
                        &full_name,
                        now,
                        format!(
                            "allocate of {} did not converge in {} iterations",
                            amount, MAX_ALLOCATE_ITERATIONS
                        ),
                    ));
                }
                if integer && last_q == q {
                    return Err(BacktestError::numerical(
                        &full_name,
                        now,
                        format!("allocate of {} stalled at quantity {}", amount, q),
                    ));
                }
                last_q = q;

                if (full - amount).abs() > last_gap.abs() {
                    return Err(BacktestError::numerical(
                        &full_name,
                        now,
                        format!(
                            "allocate of {} diverged, gap grew from {} to {}",
                            amount,
                            last_gap,
                            full - amount
                        ),
                    ));
                }
                last_gap = full - amount;
            }
        }

        self.security_transact(id, q, None)
    }
}
