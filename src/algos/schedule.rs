use crate::algos::{Algo, AlgoContext};
use crate::error::Result;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

//calendar unit for RunPeriod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    //true when the two dates fall in different units
    pub fn changed(self, a: NaiveDate, b: NaiveDate) -> bool {
        match self {
            Frequency::Daily => a != b,
            Frequency::Weekly => a.iso_week() != b.iso_week(),
            Frequency::Monthly => (a.year(), a.month()) != (b.year(), b.month()),
            Frequency::Quarterly => (a.year(), (a.month() - 1) / 3) != (b.year(), (b.month() - 1) / 3),
            Frequency::Yearly => a.year() != b.year(),
        }
    }

    //periods per year, used to annualise
    pub fn periods_per_year(self) -> f64 {
        match self {
            Frequency::Daily => 252.0,
            Frequency::Weekly => 52.0,
            Frequency::Monthly => 12.0,
            Frequency::Quarterly => 4.0,
            Frequency::Yearly => 1.0,
        }
    }
}

//true once, on the first run
#[derive(Debug, Default)]
pub struct RunOnce {
    has_run: bool,
}

impl RunOnce {
    pub fn new() -> Self {
        RunOnce::default()
    }
}

impl Algo for RunOnce {
    fn name(&self) -> &str {
        "RunOnce"
    }

    fn run(&mut self, _ctx: &mut AlgoContext) -> Result<bool> {
        if self.has_run {
            return Ok(false);
        }
        self.has_run = true;
        Ok(true)
    }
}

//true when the calendar unit changes relative to the previous bar,
//or to the next bar with end_of_period
#[derive(Debug, Clone)]
pub struct RunPeriod {
    frequency: Frequency,
    run_on_first_date: bool,
    run_on_end_of_period: bool,
    run_on_last_date: bool,
}

impl RunPeriod {
    pub fn new(frequency: Frequency) -> Self {
        RunPeriod {
            frequency,
            run_on_first_date: true,
            run_on_end_of_period: false,
            run_on_last_date: false,
        }
    }

    pub fn daily() -> Self {
        RunPeriod::new(Frequency::Daily)
    }

    pub fn weekly() -> Self {
        RunPeriod::new(Frequency::Weekly)
    }

    pub fn monthly() -> Self {
        RunPeriod::new(Frequency::Monthly)
    }

    pub fn quarterly() -> Self {
        RunPeriod::new(Frequency::Quarterly)
    }

    pub fn yearly() -> Self {
        RunPeriod::new(Frequency::Yearly)
    }

    pub fn run_on_first_date(mut self, flag: bool) -> Self {
        self.run_on_first_date = flag;
        self
    }

    pub fn end_of_period(mut self, flag: bool) -> Self {
        self.run_on_end_of_period = flag;
        self
    }

    pub fn run_on_last_date(mut self, flag: bool) -> Self {
        self.run_on_last_date = flag;
        self
    }
}

impl Algo for RunPeriod {
    fn name(&self) -> &str {
        "RunPeriod"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let index = ctx.inow();
        let dates = ctx.dates();

        //row 0 is the synthetic seed row
        if index == 0 {
            return Ok(false);
        }
        if index == 1 {
            return Ok(self.run_on_first_date);
        }
        if index == dates.len() - 1 {
            return Ok(self.run_on_last_date);
        }

        let other = if self.run_on_end_of_period {
            dates[index + 1]
        } else {
            dates[index - 1]
        };
        Ok(self.frequency.changed(dates[index], other))
    }
}

//true on the listed dates
#[derive(Debug, Clone)]
pub struct RunOnDate {
    dates: BTreeSet<NaiveDate>,
}

impl RunOnDate {
    pub fn new<I: IntoIterator<Item = NaiveDate>>(dates: I) -> Self {
        RunOnDate {
            dates: dates.into_iter().collect(),
        }
    }
}

impl Algo for RunOnDate {
    fn name(&self) -> &str {
        "RunOnDate"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        Ok(self.dates.contains(&ctx.date()?))
    }
}

//true strictly after a date
#[derive(Debug, Clone)]
pub struct RunAfterDate {
    date: NaiveDate,
}

impl RunAfterDate {
    pub fn new(date: NaiveDate) -> Self {
        RunAfterDate { date }
    }
}

impl Algo for RunAfterDate {
    fn name(&self) -> &str {
        "RunAfterDate"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        Ok(ctx.date()? > self.date)
    }
}

//false for the first `days` runs (trading days), true afterwards
#[derive(Debug, Clone)]
pub struct RunAfterDays {
    days: usize,
}

impl RunAfterDays {
    pub fn new(days: usize) -> Self {
        RunAfterDays { days }
    }
}

impl Algo for RunAfterDays {
    fn name(&self) -> &str {
        "RunAfterDays"
    }

    fn run(&mut self, _ctx: &mut AlgoContext) -> Result<bool> {
        if self.days > 0 {
            self.days -= 1;
            return Ok(false);
        }
        Ok(true)
    }
}

//true every n distinct dates, starting at `offset`
#[derive(Debug, Clone)]
pub struct RunEveryNPeriods {
    n: usize,
    offset: usize,
    count: usize,
    last_call: Option<NaiveDate>,
}

impl RunEveryNPeriods {
    pub fn new(n: usize, offset: usize) -> Self {
        RunEveryNPeriods {
            n: n.max(1),
            offset,
            count: 0,
            last_call: None,
        }
    }
}

impl Algo for RunEveryNPeriods {
    fn name(&self) -> &str {
        "RunEveryNPeriods"
    }

    fn run(&mut self, ctx: &mut AlgoContext) -> Result<bool> {
        let now = ctx.date()?;
        if self.last_call == Some(now) {
            return Ok(false);
        }
        self.last_call = Some(now);

        let hit = self.count >= self.offset && (self.count - self.offset) % self.n == 0;
        self.count += 1;
        Ok(hit)
    }
}
