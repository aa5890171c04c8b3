use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

//simulated clock value attached to every error, "n/a" before the first tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp(pub Option<NaiveDate>);

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(date) => write!(f, "{}", date),
            None => write!(f, "n/a"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BacktestError {
    #[error("configuration error at '{node}' on {now}: {reason}")]
    Config {
        node: String,
        now: Stamp,
        reason: String,
    },
    #[error("accounting error at '{node}' on {now}: {reason}")]
    Accounting {
        node: String,
        now: Stamp,
        reason: String,
    },
    #[error("numerical error at '{node}' on {now}: {reason}")]
    Numerical {
        node: String,
        now: Stamp,
        reason: String,
    },
    #[error("accessor error at '{node}' on {now}: {reason}")]
    Accessor {
        node: String,
        now: Stamp,
        reason: String,
    },
}

impl BacktestError {
    pub fn config(node: &str, now: Option<NaiveDate>, reason: impl Into<String>) -> Self {
        BacktestError::Config {
            node: node.to_string(),
            now: Stamp(now),
            reason: reason.into(),
        }
    }

    pub fn accounting(node: &str, now: Option<NaiveDate>, reason: impl Into<String>) -> Self {
        BacktestError::Accounting {
            node: node.to_string(),
            now: Stamp(now),
            reason: reason.into(),
        }
    }

    pub fn numerical(node: &str, now: Option<NaiveDate>, reason: impl Into<String>) -> Self {
        BacktestError::Numerical {
            node: node.to_string(),
            now: Stamp(now),
            reason: reason.into(),
        }
    }

    pub fn accessor(node: &str, now: Option<NaiveDate>, reason: impl Into<String>) -> Self {
        BacktestError::Accessor {
            node: node.to_string(),
            now: Stamp(now),
            reason: reason.into(),
        }
    }

    //node that raised the error
    pub fn node(&self) -> &str {
        match self {
            BacktestError::Config { node, .. }
            | BacktestError::Accounting { node, .. }
            | BacktestError::Numerical { node, .. }
            | BacktestError::Accessor { node, .. } => node,
        }
    }

    pub fn now(&self) -> Option<NaiveDate> {
        match self {
            BacktestError::Config { now, .. }
            | BacktestError::Accounting { now, .. }
            | BacktestError::Numerical { now, .. }
            | BacktestError::Accessor { now, .. } => now.0,
        }
    }

    //primitives (weighting, covariance) raise errors without tree context,
    //the calling algo re-labels them with its strategy and date
    pub fn at(self, node_name: &str, date: Option<NaiveDate>) -> Self {
        match self {
            BacktestError::Config { reason, .. } => BacktestError::config(node_name, date, reason),
            BacktestError::Accounting { reason, .. } => {
                BacktestError::accounting(node_name, date, reason)
            }
            BacktestError::Numerical { reason, .. } => {
                BacktestError::numerical(node_name, date, reason)
            }
            BacktestError::Accessor { reason, .. } => {
                BacktestError::accessor(node_name, date, reason)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, BacktestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_carries_node_and_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let err = BacktestError::accounting("bond", Some(date), "price is NaN");
        assert_eq!(
            err.to_string(),
            "accounting error at 'bond' on 2024-03-01: price is NaN"
        );
        assert_eq!(err.node(), "bond");
        assert_eq!(err.now(), Some(date));
    }

    #[test]
    fn relabel_keeps_kind() {
        let err = BacktestError::numerical("", None, "no solution").at("root", None);
        assert!(matches!(err, BacktestError::Numerical { .. }));
        assert_eq!(err.to_string(), "numerical error at 'root' on n/a: no solution");
    }
}
