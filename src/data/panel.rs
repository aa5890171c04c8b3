use crate::error::{BacktestError, Result};
use chrono::{Duration, NaiveDate};
use indexmap::IndexMap;

//a date x column matrix of f64 (prices, bid/offer, coupons, weights...)
//rows are strictly increasing dates, columns are unique names
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    dates: Vec<NaiveDate>,
    columns: IndexMap<String, usize>,
    //column-major storage, values[col][row]
    values: Vec<Vec<f64>>,
}

impl Panel {
    //creates a panel from column-major data
    pub fn from_columns<S: Into<String>>(
        dates: Vec<NaiveDate>,
        columns: Vec<(S, Vec<f64>)>,
    ) -> Result<Self> {
        validate_dates(&dates)?;

        let mut index = IndexMap::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());

        for (name, data) in columns {
            let name = name.into();
            if data.len() != dates.len() {
                return Err(BacktestError::config(
                    "panel",
                    None,
                    format!(
                        "column '{}' has {} values but the index has {} dates",
                        name,
                        data.len(),
                        dates.len()
                    ),
                ));
            }
            if index.contains_key(&name) {
                return Err(BacktestError::config(
                    "panel",
                    None,
                    format!("duplicate column '{}'", name),
                ));
            }
            index.insert(name, values.len());
            values.push(data);
        }

        Ok(Panel {
            dates,
            columns: index,
            values,
        })
    }

    //creates a panel from row-major data
    pub fn from_rows<S: Into<String>>(
        dates: Vec<NaiveDate>,
        columns: Vec<S>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let names: Vec<String> = columns.into_iter().map(Into::into).collect();
        if rows.len() != dates.len() {
            return Err(BacktestError::config(
                "panel",
                None,
                format!("{} rows for {} dates", rows.len(), dates.len()),
            ));
        }

        let mut data = vec![Vec::with_capacity(rows.len()); names.len()];
        for (i, row) in rows.iter().enumerate() {
            if row.len() != names.len() {
                return Err(BacktestError::config(
                    "panel",
                    None,
                    format!(
                        "row {} has {} values but there are {} columns",
                        i,
                        row.len(),
                        names.len()
                    ),
                ));
            }
            for (col, value) in row.iter().enumerate() {
                data[col].push(*value);
            }
        }

        Panel::from_columns(dates, names.into_iter().zip(data).collect())
    }

    //empty panel on the given index
    pub fn empty(dates: Vec<NaiveDate>) -> Result<Self> {
        Panel::from_columns::<String>(dates, Vec::new())
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.column_index(name).map(|i| self.values[i].as_slice())
    }

    pub fn column_at(&self, col: usize) -> &[f64] {
        &self.values[col]
    }

    //value at (row, column name), None if the column is unknown
    pub fn get(&self, row: usize, name: &str) -> Option<f64> {
        self.column_index(name).map(|col| self.values[col][row])
    }

    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.values[col][row]
    }

    //all columns at a given row, in column order
    pub fn row(&self, row: usize) -> Vec<f64> {
        self.values.iter().map(|c| c[row]).collect()
    }

    //row index of an exact date
    pub fn row_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    //index of the last row whose date is <= date
    pub fn row_at_or_before(&self, date: NaiveDate) -> Option<usize> {
        match self.dates.binary_search(&date) {
            Ok(i) => Some(i),
            Err(0) => None,
            Err(i) => Some(i - 1),
        }
    }

    pub fn same_index(&self, other: &Panel) -> bool {
        self.dates == other.dates
    }

    //prepends a NaN row dated one day before the first date
    //so that returns on the first real date are well defined
    pub fn with_seed_row(&self) -> Panel {
        let Some(first) = self.dates.first() else {
            return self.clone();
        };

        let mut dates = Vec::with_capacity(self.dates.len() + 1);
        dates.push(*first - Duration::days(1));
        dates.extend_from_slice(&self.dates);

        let values = self
            .values
            .iter()
            .map(|column| {
                let mut padded = Vec::with_capacity(column.len() + 1);
                padded.push(f64::NAN);
                padded.extend_from_slice(column);
                padded
            })
            .collect();

        Panel {
            dates,
            columns: self.columns.clone(),
            values,
        }
    }

    //keeps a subset of columns, in the order given, skipping unknown names
    pub fn select(&self, names: &[String]) -> Panel {
        let mut columns = IndexMap::new();
        let mut values = Vec::new();
        for name in names {
            if let Some(col) = self.column_index(name) {
                if !columns.contains_key(name) {
                    columns.insert(name.clone(), values.len());
                    values.push(self.values[col].clone());
                }
            }
        }
        Panel {
            dates: self.dates.clone(),
            columns,
            values,
        }
    }
}

fn validate_dates(dates: &[NaiveDate]) -> Result<()> {
    for pair in dates.windows(2) {
        if pair[1] <= pair[0] {
            return Err(BacktestError::config(
                "panel",
                None,
                format!(
                    "dates must be strictly increasing, found {} after {}",
                    pair[1], pair[0]
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn rejects_unsorted_dates() {
        let result = Panel::from_columns(vec![day(2), day(1)], vec![("a", vec![1.0, 2.0])]);
        assert!(matches!(result, Err(BacktestError::Config { .. })));
    }

    #[test]
    fn rejects_duplicate_columns() {
        let result = Panel::from_columns(
            vec![day(1), day(2)],
            vec![("a", vec![1.0, 2.0]), ("a", vec![3.0, 4.0])],
        );
        assert!(result.is_err());
    }

    #[test]
    fn seed_row_is_nan_one_day_before() {
        let panel = Panel::from_rows(
            vec![day(2), day(3)],
            vec!["a", "b"],
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        )
        .unwrap();
        let seeded = panel.with_seed_row();

        assert_eq!(seeded.len(), 3);
        assert_eq!(seeded.dates()[0], day(1));
        assert!(seeded.get(0, "a").unwrap().is_nan());
        assert_eq!(seeded.get(2, "b"), Some(4.0));
    }

    #[test]
    fn row_lookup() {
        let panel =
            Panel::from_columns(vec![day(2), day(5)], vec![("a", vec![1.0, 2.0])]).unwrap();
        assert_eq!(panel.row_of(day(5)), Some(1));
        assert_eq!(panel.row_of(day(3)), None);
        assert_eq!(panel.row_at_or_before(day(3)), Some(0));
        assert_eq!(panel.row_at_or_before(day(1)), None);
    }
}
