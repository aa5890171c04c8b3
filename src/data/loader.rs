use crate::data::additional::TransactionRecord;
use crate::data::panel::Panel;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use serde::Deserialize;
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Deserialize)]
struct TransactionCsvRecord {
    date: String,
    security: String,
    quantity: f64,
    price: f64,
}

//loads a wide csv (date, col1, col2, ...) into a panel
//empty cells and "nan" become NaN
pub fn load_panel_csv<P: AsRef<Path>>(path: P) -> Result<Panel> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context(format!("Failed to open CSV file: {:?}", path))?;

    let headers = reader
        .headers()
        .context(format!("Failed to read CSV header of {:?}", path))?
        .clone();

    if headers.len() < 2 {
        anyhow::bail!("CSV file {:?} needs a date column and at least one data column", path);
    }

    let columns: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();
    let mut rows: Vec<(NaiveDate, Vec<f64>)> = Vec::new();

    for (index, result) in reader.records().enumerate() {
        let record = result.context(format!("Failed to parse CSV record at line {}", index + 2))?;

        let raw_date = record.get(0).unwrap_or_default().trim();
        let date = NaiveDate::parse_from_str(raw_date, DATE_FORMAT).context(format!(
            "Failed to parse date '{}' at line {}",
            raw_date,
            index + 2
        ))?;

        let mut values = Vec::with_capacity(columns.len());
        for col in 1..=columns.len() {
            values.push(parse_cell(record.get(col).unwrap_or_default()).context(format!(
                "Failed to parse column '{}' at line {}",
                columns[col - 1],
                index + 2
            ))?);
        }
        rows.push((date, values));
    }

    //sort by date to ensure chronological order
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let (dates, values): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
    Panel::from_rows(dates, columns, values).context(format!("Invalid panel in {:?}", path))
}

//loads a transaction blotter (date, security, quantity, price)
pub fn load_transactions_csv<P: AsRef<Path>>(path: P) -> Result<Vec<TransactionRecord>> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context(format!("Failed to open CSV file: {:?}", path))?;

    let mut records = Vec::new();
    for (index, result) in reader.deserialize().enumerate() {
        let record: TransactionCsvRecord =
            result.context(format!("Failed to parse CSV record at line {}", index + 2))?;

        let date = NaiveDate::parse_from_str(record.date.trim(), DATE_FORMAT).context(format!(
            "Failed to parse date '{}' at line {}",
            record.date,
            index + 2
        ))?;

        records.push(TransactionRecord {
            date,
            security: record.security,
            quantity: record.quantity,
            price: record.price,
        });
    }

    records.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(records)
}

//writes a panel as a wide csv
pub fn write_panel_csv<P: AsRef<Path>>(panel: &Panel, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .context(format!("Failed to create CSV file: {:?}", path))?;

    let mut header = vec!["date".to_string()];
    header.extend(panel.column_names());
    writer.write_record(&header)?;

    for (row, date) in panel.dates().iter().enumerate() {
        let mut record = vec![date.format(DATE_FORMAT).to_string()];
        record.extend(panel.row(row).into_iter().map(format_cell));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

//writes transactions in blotter format, readable by load_transactions_csv
pub fn write_transactions_csv<P: AsRef<Path>>(records: &[TransactionRecord], path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .context(format!("Failed to create CSV file: {:?}", path))?;

    writer.write_record(["date", "security", "quantity", "price"])?;
    for record in records {
        writer.write_record(&[
            record.date.format(DATE_FORMAT).to_string(),
            record.security.clone(),
            record.quantity.to_string(),
            record.price.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn parse_cell(raw: &str) -> Result<f64> {
    let cell = raw.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    Ok(cell.parse::<f64>()?)
}

fn format_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}
