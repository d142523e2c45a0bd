//! Canonicalisation of the raw transaction table.
//!
//! Every row goes through two stages:
//! - [`validate`] decides accept/reject and captures the parsed quantity,
//! - [`ValidRow::normalize`] turns an accepted row into a [`CanonicalRow`]
//!   and cannot fail.
//!
//! Quantities containing letters (`nc`, `ns`, `nan`) are rejected on their raw
//! text before any numeric parse is attempted.

use std::collections::BTreeMap;
use std::fmt;

use polars::prelude::*;
use tracing::info;

use crate::error::PesticideError;
use crate::schema::transaction;

const POSTAL_CODE_WIDTH: usize = 5;
const MASS_PACKAGING: &str = "kg";

/// Why a raw row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowRejection {
    MassPackaging,
    MissingPostalCode,
    MalformedPostalCode,
    ZeroPostalCode,
    NonNumericQuantity,
    NegativeQuantity,
    MissingYear,
}

impl fmt::Display for RowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::MassPackaging => "mass_packaging",
            Self::MissingPostalCode => "missing_postal_code",
            Self::MalformedPostalCode => "malformed_postal_code",
            Self::ZeroPostalCode => "zero_postal_code",
            Self::NonNumericQuantity => "non_numeric_quantity",
            Self::NegativeQuantity => "negative_quantity",
            Self::MissingYear => "missing_year",
        };
        f.write_str(label)
    }
}

/// One row of the raw table, borrowed from its string columns.
#[derive(Debug, Clone, Copy)]
pub struct RawRow<'a> {
    pub packaging: Option<&'a str>,
    pub postal_code: Option<&'a str>,
    pub quantity: Option<&'a str>,
    pub amm: Option<&'a str>,
    pub year: Option<&'a str>,
}

/// A row that passed validation. Only [`validate`] builds these.
#[derive(Debug, Clone)]
pub struct ValidRow<'a> {
    packaging: Option<&'a str>,
    postal_code: String,
    quantity: f64,
    amm: Option<&'a str>,
    year: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRow {
    pub postal_code: String,
    pub amm: Option<String>,
    pub quantity: i64,
    pub packaging: Option<String>,
    pub year: String,
    pub department_code: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleaningReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub rejected: BTreeMap<RowRejection, usize>,
}

impl CleaningReport {
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

pub fn validate(row: RawRow<'_>) -> Result<ValidRow<'_>, RowRejection> {
    let packaging = row.packaging.map(str::trim);
    if packaging == Some(MASS_PACKAGING) {
        return Err(RowRejection::MassPackaging);
    }

    let postal_code = row
        .postal_code
        .and_then(pad_postal_code)
        .ok_or(RowRejection::MissingPostalCode)?;
    if !is_well_formed_postal_code(&postal_code) {
        return Err(RowRejection::MalformedPostalCode);
    }
    if postal_code.bytes().all(|b| b == b'0') {
        return Err(RowRejection::ZeroPostalCode);
    }

    let quantity_text = row
        .quantity
        .map(str::trim)
        .ok_or(RowRejection::NonNumericQuantity)?;
    if quantity_text.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(RowRejection::NonNumericQuantity);
    }
    let quantity: f64 = quantity_text
        .parse()
        .map_err(|_| RowRejection::NonNumericQuantity)?;
    if quantity < 0.0 {
        return Err(RowRejection::NegativeQuantity);
    }

    let year = row
        .year
        .map(str::trim)
        .filter(|y| !y.is_empty())
        .ok_or(RowRejection::MissingYear)?;

    Ok(ValidRow {
        packaging,
        postal_code,
        quantity,
        amm: row.amm.map(str::trim).filter(|a| !a.is_empty()),
        year,
    })
}

impl ValidRow<'_> {
    pub fn normalize(self) -> CanonicalRow {
        let department_code = department_code(&self.postal_code);
        CanonicalRow {
            department_code,
            postal_code: self.postal_code,
            amm: self.amm.map(str::to_string),
            // truncation toward zero, not rounding
            quantity: self.quantity.trunc() as i64,
            packaging: self.packaging.map(str::to_string),
            year: normalize_year(self.year),
        }
    }
}

/// Left-pad a postal code to five characters.
///
/// Numeric spellings written by spreadsheet exports (`1000.0`) lose their
/// fractional part first. Returns `None` for blank input.
pub fn pad_postal_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let digits = match trimmed.split_once('.') {
        Some((int, frac)) if frac.bytes().all(|b| b == b'0') && !int.is_empty() => int,
        _ => trimmed,
    };
    Some(format!("{:0>width$}", digits, width = POSTAL_CODE_WIDTH))
}

/// Five digits, or a Corsican `2A`/`2B` prefix followed by three digits.
pub fn is_well_formed_postal_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    if bytes.len() != POSTAL_CODE_WIDTH {
        return false;
    }
    let corsican = bytes[0] == b'2' && matches!(bytes[1], b'A' | b'B');
    let head_ok = corsican || bytes[..2].iter().all(u8::is_ascii_digit);
    head_ok && bytes[2..].iter().all(u8::is_ascii_digit)
}

pub fn department_code(postal_code: &str) -> String {
    postal_code.chars().take(2).collect()
}

fn normalize_year(raw: &str) -> String {
    match raw.split_once('.') {
        Some((int, frac)) if frac.bytes().all(|b| b == b'0') => int.to_string(),
        _ => raw.to_string(),
    }
}

fn text_column(df: &DataFrame, name: &str) -> Result<StringChunked, PesticideError> {
    let column = df
        .column(name)
        .map_err(|_| PesticideError::MissingColumn(name.to_string()))?;
    Ok(column.cast(&DataType::String)?.str()?.clone())
}

/// Filter and coerce a raw transaction table into the canonical shape.
///
/// Accepts both raw (all-string) and canonical input, so running it twice is a
/// no-op on the second pass.
pub fn clean_transactions(raw: &DataFrame) -> Result<(DataFrame, CleaningReport), PesticideError> {
    let packaging = text_column(raw, transaction::PACKAGING)?;
    let postal_codes = text_column(raw, transaction::POSTAL_CODE)?;
    let quantities = text_column(raw, transaction::QUANTITY)?;
    let amms = text_column(raw, transaction::AMM)?;
    let years = text_column(raw, transaction::YEAR)?;

    let mut report = CleaningReport {
        rows_in: raw.height(),
        ..Default::default()
    };
    let mut rows = Vec::with_capacity(raw.height());

    let raw_rows = packaging
        .into_iter()
        .zip(postal_codes.into_iter())
        .zip(quantities.into_iter())
        .zip(amms.into_iter())
        .zip(years.into_iter());
    for ((((packaging, postal_code), quantity), amm), year) in raw_rows {
        let row = RawRow {
            packaging,
            postal_code,
            quantity,
            amm,
            year,
        };
        match validate(row) {
            Ok(valid) => rows.push(valid.normalize()),
            Err(reason) => *report.rejected.entry(reason).or_insert(0) += 1,
        }
    }
    report.rows_out = rows.len();

    info!(
        rows_in = report.rows_in,
        rows_out = report.rows_out,
        rejected = report.rejected_total(),
        "cleaned transactions"
    );

    Ok((canonical_frame(&rows)?, report))
}

/// Build the canonical DataFrame (`transaction::CANONICAL` order).
pub fn canonical_frame(rows: &[CanonicalRow]) -> Result<DataFrame, PesticideError> {
    let postal: Vec<&str> = rows.iter().map(|r| r.postal_code.as_str()).collect();
    let amm: Vec<Option<&str>> = rows.iter().map(|r| r.amm.as_deref()).collect();
    let quantity: Vec<i64> = rows.iter().map(|r| r.quantity).collect();
    let packaging: Vec<Option<&str>> = rows.iter().map(|r| r.packaging.as_deref()).collect();
    let year: Vec<&str> = rows.iter().map(|r| r.year.as_str()).collect();
    let department: Vec<&str> = rows.iter().map(|r| r.department_code.as_str()).collect();

    let df = DataFrame::new(vec![
        Column::new(transaction::POSTAL_CODE.into(), &postal),
        Column::new(transaction::AMM.into(), &amm),
        Column::new(transaction::QUANTITY.into(), &quantity),
        Column::new(transaction::PACKAGING.into(), &packaging),
        Column::new(transaction::YEAR.into(), &year),
        Column::new(transaction::DEPARTMENT_CODE.into(), &department),
    ])?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row<'a>(postal: &'a str, qty: &'a str, pack: &'a str) -> RawRow<'a> {
        RawRow {
            packaging: Some(pack),
            postal_code: Some(postal),
            quantity: Some(qty),
            amm: Some("1001"),
            year: Some("2020"),
        }
    }

    #[test]
    fn postal_codes_are_left_padded() {
        assert_eq!(pad_postal_code("1000").as_deref(), Some("01000"));
        assert_eq!(pad_postal_code("1000.0").as_deref(), Some("01000"));
        assert_eq!(pad_postal_code(" 29000 ").as_deref(), Some("29000"));
        assert_eq!(pad_postal_code("2A004").as_deref(), Some("2A004"));
        assert_eq!(pad_postal_code("  "), None);
    }

    #[test]
    fn malformed_postal_codes_are_rejected() {
        assert!(is_well_formed_postal_code("29000"));
        assert!(is_well_formed_postal_code("2A004"));
        assert!(is_well_formed_postal_code("2B120"));
        assert!(!is_well_formed_postal_code("290001"));
        assert!(!is_well_formed_postal_code("000ab"));
        assert!(!is_well_formed_postal_code("3A000"));

        assert_eq!(
            validate(row("290001", "4", "L")).unwrap_err(),
            RowRejection::MalformedPostalCode
        );
        assert_eq!(
            validate(row("ab", "4", "L")).unwrap_err(),
            RowRejection::MalformedPostalCode
        );
        let corsican = validate(row("2A004", "4", "L")).unwrap().normalize();
        assert_eq!(corsican.department_code, "2A");
    }

    #[test]
    fn rejections_are_classified() {
        assert_eq!(
            validate(row("35000", "7", "kg")).unwrap_err(),
            RowRejection::MassPackaging
        );
        assert_eq!(
            validate(row("0", "5", "L")).unwrap_err(),
            RowRejection::ZeroPostalCode
        );
        assert_eq!(
            validate(row("29200", "nc", "L")).unwrap_err(),
            RowRejection::NonNumericQuantity
        );
        assert_eq!(
            validate(row("29200", "1e3", "L")).unwrap_err(),
            RowRejection::NonNumericQuantity
        );
        assert_eq!(
            validate(row("29200", "-4", "L")).unwrap_err(),
            RowRejection::NegativeQuantity
        );
        let mut no_year = row("29200", "4", "L");
        no_year.year = None;
        assert_eq!(validate(no_year).unwrap_err(), RowRejection::MissingYear);
    }

    #[test]
    fn quantity_is_truncated_not_rounded() {
        let canonical = validate(row("1000", "12.9", "L")).unwrap().normalize();
        assert_eq!(canonical.quantity, 12);
        assert_eq!(canonical.postal_code, "01000");
        assert_eq!(canonical.department_code, "01");
        assert_eq!(canonical.year, "2020");
    }

    #[test]
    fn clean_keeps_only_valid_rows() {
        let raw = df![
            transaction::PACKAGING => ["L", "L", "L", "kg"],
            transaction::POSTAL_CODE => ["29000", "0", "29200", "35000"],
            transaction::QUANTITY => ["12", "5", "nc", "7"],
            transaction::AMM => ["1001", "1002", "1003", "1004"],
            transaction::YEAR => ["2020", "2020", "2020", "2020"],
        ]
        .unwrap();

        let (clean, report) = clean_transactions(&raw).unwrap();
        assert_eq!(clean.height(), 1);
        assert_eq!(report.rows_in, 4);
        assert_eq!(report.rows_out, 1);
        assert_eq!(report.rejected_total(), 3);
        assert_eq!(report.rejected.get(&RowRejection::MassPackaging), Some(&1));

        let postal = clean.column(transaction::POSTAL_CODE).unwrap().str().unwrap();
        let qty = clean.column(transaction::QUANTITY).unwrap().i64().unwrap();
        let dept = clean.column(transaction::DEPARTMENT_CODE).unwrap().str().unwrap();
        assert_eq!(postal.get(0), Some("29000"));
        assert_eq!(qty.get(0), Some(12));
        assert_eq!(dept.get(0), Some("29"));
    }

    #[test]
    fn cleaning_is_idempotent() {
        let raw = df![
            transaction::PACKAGING => [Some("L"), None, Some("kg")],
            transaction::POSTAL_CODE => ["1000", "75001", "35000"],
            transaction::QUANTITY => ["3.7", "10", "1"],
            transaction::AMM => [Some("1001"), None, Some("1004")],
            transaction::YEAR => ["2019", "2021", "2020"],
        ]
        .unwrap();

        let (once, _) = clean_transactions(&raw).unwrap();
        let (twice, report) = clean_transactions(&once).unwrap();
        assert_eq!(report.rejected_total(), 0);
        assert!(once.equals_missing(&twice));
        assert_eq!(once.schema(), twice.schema());
    }

    #[test]
    fn empty_input_yields_empty_canonical_table() {
        let (clean, report) = clean_transactions(&canonical_frame(&[]).unwrap()).unwrap();
        assert_eq!(clean.height(), 0);
        assert_eq!(report.rows_in, 0);
        assert_eq!(clean.get_column_names_str(), transaction::CANONICAL.to_vec());
    }
}
