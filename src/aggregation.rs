use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use polars::lazy::dsl::len;
use polars::prelude::*;

use crate::error::PesticideError;
use crate::geography::DepartmentGeometry;
use crate::loader::require_columns;
use crate::schema::{geometry, product, ranking_metric, transaction, view};

/// Products kept by the per-year breakdown unless told otherwise.
pub const DEFAULT_BREAKDOWN_LIMIT: usize = 30;
/// Minimum transactions per function category unless told otherwise.
pub const DEFAULT_FUNCTION_THRESHOLD: i64 = 10;

// ── Summary ─────────────────────────────────────────────────────────────────

/// Headline figures of the canonical table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "python", pyo3::pyclass(get_all))]
pub struct DatasetSummary {
    pub distinct_products: usize,
    pub total_quantity: i64,
    pub transactions: usize,
    pub distinct_postal_codes: usize,
    pub first_year: Option<String>,
    pub last_year: Option<String>,
}

impl DatasetSummary {
    /// `"2018 - 2021"`, or `None` on an empty table.
    pub fn year_range_label(&self) -> Option<String> {
        match (&self.first_year, &self.last_year) {
            (Some(first), Some(last)) => Some(format!("{first} - {last}")),
            _ => None,
        }
    }
}

pub fn summarize(canonical: &DataFrame) -> Result<DatasetSummary, PesticideError> {
    require_columns(
        canonical,
        &[transaction::AMM, transaction::QUANTITY, transaction::POSTAL_CODE, transaction::YEAR],
    )?;
    let amms = canonical.column(transaction::AMM)?.str()?;
    let quantities = canonical.column(transaction::QUANTITY)?.i64()?;
    let postal_codes = canonical.column(transaction::POSTAL_CODE)?.str()?;
    let years = canonical.column(transaction::YEAR)?.str()?;

    let distinct_products = amms.into_iter().flatten().collect::<HashSet<_>>().len();
    let distinct_postal_codes = postal_codes.into_iter().flatten().collect::<HashSet<_>>().len();

    Ok(DatasetSummary {
        distinct_products,
        total_quantity: quantities.sum().unwrap_or(0),
        transactions: canonical.height(),
        distinct_postal_codes,
        first_year: years.into_iter().flatten().min().map(str::to_string),
        last_year: years.into_iter().flatten().max().map(str::to_string),
    })
}

// ── Postal-code views ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostalOrder {
    /// Ascending postal code, for the sequential chart.
    ByCode,
    /// Largest total first, for the ranked bar chart.
    ByQuantityDesc,
}

/// Total quantity per postal code.
pub fn quantity_by_postal_code(
    canonical: &DataFrame,
    order: PostalOrder,
) -> Result<DataFrame, PesticideError> {
    let grouped = canonical
        .clone()
        .lazy()
        .group_by([col(transaction::POSTAL_CODE)])
        .agg([col(transaction::QUANTITY).sum()]);

    let sorted = match order {
        PostalOrder::ByCode => grouped.sort([transaction::POSTAL_CODE], SortMultipleOptions::default()),
        PostalOrder::ByQuantityDesc => grouped.sort(
            [transaction::QUANTITY, transaction::POSTAL_CODE],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        ),
    };
    Ok(sorted.collect()?)
}

/// Distinct products and total quantity per postal code.
pub fn postal_code_diversity(canonical: &DataFrame) -> Result<DataFrame, PesticideError> {
    let df = canonical
        .clone()
        .lazy()
        .group_by([col(transaction::POSTAL_CODE)])
        .agg([
            col(transaction::AMM)
                .drop_nulls()
                .n_unique()
                .cast(DataType::Int64)
                .alias(view::DISTINCT_PRODUCTS),
            col(transaction::QUANTITY).sum(),
        ])
        .sort([transaction::POSTAL_CODE], SortMultipleOptions::default())
        .collect()?;
    Ok(df)
}

// ── Department colour scale ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// Colour of departments with no purchases on record.
pub const NO_DATA_COLOR: Rgb = Rgb {
    red: 160,
    green: 160,
    blue: 160,
};

/// Linear blue (0.0) to red (1.0) gradient.
pub fn gradient_color(normalized: f64) -> Rgb {
    let red = (255.0 * normalized.clamp(0.0, 1.0)).round() as u8;
    Rgb {
        red,
        green: 0,
        blue: 255 - red,
    }
}

/// Min-max scaling; a degenerate range (max == min) maps to 0.0.
pub fn min_max_normalize(value: i64, min: i64, max: i64) -> f64 {
    if max <= min {
        return 0.0;
    }
    (value - min) as f64 / (max - min) as f64
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepartmentShade {
    pub code: String,
    pub name: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    /// `None` when the department has no purchases.
    pub quantity: Option<i64>,
    pub normalized: Option<f64>,
    pub color: Rgb,
}

/// Per-department totals placed on the department centroids.
///
/// Every geometry yields one shade. Departments without purchases keep
/// [`NO_DATA_COLOR`] and do not take part in the min-max range. Departments
/// present in the purchases but absent from the geometries cannot be placed
/// and are left out.
pub fn department_color_scale(
    canonical: &DataFrame,
    geometries: &[DepartmentGeometry],
) -> Result<Vec<DepartmentShade>, PesticideError> {
    let totals = canonical
        .clone()
        .lazy()
        .group_by([col(transaction::DEPARTMENT_CODE)])
        .agg([col(transaction::QUANTITY).sum()])
        .collect()?;
    let codes = totals.column(transaction::DEPARTMENT_CODE)?.str()?;
    let sums = totals.column(transaction::QUANTITY)?.i64()?;

    let by_code: HashMap<&str, i64> = codes
        .into_iter()
        .zip(sums.into_iter())
        .filter_map(|(code, sum)| Some((code?, sum.unwrap_or(0))))
        .collect();

    let placed: Vec<i64> = geometries
        .iter()
        .filter_map(|g| by_code.get(g.code.as_str()).copied())
        .collect();
    let min = placed.iter().copied().min().unwrap_or(0);
    let max = placed.iter().copied().max().unwrap_or(0);

    let shades = geometries
        .iter()
        .map(|g| {
            let quantity = by_code.get(g.code.as_str()).copied();
            let normalized = quantity.map(|q| min_max_normalize(q, min, max));
            DepartmentShade {
                code: g.code.clone(),
                name: g.name.clone(),
                longitude: g.longitude,
                latitude: g.latitude,
                quantity,
                normalized,
                color: normalized.map_or(NO_DATA_COLOR, gradient_color),
            }
        })
        .collect();
    Ok(shades)
}

pub fn shades_to_frame(shades: &[DepartmentShade]) -> Result<DataFrame, PesticideError> {
    let codes: Vec<&str> = shades.iter().map(|s| s.code.as_str()).collect();
    let names: Vec<Option<&str>> = shades.iter().map(|s| s.name.as_deref()).collect();
    let lons: Vec<f64> = shades.iter().map(|s| s.longitude).collect();
    let lats: Vec<f64> = shades.iter().map(|s| s.latitude).collect();
    let quantities: Vec<Option<i64>> = shades.iter().map(|s| s.quantity).collect();
    let normalized: Vec<Option<f64>> = shades.iter().map(|s| s.normalized).collect();
    let reds: Vec<i32> = shades.iter().map(|s| i32::from(s.color.red)).collect();
    let greens: Vec<i32> = shades.iter().map(|s| i32::from(s.color.green)).collect();
    let blues: Vec<i32> = shades.iter().map(|s| i32::from(s.color.blue)).collect();

    let df = DataFrame::new(vec![
        Column::new(geometry::CODE.into(), &codes),
        Column::new(geometry::NAME.into(), &names),
        Column::new(geometry::LONGITUDE.into(), &lons),
        Column::new(geometry::LATITUDE.into(), &lats),
        Column::new(transaction::QUANTITY.into(), &quantities),
        Column::new(view::NORMALIZED_QUANTITY.into(), &normalized),
        Column::new(view::RED.into(), &reds),
        Column::new(view::GREEN.into(), &greens),
        Column::new(view::BLUE.into(), &blues),
    ])?;
    Ok(df)
}

// ── Department filters ──────────────────────────────────────────────────────

fn mask_by(
    df: &DataFrame,
    column: &str,
    keep: impl Fn(&str) -> bool,
) -> Result<BooleanChunked, PesticideError> {
    let values = df
        .column(column)
        .map_err(|_| PesticideError::MissingColumn(column.to_string()))?
        .str()?;
    Ok(values.into_iter().map(|v| v.is_some_and(&keep)).collect())
}

/// Rows whose postal code starts with `department`.
pub fn filter_department(df: &DataFrame, department: &str) -> Result<DataFrame, PesticideError> {
    let prefix = department.trim();
    if prefix.is_empty() {
        return Err(PesticideError::InvalidArgument(
            "department code must not be empty".into(),
        ));
    }
    let mask = mask_by(df, transaction::POSTAL_CODE, |postal| postal.starts_with(prefix))?;
    Ok(df.filter(&mask)?)
}

/// Total quantity per year within one department, ascending by year.
pub fn quantity_by_year(canonical: &DataFrame, department: &str) -> Result<DataFrame, PesticideError> {
    let df = filter_department(canonical, department)?
        .lazy()
        .group_by([col(transaction::YEAR)])
        .agg([col(transaction::QUANTITY).sum()])
        .sort([transaction::YEAR], SortMultipleOptions::default())
        .collect()?;
    Ok(df)
}

// ── Product ranking ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingMetric {
    TotalQuantity,
    AverageQuantity,
    TransactionCount,
}

impl RankingMetric {
    /// Name of the metric column in the ranking output.
    pub fn column(&self) -> &'static str {
        match self {
            Self::TotalQuantity | Self::AverageQuantity => transaction::QUANTITY,
            Self::TransactionCount => view::TRANSACTION_COUNT,
        }
    }

    fn expr(&self) -> Expr {
        match self {
            Self::TotalQuantity => col(transaction::QUANTITY).sum(),
            Self::AverageQuantity => col(transaction::QUANTITY)
                .cast(DataType::Float64)
                .mean()
                .alias(transaction::QUANTITY),
            Self::TransactionCount => len().cast(DataType::Int64).alias(view::TRANSACTION_COUNT),
        }
    }
}

impl FromStr for RankingMetric {
    type Err = PesticideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ranking_metric::TOTAL_QUANTITY | "sum" => Ok(Self::TotalQuantity),
            ranking_metric::AVERAGE_QUANTITY | "mean" => Ok(Self::AverageQuantity),
            ranking_metric::TRANSACTION_COUNT | "count" => Ok(Self::TransactionCount),
            other => Err(PesticideError::InvalidArgument(format!(
                "Invalid ranking metric: '{other}'. Must be '{}', '{}' or '{}'",
                ranking_metric::TOTAL_QUANTITY,
                ranking_metric::AVERAGE_QUANTITY,
                ranking_metric::TRANSACTION_COUNT
            ))),
        }
    }
}

impl fmt::Display for RankingMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TotalQuantity => ranking_metric::TOTAL_QUANTITY,
            Self::AverageQuantity => ranking_metric::AVERAGE_QUANTITY,
            Self::TransactionCount => ranking_metric::TRANSACTION_COUNT,
        })
    }
}

/// Top `n` (product name, function) groups by `metric`.
///
/// Transactions without product metadata are not ranked. Equal metric values
/// are ordered by product name, then function.
pub fn top_products(
    enriched: &DataFrame,
    metric: RankingMetric,
    n: usize,
) -> Result<DataFrame, PesticideError> {
    require_columns(enriched, &[product::NAME, product::FUNCTIONS])?;
    let limit = IdxSize::try_from(n).unwrap_or(IdxSize::MAX);

    let df = enriched
        .clone()
        .lazy()
        .filter(
            col(product::NAME)
                .is_not_null()
                .and(col(product::FUNCTIONS).is_not_null()),
        )
        .group_by([col(product::NAME), col(product::FUNCTIONS)])
        .agg([metric.expr()])
        .sort(
            [metric.column(), product::NAME, product::FUNCTIONS],
            SortMultipleOptions::default().with_order_descending_multi([true, false, false]),
        )
        .limit(limit)
        .collect()?;
    Ok(df)
}

// ── Per-product, per-year breakdown ─────────────────────────────────────────

/// Inclusive, contiguous range of purchase years.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearRange {
    start: u16,
    end: u16,
}

impl YearRange {
    /// `start..=end`, which must lie within the span of `available` years.
    pub fn new<S: AsRef<str>>(start: u16, end: u16, available: &[S]) -> Result<Self, PesticideError> {
        if start > end {
            return Err(PesticideError::InvalidArgument(format!(
                "year range start {start} is after end {end}"
            )));
        }
        let known: Vec<u16> = available
            .iter()
            .filter_map(|y| y.as_ref().trim().parse().ok())
            .collect();
        let (Some(&first), Some(&last)) = (known.iter().min(), known.iter().max()) else {
            return Err(PesticideError::InvalidArgument(
                "no purchase years configured".into(),
            ));
        };
        if start < first || end > last {
            return Err(PesticideError::InvalidArgument(format!(
                "year range {start}-{end} is outside {first}-{last}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn years(&self) -> Vec<String> {
        (self.start..=self.end).map(|y| y.to_string()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductYearRow {
    pub product: String,
    /// One entry per year of the range, zero when nothing was bought.
    pub quantities: Vec<i64>,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductYearBreakdown {
    pub years: Vec<String>,
    pub products: Vec<ProductYearRow>,
}

impl ProductYearBreakdown {
    /// Wide table: product name, one column per year, then the total.
    pub fn to_frame(&self) -> Result<DataFrame, PesticideError> {
        let names: Vec<&str> = self.products.iter().map(|p| p.product.as_str()).collect();
        let mut columns = vec![Column::new(product::NAME.into(), &names)];
        for (i, year) in self.years.iter().enumerate() {
            let values: Vec<i64> = self.products.iter().map(|p| p.quantities[i]).collect();
            columns.push(Column::new(year.as_str().into(), &values));
        }
        let totals: Vec<i64> = self.products.iter().map(|p| p.total).collect();
        columns.push(Column::new(view::TOTAL.into(), &totals));
        Ok(DataFrame::new(columns)?)
    }
}

/// Products bought in one department over a year range, as a product × year grid.
///
/// Keeps the `limit` products with the largest total over the range, largest
/// first (ties by name). Products without purchases in the range are absent.
pub fn product_year_breakdown(
    enriched: &DataFrame,
    department: &str,
    range: YearRange,
    limit: usize,
) -> Result<ProductYearBreakdown, PesticideError> {
    require_columns(enriched, &[product::NAME, transaction::YEAR])?;
    let years = range.years();
    let year_index: HashMap<&str, usize> = years
        .iter()
        .enumerate()
        .map(|(i, y)| (y.as_str(), i))
        .collect();

    let in_department = filter_department(enriched, department)?;
    let in_range = mask_by(&in_department, transaction::YEAR, |y| year_index.contains_key(y))?;
    let grouped = in_department
        .filter(&in_range)?
        .lazy()
        .filter(col(product::NAME).is_not_null())
        .group_by([col(product::NAME), col(transaction::YEAR)])
        .agg([col(transaction::QUANTITY).sum()])
        .collect()?;

    let names = grouped.column(product::NAME)?.str()?;
    let group_years = grouped.column(transaction::YEAR)?.str()?;
    let sums = grouped.column(transaction::QUANTITY)?.i64()?;

    let mut grid: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
    let cells = names
        .into_iter()
        .zip(group_years.into_iter())
        .zip(sums.into_iter());
    for ((name, year), sum) in cells {
        let (Some(name), Some(&slot)) = (name, year.and_then(|y| year_index.get(y))) else {
            continue;
        };
        grid.entry(name).or_insert_with(|| vec![0; years.len()])[slot] += sum.unwrap_or(0);
    }

    let mut products: Vec<ProductYearRow> = grid
        .into_iter()
        .map(|(name, quantities)| ProductYearRow {
            product: name.to_string(),
            total: quantities.iter().sum(),
            quantities,
        })
        .collect();
    // stable: equal totals stay in name order
    products.sort_by(|a, b| b.total.cmp(&a.total));
    products.truncate(limit);

    Ok(ProductYearBreakdown { years, products })
}

// ── Function categories ─────────────────────────────────────────────────────

/// Transactions per `fonctions` category, keeping categories with at least
/// `threshold` transactions, most frequent first.
pub fn function_counts(enriched: &DataFrame, threshold: i64) -> Result<DataFrame, PesticideError> {
    require_columns(enriched, &[product::FUNCTIONS])?;
    let df = enriched
        .clone()
        .lazy()
        .filter(col(product::FUNCTIONS).is_not_null())
        .group_by([col(product::FUNCTIONS)])
        .agg([len().cast(DataType::Int64).alias(view::COUNT)])
        .filter(col(view::COUNT).gt_eq(lit(threshold)))
        .sort(
            [view::COUNT, product::FUNCTIONS],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .collect()?;
    Ok(df)
}
