use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};

use polars::prelude::*;
use tracing::{info, warn};

use crate::error::PesticideError;
use crate::loader::require_columns;
use crate::schema::{commune, product, transaction};

const ROW_INDEX: &str = "__row_index";
const OPTION_SEPARATOR: &str = " - ";

/// Department code → department name, one name per code.
///
/// Built from the commune table. When a code appears with several names the
/// first one seen wins and the conflict is logged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepartmentNames {
    names: BTreeMap<String, String>,
}

impl DepartmentNames {
    pub fn from_communes(communes: &DataFrame) -> Result<Self, PesticideError> {
        require_columns(communes, &[commune::DEPARTMENT_CODE, commune::DEPARTMENT_NAME])?;
        let codes = communes.column(commune::DEPARTMENT_CODE)?.str()?;
        let names = communes.column(commune::DEPARTMENT_NAME)?.str()?;

        let mut lookup: BTreeMap<String, String> = BTreeMap::new();
        let mut conflicts = 0usize;
        for (code, name) in codes.into_iter().zip(names.into_iter()) {
            let (Some(code), Some(name)) = (code.map(str::trim), name.map(str::trim)) else {
                continue;
            };
            match lookup.entry(code.to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert(name.to_string());
                }
                Entry::Occupied(kept) if kept.get() != name => {
                    conflicts += 1;
                    warn!(code = %code, kept = %kept.get(), ignored = %name, "conflicting department name");
                }
                Entry::Occupied(_) => {}
            }
        }

        info!(departments = lookup.len(), conflicts, "built department lookup");
        Ok(Self { names: lookup })
    }

    pub fn get(&self, code: &str) -> Option<&str> {
        self.names.get(code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Entries sorted by code.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().map(|(c, n)| (c.as_str(), n.as_str()))
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.names.clone()
    }

    /// `"<code> - <name>"` labels sorted by code, as offered in a department picker.
    pub fn selection_options(&self) -> Vec<String> {
        self.iter()
            .map(|(code, name)| format!("{code}{OPTION_SEPARATOR}{name}"))
            .collect()
    }

    /// Inverse of [`selection_options`](Self::selection_options): the code part of a label.
    pub fn code_from_option(option: &str) -> &str {
        option
            .split_once(OPTION_SEPARATOR)
            .map_or(option, |(code, _)| code)
            .trim()
    }
}

/// Product reference reduced to one row per AMM number.
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    frame: DataFrame,
}

impl ProductCatalog {
    /// Keep `numero AMM`, `nom produit` and `fonctions`; the first row per AMM wins.
    pub fn from_reference(products: &DataFrame) -> Result<Self, PesticideError> {
        require_columns(products, &[product::AMM_NUMBER, product::NAME, product::FUNCTIONS])?;
        let amms = products.column(product::AMM_NUMBER)?.str()?;
        let names = products.column(product::NAME)?.str()?;
        let functions = products.column(product::FUNCTIONS)?.str()?;

        let mut seen: HashSet<&str> = HashSet::new();
        let mut keep_amm: Vec<&str> = Vec::new();
        let mut keep_name: Vec<Option<&str>> = Vec::new();
        let mut keep_functions: Vec<Option<&str>> = Vec::new();
        let mut duplicates = 0usize;

        let rows = amms
            .into_iter()
            .zip(names.into_iter())
            .zip(functions.into_iter());
        for ((amm, name), function) in rows {
            let Some(amm) = amm.map(str::trim).filter(|a| !a.is_empty()) else {
                continue;
            };
            if !seen.insert(amm) {
                duplicates += 1;
                continue;
            }
            keep_amm.push(amm);
            keep_name.push(name.map(str::trim));
            keep_functions.push(function.map(str::trim));
        }
        if duplicates > 0 {
            warn!(duplicates, "duplicate AMM numbers in product reference; kept first occurrence");
        }

        let frame = DataFrame::new(vec![
            Column::new(product::AMM_NUMBER.into(), &keep_amm),
            Column::new(product::NAME.into(), &keep_name),
            Column::new(product::FUNCTIONS.into(), &keep_functions),
        ])?;
        Ok(Self { frame })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }
}

/// Left join of the canonical transactions to the product catalog.
///
/// Row count and row order of `canonical` are preserved; unmatched rows get
/// null `nom produit` / `fonctions`.
pub fn enrich_transactions(
    canonical: &DataFrame,
    catalog: &ProductCatalog,
) -> Result<DataFrame, PesticideError> {
    require_columns(canonical, &[transaction::AMM])?;

    let mut output: Vec<Expr> = canonical
        .get_column_names_str()
        .iter()
        .map(|c| col(*c))
        .collect();
    output.push(col(product::NAME));
    output.push(col(product::FUNCTIONS));

    let enriched = canonical
        .clone()
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .join(
            catalog.frame().clone().lazy(),
            [col(transaction::AMM)],
            [col(product::AMM_NUMBER)],
            JoinArgs::new(JoinType::Left),
        )
        .sort([ROW_INDEX], SortMultipleOptions::default())
        .select(output)
        .collect()?;

    let matched = enriched.column(product::NAME)?.len() - enriched.column(product::NAME)?.null_count();
    info!(rows = enriched.height(), matched, "joined product metadata");
    Ok(enriched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaner::clean_transactions;

    #[test]
    fn department_names_dedupe_and_keep_first_name() {
        let communes = df![
            commune::DEPARTMENT_CODE => ["29", "29", "35", "01", "35"],
            commune::DEPARTMENT_NAME => ["Finistère", "Finistère", "Ille-et-Vilaine", "Ain", "Ille et Vilaine"],
        ]
        .unwrap();

        let names = DepartmentNames::from_communes(&communes).unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(names.get("35"), Some("Ille-et-Vilaine"));
        assert_eq!(names.get("29"), Some("Finistère"));
        assert_eq!(names.get("75"), None);

        let codes: Vec<&str> = names.iter().map(|(c, _)| c).collect();
        assert_eq!(codes, vec!["01", "29", "35"]);
    }

    #[test]
    fn selection_options_round_trip_to_codes() {
        let communes = df![
            commune::DEPARTMENT_CODE => ["2A", "01"],
            commune::DEPARTMENT_NAME => ["Corse-du-Sud", "Ain"],
        ]
        .unwrap();
        let names = DepartmentNames::from_communes(&communes).unwrap();

        let options = names.selection_options();
        assert_eq!(options, vec!["01 - Ain".to_string(), "2A - Corse-du-Sud".to_string()]);
        assert_eq!(DepartmentNames::code_from_option(&options[1]), "2A");
        assert_eq!(DepartmentNames::code_from_option("29"), "29");
    }

    #[test]
    fn catalog_keeps_first_row_per_amm() {
        let products = df![
            product::AMM_NUMBER => ["1001", "1001", "1002"],
            product::NAME => ["ProduitX", "ProduitX bis", "ProduitY"],
            product::FUNCTIONS => ["Herbicide", "Fongicide", "Insecticide"],
        ]
        .unwrap();
        let catalog = ProductCatalog::from_reference(&products).unwrap();
        assert_eq!(catalog.len(), 2);
        let names = catalog.frame().column(product::NAME).unwrap().str().unwrap();
        assert_eq!(names.get(0), Some("ProduitX"));
    }

    #[test]
    fn left_join_keeps_unmatched_rows_in_order() {
        let raw = df![
            transaction::PACKAGING => ["L", "L", "L"],
            transaction::POSTAL_CODE => ["29000", "35000", "56000"],
            transaction::QUANTITY => ["12", "3", "4"],
            transaction::AMM => ["9999", "1001", "1001"],
            transaction::YEAR => ["2020", "2020", "2021"],
        ]
        .unwrap();
        let (canonical, _) = clean_transactions(&raw).unwrap();
        let products = df![
            product::AMM_NUMBER => ["1001", "1001"],
            product::NAME => ["ProduitX", "Doublon"],
            product::FUNCTIONS => ["Herbicide", "Fongicide"],
        ]
        .unwrap();
        let catalog = ProductCatalog::from_reference(&products).unwrap();

        let enriched = enrich_transactions(&canonical, &catalog).unwrap();
        assert_eq!(enriched.height(), canonical.height());

        let postal = enriched.column(transaction::POSTAL_CODE).unwrap().str().unwrap();
        let names = enriched.column(product::NAME).unwrap().str().unwrap();
        let functions = enriched.column(product::FUNCTIONS).unwrap().str().unwrap();
        assert_eq!(postal.get(0), Some("29000"));
        assert_eq!(names.get(0), None);
        assert_eq!(functions.get(0), None);
        assert_eq!(names.get(1), Some("ProduitX"));
        assert_eq!(functions.get(2), Some("Herbicide"));
    }
}
