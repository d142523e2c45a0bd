/// Column-name constants for the pesticide purchase tables.
/// Single source of truth - exported to Python via PyO3.

// ── Transaction columns (raw and canonical) ─────────────────────────────────
pub mod transaction {
    pub const PACKAGING: &str = "conditionnement";
    pub const POSTAL_CODE: &str = "code_postal_acheteur";
    pub const QUANTITY: &str = "quantite_produit";
    pub const AMM: &str = "amm";
    pub const YEAR: &str = "annee";
    /// Derived by the cleaner from the first two characters of the postal code.
    pub const DEPARTMENT_CODE: &str = "department_code";

    /// Columns every raw transaction file must carry.
    pub const RAW: [&str; 5] = [PACKAGING, POSTAL_CODE, QUANTITY, AMM, YEAR];

    /// Column order of the canonical table.
    pub const CANONICAL: [&str; 6] = [POSTAL_CODE, AMM, QUANTITY, PACKAGING, YEAR, DEPARTMENT_CODE];
}

// ── Commune reference columns ───────────────────────────────────────────────
pub mod commune {
    pub const DEPARTMENT_CODE: &str = "code_departement";
    pub const DEPARTMENT_NAME: &str = "nom_departement";
}

// ── Product reference columns ───────────────────────────────────────────────
pub mod product {
    pub const AMM_NUMBER: &str = "numero AMM";
    pub const NAME: &str = "nom produit";
    pub const FUNCTIONS: &str = "fonctions";
}

// ── Department geometry columns ─────────────────────────────────────────────
pub mod geometry {
    /// GeoJSON feature property holding the department code.
    pub const CODE: &str = "code";
    /// GeoJSON feature property holding the department name.
    pub const NAME: &str = "nom";
    pub const LONGITUDE: &str = "longitude";
    pub const LATITUDE: &str = "latitude";
}

// ── Derived view columns ────────────────────────────────────────────────────
pub mod view {
    pub const DISTINCT_PRODUCTS: &str = "distinct_products";
    pub const TRANSACTION_COUNT: &str = "number_of_transactions";
    pub const NORMALIZED_QUANTITY: &str = "normalized_quantity";
    pub const RED: &str = "red";
    pub const GREEN: &str = "green";
    pub const BLUE: &str = "blue";
    pub const TOTAL: &str = "total";
    pub const COUNT: &str = "count";
}

// ── Ranking metric names ────────────────────────────────────────────────────
pub mod ranking_metric {
    pub const TOTAL_QUANTITY: &str = "total_quantity";
    pub const AVERAGE_QUANTITY: &str = "average_quantity";
    pub const TRANSACTION_COUNT: &str = "transaction_count";
}
