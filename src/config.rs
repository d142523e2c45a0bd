use std::env;
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;

use crate::error::PesticideError;

/// Purchase years, visited newest first.
pub const YEARS: [&str; 4] = ["2021", "2020", "2019", "2018"];

/// Regions as spelled in the BNVD extract file names.
pub const REGIONS: [&str; 19] = [
    "AUVERGNE RHONE ALPES",
    "BOURGOGNE FRANCHE COMTE",
    "BRETAGNE",
    "CENTRE VAL DE LOIRE",
    "CORSE",
    "GRAND EST",
    "GUADELOUPE",
    "GUYANE",
    "HAUTS DE FRANCE",
    "ILE DE FRANCE",
    "INDETERMINE",
    "LA REUNION",
    "MARTINIQUE",
    "MAYOTTE",
    "NORMANDIE",
    "NOUVELLE AQUITAINE",
    "OCCITANIE",
    "PAYS DE LA LOIRE",
    "PROVENCE ALPES COTE D AZUR",
];

pub const DEFAULT_TRANSACTION_PREFIX: &str = "BNVD_TRACABILITE_20221016_ACHAT_CP_PRODUIT";

/// Delimiter and text encoding of one delimited input file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CsvFormat {
    pub separator: u8,
    pub encoding: &'static Encoding,
}

impl CsvFormat {
    pub fn new(separator: u8, encoding: &'static Encoding) -> Self {
        Self {
            separator,
            encoding,
        }
    }

    pub fn utf8(separator: u8) -> Self {
        Self::new(separator, encoding_rs::UTF_8)
    }

    /// Swap the encoding using a WHATWG label (`utf-8`, `windows-1252`, `latin1`, ...).
    pub fn with_encoding_label(self, label: &str) -> Result<Self, PesticideError> {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| PesticideError::Config(format!("Unknown encoding label: '{label}'")))?;
        Ok(Self { encoding, ..self })
    }

    pub fn is_utf8(&self) -> bool {
        self.encoding == encoding_rs::UTF_8
    }
}

/// Every input of the pipeline: where the files live and how to read them.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub transactions_dir: PathBuf,
    pub transaction_prefix: String,
    pub transaction_extension: String,
    pub transaction_format: CsvFormat,
    pub regions: Vec<String>,
    pub years: Vec<String>,
    pub communes_path: PathBuf,
    pub communes_format: CsvFormat,
    pub products_path: PathBuf,
    pub products_format: CsvFormat,
    pub geometry_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::with_base_dir(".")
    }
}

impl PipelineConfig {
    /// Conventional layout under `base`: CSV extracts in `csv/`, geometries in `json/`.
    pub fn with_base_dir(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let csv_dir = base.join("csv");
        Self {
            transactions_dir: csv_dir.clone(),
            transaction_prefix: DEFAULT_TRANSACTION_PREFIX.to_string(),
            transaction_extension: "csv".to_string(),
            transaction_format: CsvFormat::utf8(b';'),
            regions: REGIONS.iter().map(|r| r.to_string()).collect(),
            years: YEARS.iter().map(|y| y.to_string()).collect(),
            communes_path: csv_dir.join("communes-departement-region.csv"),
            communes_format: CsvFormat::utf8(b','),
            products_path: csv_dir.join("produits_Windows-1252.csv"),
            products_format: CsvFormat::new(b';', encoding_rs::WINDOWS_1252),
            geometry_path: base.join("json").join("departements.geojson"),
        }
    }

    /// Build from the environment, reading a `.env` file first if one exists.
    pub fn from_env() -> Result<Self, PesticideError> {
        let _ = dotenvy::dotenv();

        let base = env::var("PESTICIDES_DATA_DIR").unwrap_or_else(|_| ".".to_string());
        let mut config = Self::with_base_dir(base);

        if let Ok(dir) = env::var("PESTICIDES_TRANSACTIONS_DIR") {
            config.transactions_dir = PathBuf::from(dir);
        }
        if let Ok(prefix) = env::var("PESTICIDES_TRANSACTION_PREFIX") {
            config.transaction_prefix = prefix;
        }
        if let Ok(path) = env::var("PESTICIDES_COMMUNES_FILE") {
            config.communes_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("PESTICIDES_PRODUCTS_FILE") {
            config.products_path = PathBuf::from(path);
        }
        if let Ok(label) = env::var("PESTICIDES_PRODUCTS_ENCODING") {
            config.products_format = config.products_format.with_encoding_label(&label)?;
        }
        if let Ok(path) = env::var("PESTICIDES_GEOMETRY_FILE") {
            config.geometry_path = PathBuf::from(path);
        }

        Ok(config)
    }

    /// `<dir>/<prefix>_<REGION>_<YEAR>.<ext>`
    pub fn transaction_path(&self, region: &str, year: &str) -> PathBuf {
        self.transactions_dir.join(format!(
            "{}_{}_{}.{}",
            self.transaction_prefix, region, year, self.transaction_extension
        ))
    }

    /// Every expected transaction file, years outer and regions inner.
    pub fn transaction_files(&self) -> Vec<TransactionFile> {
        let mut files = Vec::with_capacity(self.years.len() * self.regions.len());
        for year in &self.years {
            for region in &self.regions {
                files.push(TransactionFile {
                    region: region.clone(),
                    year: year.clone(),
                    path: self.transaction_path(region, year),
                });
            }
        }
        files
    }

    /// Reference inputs whose absence aborts the pipeline.
    pub fn reference_paths(&self) -> [&Path; 3] {
        [
            self.communes_path.as_path(),
            self.products_path.as_path(),
            self.geometry_path.as_path(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionFile {
    pub region: String,
    pub year: String,
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_path_follows_naming_template() {
        let config = PipelineConfig::with_base_dir("/data");
        let path = config.transaction_path("BRETAGNE", "2020");
        assert_eq!(
            path,
            PathBuf::from(
                "/data/csv/BNVD_TRACABILITE_20221016_ACHAT_CP_PRODUIT_BRETAGNE_2020.csv"
            )
        );
    }

    #[test]
    fn transaction_files_iterate_years_then_regions() {
        let config = PipelineConfig::default();
        let files = config.transaction_files();
        assert_eq!(files.len(), 76);
        assert_eq!(files[0].year, "2021");
        assert_eq!(files[0].region, "AUVERGNE RHONE ALPES");
        assert_eq!(files[1].year, "2021");
        assert_eq!(files[1].region, "BOURGOGNE FRANCHE COMTE");
        assert_eq!(files[19].year, "2020");
        assert_eq!(files[75].region, "PROVENCE ALPES COTE D AZUR");
    }

    #[test]
    fn product_reference_defaults_to_windows_1252() {
        let config = PipelineConfig::default();
        assert_eq!(config.products_format.separator, b';');
        assert_eq!(config.products_format.encoding, encoding_rs::WINDOWS_1252);
        assert!(config.communes_format.is_utf8());
    }

    // Every PESTICIDES_* variable is touched only here.
    #[test]
    fn environment_overrides_defaults() {
        const VARS: [&str; 7] = [
            "PESTICIDES_DATA_DIR",
            "PESTICIDES_TRANSACTIONS_DIR",
            "PESTICIDES_TRANSACTION_PREFIX",
            "PESTICIDES_COMMUNES_FILE",
            "PESTICIDES_PRODUCTS_FILE",
            "PESTICIDES_PRODUCTS_ENCODING",
            "PESTICIDES_GEOMETRY_FILE",
        ];
        for var in VARS {
            env::remove_var(var);
        }

        env::set_var("PESTICIDES_DATA_DIR", "/data");
        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.transactions_dir, PathBuf::from("/data/csv"));
        assert_eq!(
            config.communes_path,
            PathBuf::from("/data/csv/communes-departement-region.csv")
        );
        assert_eq!(config.geometry_path, PathBuf::from("/data/json/departements.geojson"));

        env::set_var("PESTICIDES_TRANSACTIONS_DIR", "/extracts");
        env::set_var("PESTICIDES_TRANSACTION_PREFIX", "BNVD_2023");
        env::set_var("PESTICIDES_COMMUNES_FILE", "/ref/communes.csv");
        env::set_var("PESTICIDES_PRODUCTS_FILE", "/ref/produits.csv");
        env::set_var("PESTICIDES_PRODUCTS_ENCODING", "utf-8");
        env::set_var("PESTICIDES_GEOMETRY_FILE", "/geo/departements.geojson");
        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.transactions_dir, PathBuf::from("/extracts"));
        assert_eq!(config.transaction_prefix, "BNVD_2023");
        assert_eq!(
            config.transaction_path("CORSE", "2019"),
            PathBuf::from("/extracts/BNVD_2023_CORSE_2019.csv")
        );
        assert_eq!(config.communes_path, PathBuf::from("/ref/communes.csv"));
        assert_eq!(config.products_path, PathBuf::from("/ref/produits.csv"));
        assert!(config.products_format.is_utf8());
        assert_eq!(config.products_format.separator, b';');
        assert_eq!(config.geometry_path, PathBuf::from("/geo/departements.geojson"));

        env::set_var("PESTICIDES_PRODUCTS_ENCODING", "klingon");
        let result = PipelineConfig::from_env();

        for var in VARS {
            env::remove_var(var);
        }
        assert!(matches!(result, Err(PesticideError::Config(_))));
    }

    #[test]
    fn encoding_labels_resolve() {
        let format = CsvFormat::utf8(b';')
            .with_encoding_label("latin1")
            .unwrap();
        assert_eq!(format.encoding, encoding_rs::WINDOWS_1252);
        assert!(CsvFormat::utf8(b';').with_encoding_label("klingon").is_err());
    }
}
