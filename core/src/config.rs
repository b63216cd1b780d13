use crate::{
    histogram::BinSpec,
    spatial::{HexGrid, SpatialIndex},
    types::Coordinate,
};
use serde::{Deserialize, Serialize};

/// File names of the static lookup tables, relative to `{data_dir}/reference`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceFiles {
    pub charge_categories: String,
    pub disposition_codes: String,
    pub refusal_reasons: String,
    pub agencies: String,
    // Optional side tables. Aggregates that need them are skipped when absent.
    #[serde(default)]
    pub jail_inmates: Option<String>,
    #[serde(default)]
    pub bond_amounts: Option<String>,
    #[serde(default)]
    pub ever_filed: Option<String>,
    #[serde(default)]
    pub all_disposed: Option<String>,
    #[serde(default)]
    pub all_not_filed: Option<String>,
}

impl Default for ReferenceFiles {
    fn default() -> Self {
        Self {
            charge_categories: "ChargeCodeCategories.csv".into(),
            disposition_codes: "Disposition Codes.csv".into(),
            refusal_reasons:   "RefusalReasons.csv".into(),
            agencies:          "PD Agency.csv".into(),
            jail_inmates:      Some("JailInmateLibrary.csv".into()),
            bond_amounts:      Some("AllBonds.csv".into()),
            ever_filed:        Some("FiledFileNumbers.csv".into()),
            all_disposed:      Some("AllDisposedFileNumbers.csv".into()),
            all_not_filed:     Some("NotFiledCases.csv".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramConfig {
    /// Defendant age in years at referral.
    pub defendant_age: BinSpec,
    /// Months from entry to disposition (or refusal).
    pub case_age_months: BinSpec,
    /// Initial bond in thousands of dollars.
    pub bond_thousands: BinSpec,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            defendant_age:   BinSpec::new(10.0, 110.0),
            case_age_months: BinSpec::new(10.0, 110.0),
            bond_thousands:  BinSpec::new(15.0, 200.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    pub endpoint: String,
    /// Environment variable holding the API key. Geocoding is skipped if unset.
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    /// Fixed pause between outbound calls (provider rate limit).
    pub delay_ms: u64,
    /// Coordinate stored for addresses that never resolve. Must lie off the grid.
    pub sentinel: Coordinate,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            endpoint:     "https://us1.locationiq.com/v1/search".into(),
            api_key_env:  "LOCATIONIQ_KEY".into(),
            timeout_ms:   10_000,
            max_attempts: 3,
            delay_ms:     1_000,
            sentinel:     Coordinate::new(0.0, 0.0),
        }
    }
}

/// Pointy-top hexagon grid laid over the county.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HexGridConfig {
    /// South-west corner of the grid; centre of cell (0, 0).
    pub origin: Coordinate,
    /// Hex circumradius, in degrees of latitude.
    pub cell_size_deg: f64,
    pub columns: u32,
    pub rows: u32,
}

impl Default for HexGridConfig {
    fn default() -> Self {
        Self {
            origin:        Coordinate::new(38.82, -94.62),
            cell_size_deg: 0.01,
            columns:       24,
            rows:          28,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub reference: ReferenceFiles,
    pub histograms: HistogramConfig,
    pub geocoder: GeocoderConfig,
    pub hex_grid: HexGridConfig,
    /// Sex codes left out of the sex table.
    pub excluded_sex_codes: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            reference:          ReferenceFiles::default(),
            histograms:         HistogramConfig::default(),
            geocoder:           GeocoderConfig::default(),
            hex_grid:           HexGridConfig::default(),
            excluded_sex_codes: vec!["U".into()],
        }
    }
}

impl BatchConfig {
    /// Load `{data_dir}/config/batch.json`. Missing keys take production defaults.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/config/batch.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: BatchConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// In-process configuration for tests: no network pacing, no side tables.
    pub fn default_test() -> Self {
        Self {
            reference: ReferenceFiles {
                jail_inmates:  None,
                bond_amounts:  None,
                ever_filed:    None,
                all_disposed:  None,
                all_not_filed: None,
                ..ReferenceFiles::default()
            },
            geocoder: GeocoderConfig {
                timeout_ms:   500,
                max_attempts: 2,
                delay_ms:     0,
                ..GeocoderConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, spec) in [
            ("defendant_age", &self.histograms.defendant_age),
            ("case_age_months", &self.histograms.case_age_months),
            ("bond_thousands", &self.histograms.bond_thousands),
        ] {
            if spec.width <= 0.0 || spec.ceiling <= spec.width {
                anyhow::bail!("histogram '{name}' needs 0 < width < ceiling");
            }
        }
        if self.geocoder.max_attempts == 0 {
            anyhow::bail!("geocoder.max_attempts must be at least 1");
        }
        if self.hex_grid.cell_size_deg <= 0.0 {
            anyhow::bail!("hex_grid.cell_size_deg must be positive");
        }
        let sentinel = self.geocoder.sentinel;
        if HexGrid::new(&self.hex_grid).cell_of(sentinel).is_some() {
            anyhow::bail!(
                "geocoder.sentinel ({}, {}) lies on the hex grid",
                sentinel.latitude,
                sentinel.longitude
            );
        }
        Ok(())
    }
}
