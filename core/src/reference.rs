//! Reference data loader.
//!
//! Static lookup tables are read once per batch and handed to every
//! aggregate by reference. A missing or unreadable table is fatal; blank
//! keys or labels inside a table are skipped.

use crate::{
    config::ReferenceFiles,
    error::{BatchError, BatchResult},
    record::normalize_code,
    types::CaseId,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    /// Ref. Charge Code → category label ("Drugs", "Homicide", ...).
    pub charge_categories: HashMap<String, String>,
    /// Disp. Code → disposition reason label.
    pub disposition_reasons: HashMap<String, String>,
    /// Disp. Code on a not-filed row → refusal reason label.
    pub refusal_reasons: HashMap<String, String>,
    /// Agency code → agency name.
    pub agency_names: HashMap<String, String>,
}

impl ReferenceData {
    pub fn load(reference_dir: &Path, files: &ReferenceFiles) -> BatchResult<Self> {
        let refs = Self {
            charge_categories: load_key_value(
                &reference_dir.join(&files.charge_categories),
                "Ref. Charge Code",
                "Category",
            )?,
            disposition_reasons: load_key_value(
                &reference_dir.join(&files.disposition_codes),
                "Disp. Code",
                "Reason",
            )?,
            refusal_reasons: load_key_value(
                &reference_dir.join(&files.refusal_reasons),
                "Disp. Code",
                "Reason",
            )?,
            agency_names: load_key_value(
                &reference_dir.join(&files.agencies),
                "Agency",
                "PD NAME",
            )?,
        };
        log::info!(
            "reference data: {} charge codes, {} disposition codes, {} refusal codes, {} agencies",
            refs.charge_categories.len(),
            refs.disposition_reasons.len(),
            refs.refusal_reasons.len(),
            refs.agency_names.len(),
        );
        Ok(refs)
    }

    pub fn category_of(&self, charge_code: &str) -> Option<&str> {
        self.charge_categories
            .get(&normalize_code(charge_code))
            .map(String::as_str)
    }

    pub fn disposition_reason(&self, code: &str) -> Option<&str> {
        self.disposition_reasons
            .get(&normalize_code(code))
            .map(String::as_str)
    }

    pub fn refusal_reason(&self, code: &str) -> Option<&str> {
        self.refusal_reasons
            .get(&normalize_code(code))
            .map(String::as_str)
    }

    pub fn agency_name(&self, code: &str) -> Option<&str> {
        self.agency_names
            .get(&normalize_code(code))
            .map(String::as_str)
    }

    /// Distinct category labels, sorted.
    pub fn categories(&self) -> Vec<String> {
        self.charge_categories
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Side tables joined onto cases by `File #`. Each one is optional.
#[derive(Debug, Clone, Default)]
pub struct ExternalLookups {
    /// File # → jail inmate number, for defendants currently held.
    pub inmates: HashMap<CaseId, String>,
    /// File # → initial bond in dollars.
    pub bonds: HashMap<CaseId, f64>,
    /// Every File # ever filed, across all years.
    pub ever_filed: HashSet<CaseId>,
    /// Every File # ever disposed.
    pub all_disposed: HashSet<CaseId>,
    /// Every File # ever declined.
    pub all_not_filed: HashSet<CaseId>,
}

impl ExternalLookups {
    pub fn load(reference_dir: &Path, files: &ReferenceFiles) -> BatchResult<Self> {
        let mut lookups = Self::default();
        if let Some(name) = &files.jail_inmates {
            lookups.inmates = load_key_value(&reference_dir.join(name), "File #", "InmateNum")?;
        }
        if let Some(name) = &files.bond_amounts {
            lookups.bonds = load_key_value(&reference_dir.join(name), "File #", "Initial Bond")?
                .into_iter()
                .filter_map(|(file, raw)| parse_amount(&raw).map(|amount| (file, amount)))
                .collect();
        }
        if let Some(name) = &files.ever_filed {
            lookups.ever_filed = load_key_set(&reference_dir.join(name), "File #")?;
        }
        if let Some(name) = &files.all_disposed {
            lookups.all_disposed = load_key_set(&reference_dir.join(name), "File #")?;
        }
        if let Some(name) = &files.all_not_filed {
            lookups.all_not_filed = load_key_set(&reference_dir.join(name), "File #")?;
        }
        Ok(lookups)
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn reference_err(path: &Path, reason: impl Into<String>) -> BatchError {
    BatchError::ReferenceFile {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

fn open_table(path: &Path) -> BatchResult<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| reference_err(path, e.to_string()))
}

fn column_index(headers: &csv::StringRecord, path: &Path, name: &str) -> BatchResult<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| reference_err(path, format!("missing column '{name}'")))
}

/// Two-column lookup. Later duplicates of a key are ignored.
pub fn load_key_value(
    path: &Path,
    key_column: &str,
    value_column: &str,
) -> BatchResult<HashMap<String, String>> {
    let mut reader = open_table(path)?;
    let headers = reader.headers()?.clone();
    let key_idx = column_index(&headers, path, key_column)?;
    let value_idx = column_index(&headers, path, value_column)?;

    let mut map = HashMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| reference_err(path, e.to_string()))?;
        let key = record.get(key_idx).map(normalize_code).unwrap_or_default();
        let value = record.get(value_idx).unwrap_or_default().trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        map.entry(key).or_insert_with(|| value.to_string());
    }
    log::debug!("{}: {} entries", path.display(), map.len());
    Ok(map)
}

pub fn load_key_set(path: &Path, key_column: &str) -> BatchResult<HashSet<String>> {
    let mut reader = open_table(path)?;
    let headers = reader.headers()?.clone();
    let key_idx = column_index(&headers, path, key_column)?;

    let mut keys = HashSet::new();
    for record in reader.records() {
        let record = record.map_err(|e| reference_err(path, e.to_string()))?;
        if let Some(key) = record.get(key_idx).map(normalize_code) {
            if !key.is_empty() {
                keys.insert(key);
            }
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_tolerate_currency_formatting() {
        assert_eq!(parse_amount("$25,000.00"), Some(25_000.0));
        assert_eq!(parse_amount(" 1500 "), Some(1500.0));
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn lookups_normalise_spreadsheet_codes() {
        let mut refs = ReferenceData::default();
        refs.agency_names.insert("2".into(), "Kansas City PD".into());
        assert_eq!(refs.agency_name("2.0"), Some("Kansas City PD"));
        assert_eq!(refs.agency_name("7"), None);
    }
}
