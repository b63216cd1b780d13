//! Fixed-width histogram binning.
//!
//! Bins are right-open `[lo, lo + width)`, start at 0, and have edges
//! strictly below `ceiling`. Values outside the range clamp into the
//! first or last bin. Non-finite values are not counted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinSpec {
    pub width: f64,
    pub ceiling: f64,
}

impl BinSpec {
    pub fn new(width: f64, ceiling: f64) -> Self {
        Self { width, ceiling }
    }

    /// Bin edges `0, w, 2w, ...` strictly below the ceiling.
    pub fn edges(&self) -> Vec<f64> {
        let mut edges = Vec::new();
        let mut k = 0u32;
        loop {
            let edge = f64::from(k) * self.width;
            if edge >= self.ceiling {
                break;
            }
            edges.push(edge);
            k += 1;
        }
        edges
    }

    pub fn bin_count(&self) -> usize {
        self.edges().len().saturating_sub(1).max(1)
    }

    /// Index of the bin holding `value`, or `None` for NaN/infinite input.
    pub fn bin_index(&self, value: f64) -> Option<usize> {
        if !value.is_finite() {
            return None;
        }
        let last = self.bin_count() - 1;
        if value < 0.0 {
            return Some(0);
        }
        let raw = (value / self.width).floor() as usize;
        Some(raw.min(last))
    }

    pub fn labels(&self) -> Vec<String> {
        let edges = self.edges();
        (0..self.bin_count())
            .map(|i| {
                let lo = edges.get(i).copied().unwrap_or(0.0);
                let hi = edges.get(i + 1).copied().unwrap_or(lo + self.width);
                format!("[{}, {})", trim_float(lo), trim_float(hi))
            })
            .collect()
    }
}

fn trim_float(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Zero-filled bin counts, in bin order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub spec: BinSpec,
    pub counts: Vec<u64>,
}

impl Histogram {
    pub fn empty(spec: BinSpec) -> Self {
        Self {
            spec,
            counts: vec![0; spec.bin_count()],
        }
    }

    pub fn from_values<I: IntoIterator<Item = f64>>(spec: BinSpec, values: I) -> Self {
        let mut hist = Self::empty(spec);
        for v in values {
            hist.add(v);
        }
        hist
    }

    pub fn add(&mut self, value: f64) {
        if let Some(i) = self.spec.bin_index(value) {
            self.counts[i] += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// (label, count) pairs in bin order.
    pub fn rows(&self) -> Vec<(String, u64)> {
        self.spec
            .labels()
            .into_iter()
            .zip(self.counts.iter().copied())
            .collect()
    }
}
