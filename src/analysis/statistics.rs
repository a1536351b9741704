/// Summary statistics and Pearson correlation over a result set.
///
/// Unlike the moving average, these count zeros as ordinary values; only
/// missing and NaN values are left out.

use serde::{Serialize, Serializer};

use crate::model::{Field, Record};

use super::series::clean_values;

// ---------------------------------------------------------------------------
// Per-field summary
// ---------------------------------------------------------------------------

/// `min`/`max` are NaN when `count` is 0 and serialize as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldSummary {
    pub field: Field,
    pub mean: f64,
    pub std_dev: f64,
    #[serde(serialize_with = "nan_as_null")]
    pub min: f64,
    #[serde(serialize_with = "nan_as_null")]
    pub max: f64,
    pub count: usize,
}

fn nan_as_null<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_nan() {
        serializer.serialize_none()
    } else {
        serializer.serialize_f64(*value)
    }
}

impl FieldSummary {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Mean, population standard deviation, min, max and count of the present
/// values.
pub fn summarize(field: Field, values: &[Option<f64>]) -> FieldSummary {
    let present: Vec<f64> = values.iter().flatten().copied().filter(|v| !v.is_nan()).collect();
    if present.is_empty() {
        return FieldSummary {
            field,
            mean: 0.0,
            std_dev: 0.0,
            min: f64::NAN,
            max: f64::NAN,
            count: 0,
        };
    }

    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    FieldSummary {
        field,
        mean,
        std_dev: variance.sqrt(),
        min: present.iter().copied().fold(f64::INFINITY, f64::min),
        max: present.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        count: present.len(),
    }
}

pub fn summarize_fields(records: &[Record], fields: &[Field]) -> Vec<FieldSummary> {
    fields
        .iter()
        .map(|&field| summarize(field, &clean_values(records, field)))
        .collect()
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

/// Pearson correlation over the positions where both series have a value.
///
/// Fewer than two complete pairs, or no variance in either series, gives 0.
/// Two identical non-constant series give exactly 1.
pub fn pearson_correlation(xs: &[Option<f64>], ys: &[Option<f64>]) -> f64 {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter_map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) if !x.is_nan() && !y.is_nan() => Some((*x, *y)),
            _ => None,
        })
        .collect();
    if pairs.len() < 2 {
        return 0.0;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    if pairs.iter().all(|(x, y)| x == y) {
        return 1.0;
    }

    (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0)
}

/// Symmetric correlation matrix over `fields`, in the given order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub fields: Vec<Field>,
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: Field, b: Field) -> Option<f64> {
        let i = self.fields.iter().position(|f| *f == a)?;
        let j = self.fields.iter().position(|f| *f == b)?;
        Some(self.values[i][j])
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Computes the upper triangle and mirrors it. The diagonal is 1.
pub fn correlation_matrix(records: &[Record], fields: &[Field]) -> CorrelationMatrix {
    let columns: Vec<Vec<Option<f64>>> = fields
        .iter()
        .map(|&field| clean_values(records, field))
        .collect();
    let k = fields.len();
    let mut values = vec![vec![0.0; k]; k];

    for i in 0..k {
        values[i][i] = 1.0;
        for j in (i + 1)..k {
            let r = pearson_correlation(&columns[i], &columns[j]);
            values[i][j] = r;
            values[j][i] = r;
        }
    }

    CorrelationMatrix {
        fields: fields.to_vec(),
        values,
    }
}
