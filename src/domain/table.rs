use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Named dataset split as stored by the dataset provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Split {
    Train,
    Test,
}

/// One time step of a station's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
}

/// Time-ordered feature table with a designated target column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub target: usize,
    pub rows: Vec<Observation>,
}

impl Table {
    pub fn new(columns: Vec<String>, target_column: &str, rows: Vec<Observation>) -> anyhow::Result<Self> {
        let target = columns
            .iter()
            .position(|c| c == target_column)
            .ok_or_else(|| anyhow::anyhow!("target column '{}' not in {:?}", target_column, columns))?;

        for (i, row) in rows.iter().enumerate() {
            if row.values.len() != columns.len() {
                anyhow::bail!(
                    "row {} has {} values, expected {}",
                    i,
                    row.values.len(),
                    columns.len()
                );
            }
        }
        if rows.windows(2).any(|w| w[1].timestamp <= w[0].timestamp) {
            anyhow::bail!("rows are not strictly ordered by timestamp");
        }

        Ok(Self { columns, target, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn target_column(&self) -> &str {
        &self.columns[self.target]
    }

    /// Copy of the rows in `range`, same schema.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        Self {
            columns: self.columns.clone(),
            target: self.target,
            rows: self.rows[range].to_vec(),
        }
    }

    /// The most recent `n` rows (or all of them if fewer exist).
    pub fn tail(&self, n: usize) -> Self {
        let start = self.len().saturating_sub(n);
        self.slice(start..self.len())
    }

    pub fn feature_matrix(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.values.clone()).collect()
    }

    pub fn targets(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.values[self.target]).collect()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.rows.last().map(|r| r.timestamp)
    }

    /// Spacing between the two most recent rows; one hour when it cannot be inferred.
    pub fn sampling_interval(&self) -> Duration {
        match self.rows.as_slice() {
            [.., a, b] if b.timestamp > a.timestamp => b.timestamp - a.timestamp,
            _ => Duration::hours(1),
        }
    }

    /// Append the rows of `newer` that come after this table's last timestamp.
    pub fn extend_with_newer(&mut self, newer: Table) -> anyhow::Result<()> {
        if newer.columns != self.columns {
            anyhow::bail!("column mismatch: {:?} vs {:?}", self.columns, newer.columns);
        }
        let cutoff = self.last_timestamp();
        self.rows.extend(
            newer
                .rows
                .into_iter()
                .filter(|r| cutoff.map_or(true, |c| r.timestamp > c)),
        );
        Ok(())
    }
}
