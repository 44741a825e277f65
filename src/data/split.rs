use std::ops::Range;
use std::sync::Arc;

use super::DatasetProvider;
use crate::domain::{EntityId, Table};
use crate::error::LifecycleError;

/// Disjoint, chronologically ordered train/test windows over one history.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowPair {
    pub history: Table,
    pub train: Table,
    pub test: Table,
    pub train_range: Range<usize>,
    pub test_range: Range<usize>,
}

/// Split `history` at `floor(n * train_ratio)`, moving the split point back
/// if needed so each window holds at least `min_rows` rows.
pub fn split_table(
    entity: EntityId,
    history: Table,
    train_ratio: f64,
    min_rows: usize,
) -> Result<WindowPair, LifecycleError> {
    let n = history.len();
    if n == 0 {
        return Err(LifecycleError::data(entity, "no stored history"));
    }
    if !(train_ratio > 0.0 && train_ratio < 1.0) {
        return Err(LifecycleError::Validation(format!(
            "train_ratio must be in (0, 1), got {}",
            train_ratio
        )));
    }
    if n < 2 * min_rows {
        return Err(LifecycleError::data(
            entity,
            format!("history of {} rows is too short, need at least {}", n, 2 * min_rows),
        ));
    }

    let mut split_at = (n as f64 * train_ratio).floor() as usize;
    split_at = split_at.clamp(min_rows, n - min_rows);

    let train_range = 0..split_at;
    let test_range = split_at..n;
    Ok(WindowPair {
        train: history.slice(train_range.clone()),
        test: history.slice(test_range.clone()),
        history,
        train_range,
        test_range,
    })
}

/// Derives a station's train/test windows from its stored history.
#[derive(Clone)]
pub struct WindowSplitter {
    provider: Arc<dyn DatasetProvider>,
    train_ratio: f64,
    lookback: usize,
}

impl WindowSplitter {
    pub fn new(provider: Arc<dyn DatasetProvider>, train_ratio: f64, lookback: usize) -> Self {
        Self {
            provider,
            train_ratio,
            lookback,
        }
    }

    /// Each window needs `lookback + 1` rows to yield one input/target sample.
    pub async fn split(&self, entity: EntityId) -> Result<WindowPair, LifecycleError> {
        let history = self.provider.history(entity).await?;
        split_table(entity, history, self.train_ratio, self.lookback + 1)
    }
}
