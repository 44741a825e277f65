use anyhow::Result;
use std::ops::Range;

use crate::domain::Table;
use crate::ml::{InputShape, MinMaxScaler};

/// Scaled model inputs for one training or evaluation run.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedData {
    pub shape: InputShape,
    pub x_train: Vec<Vec<f64>>,
    pub y_train: Vec<f64>,
    pub x_test: Vec<Vec<f64>>,
    pub y_test: Vec<f64>,
}

/// Slide a `lookback`-row window over `rows`; each flattened window predicts
/// the next row's `target` column.
pub fn create_sequences(rows: &[Vec<f64>], target: usize, lookback: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    if lookback == 0 || rows.len() <= lookback {
        return (Vec::new(), Vec::new());
    }

    rows.windows(lookback + 1)
        .map(|w| {
            let x = w[..lookback].iter().flatten().copied().collect();
            (x, w[lookback][target])
        })
        .unzip()
}

/// Fit `scaler` on the train window (only if it is not fitted yet), scale both
/// windows and build look-back sequences.
///
/// Every test row is a target; the look-back context of the first ones comes
/// from the tail of the train window. Test rows never reach `fit`.
pub fn prepare_model_data(
    dataset: &Table,
    scaler: &mut MinMaxScaler,
    train: &Table,
    test: &Table,
    lookback: usize,
) -> Result<PreparedData> {
    if train.columns != dataset.columns || test.columns != dataset.columns {
        anyhow::bail!("train/test windows do not share the dataset's columns");
    }

    let train_rows = train.feature_matrix();
    if !scaler.is_fitted() {
        scaler.fit(&train_rows)?;
    }

    let scaled_train = scaler.transform(&train_rows)?;
    let context = &scaled_train[scaled_train.len().saturating_sub(lookback)..];
    let mut scaled_test = context.to_vec();
    scaled_test.extend(scaler.transform(&test.feature_matrix())?);

    let (x_train, y_train) = create_sequences(&scaled_train, dataset.target, lookback);
    let (x_test, y_test) = create_sequences(&scaled_test, dataset.target, lookback);

    if x_train.is_empty() || x_test.is_empty() {
        anyhow::bail!(
            "windows of {} and {} rows are too short for look-back {}",
            train.len(),
            test.len(),
            lookback
        );
    }

    Ok(PreparedData {
        shape: InputShape {
            lookback,
            n_features: dataset.n_features(),
        },
        x_train,
        y_train,
        x_test,
        y_test,
    })
}

/// Look-back sequences whose targets are the history rows in `targets`.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSequences {
    /// History row of the first target. Later than `targets.start` when the
    /// rows before it cannot fill a whole look-back.
    pub first_target: usize,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
}

/// Scale `dataset` rows through a fitted `scaler` and build sequences whose
/// targets lie in `targets`, with look-back context taken from the rows
/// before each target. Used to score a model at its own look-back on the
/// same target rows as another model.
pub fn evaluation_sequences(
    dataset: &Table,
    scaler: &MinMaxScaler,
    targets: Range<usize>,
    lookback: usize,
) -> Result<EvaluationSequences> {
    if lookback == 0 {
        anyhow::bail!("look-back must be at least 1");
    }
    let end = targets.end.min(dataset.len());
    let first_target = targets.start.max(lookback);
    if first_target >= end {
        anyhow::bail!(
            "history of {} rows is too short to evaluate look-back {}",
            dataset.len(),
            lookback
        );
    }

    let rows = scaler.transform(&dataset.slice(first_target - lookback..end).feature_matrix())?;
    let (x, y) = create_sequences(&rows, dataset.target, lookback);
    Ok(EvaluationSequences { first_target, x, y })
}
