// External crates
use log::info;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

// Internal imports
use crate::error::DataError;
use crate::gru::step_1_tensor_preparation::{FeatureEncoding, SequenceDataset};

/// Reads a sequence dataset from a CSV file
///
/// Every column except the last holds the sequence values, row-major by time step;
/// the last column is the integer class label.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
/// * `has_header` - Whether the first line names the columns
/// * `sequence_length` - Time steps per row
/// * `encoding` - How the sequence values are interpreted
/// * `num_classes` - Number of label classes
pub fn read_sequence_csv<P: AsRef<Path>>(
    file_path: P,
    has_header: bool,
    sequence_length: usize,
    encoding: FeatureEncoding,
    num_classes: usize,
) -> Result<SequenceDataset, DataError> {
    let path = file_path.as_ref();
    let read_error = |source: PolarsError| DataError::Read {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|e| read_error(e.into()))?;
    let df = CsvReadOptions::default()
        .with_has_header(has_header)
        .into_reader_with_file_handle(file)
        .finish()
        .map_err(read_error)?;

    let feature_columns = sequence_length * encoding.values_per_step();
    if df.width() != feature_columns + 1 {
        return Err(DataError::ColumnCount {
            path: path.to_path_buf(),
            expected: feature_columns + 1,
            actual: df.width(),
        });
    }
    if df.height() == 0 {
        return Err(DataError::Empty);
    }

    // Column-wise f64 copies of the frame
    let mut columns = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        let series = column
            .as_materialized_series()
            .cast(&DataType::Float64)
            .map_err(read_error)?;
        let values: Vec<Option<f64>> = series.f64().map_err(read_error)?.into_iter().collect();
        columns.push(values);
    }

    let (label_column, feature_columns) = columns.split_last().ok_or(DataError::Empty)?;

    let mut features = Vec::with_capacity(df.height() * feature_columns.len());
    let mut labels = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        for column in feature_columns {
            let value = column[row].ok_or(DataError::MissingValue { row })?;
            features.push(value as f32);
        }

        let label = label_column[row].ok_or(DataError::MissingValue { row })?;
        if label < 0.0 || label.fract() != 0.0 || label as usize >= num_classes {
            return Err(DataError::LabelOutOfRange {
                row,
                value: label as f32,
                num_classes,
            });
        }
        labels.push(label as usize);
    }

    info!("Loaded {} sequences from {}", labels.len(), path.display());
    SequenceDataset::new(features, labels, sequence_length, encoding, num_classes)
}
