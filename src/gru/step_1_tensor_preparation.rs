// External imports
use burn::tensor::{backend::Backend, Tensor, TensorData};
use serde::{Deserialize, Serialize};

// Internal imports
use crate::error::DataError;

/// How each time step of a raw row becomes a feature vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum FeatureEncoding {
    /// One categorical symbol per time step, expanded to a one-hot vector of `depth`.
    OneHot { depth: usize },
    /// `input_size` numeric values per time step, used as-is.
    Raw { input_size: usize },
}

impl FeatureEncoding {
    /// Width of the encoded feature vector (D)
    pub fn input_size(&self) -> usize {
        match *self {
            FeatureEncoding::OneHot { depth } => depth,
            FeatureEncoding::Raw { input_size } => input_size,
        }
    }

    /// Number of raw values stored per time step
    pub fn values_per_step(&self) -> usize {
        match *self {
            FeatureEncoding::OneHot { .. } => 1,
            FeatureEncoding::Raw { input_size } => input_size,
        }
    }
}

/// Label layout expected by each classifier head.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelEncoding {
    /// 1.0 at the true class, 0.0 elsewhere (softmax head)
    OneHot,
    /// +1.0 at the true class, -1.0 elsewhere (SVM head)
    Signed,
}

/// A host-side mini-batch: `rows` raw sequences plus their class labels.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceBatch {
    pub features: Vec<f32>,
    pub labels: Vec<usize>,
    pub rows: usize,
}

impl SequenceBatch {
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// In-memory dataset of fixed-length sequences, sliced by offset.
#[derive(Clone, Debug)]
pub struct SequenceDataset {
    features: Vec<f32>,
    labels: Vec<usize>,
    row_width: usize,
}

impl SequenceDataset {
    /// Builds a dataset, checking every symbol and label against the encoding.
    ///
    /// `features` holds `labels.len()` rows of `sequence_length * encoding.values_per_step()` values.
    pub fn new(
        features: Vec<f32>,
        labels: Vec<usize>,
        sequence_length: usize,
        encoding: FeatureEncoding,
        num_classes: usize,
    ) -> Result<Self, DataError> {
        if labels.is_empty() {
            return Err(DataError::Empty);
        }

        let row_width = sequence_length * encoding.values_per_step();
        if features.len() != labels.len() * row_width {
            return Err(DataError::ColumnCount {
                path: Default::default(),
                expected: row_width,
                actual: features.len() / labels.len(),
            });
        }

        for (row, &label) in labels.iter().enumerate() {
            if label >= num_classes {
                return Err(DataError::LabelOutOfRange {
                    row,
                    value: label as f32,
                    num_classes,
                });
            }
        }

        if let FeatureEncoding::OneHot { depth } = encoding {
            for (i, &value) in features.iter().enumerate() {
                if value < 0.0 || value.fract() != 0.0 || value as usize >= depth {
                    return Err(DataError::SymbolOutOfRange {
                        row: i / row_width,
                        value,
                        depth,
                    });
                }
            }
        }

        Ok(Self {
            features,
            labels,
            row_width,
        })
    }

    /// Total number of samples
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn row_width(&self) -> usize {
        self.row_width
    }

    /// Rows `[offset, min(offset + batch_size, len))`.
    ///
    /// The slice never wraps past the end, so a batch that starts near the end of
    /// the dataset is shorter than `batch_size`.
    pub fn slice(&self, offset: usize, batch_size: usize) -> SequenceBatch {
        let start = offset.min(self.len());
        let end = (offset + batch_size).min(self.len());

        SequenceBatch {
            features: self.features[start * self.row_width..end * self.row_width].to_vec(),
            labels: self.labels[start..end].to_vec(),
            rows: end - start,
        }
    }

    /// Gathers the rows named by `indices` into one batch.
    pub fn gather(&self, indices: &[usize]) -> SequenceBatch {
        let mut features = Vec::with_capacity(indices.len() * self.row_width);
        let mut labels = Vec::with_capacity(indices.len());
        for &idx in indices {
            features.extend_from_slice(&self.features[idx * self.row_width..(idx + 1) * self.row_width]);
            labels.push(self.labels[idx]);
        }

        SequenceBatch {
            features,
            labels,
            rows: indices.len(),
        }
    }
}

/// Start of the slice fed at `step` of a bounded run.
///
/// e.g. step = 4, batch_size = 256, size = 1000 -> (4 * 256) % 1000 = 24
pub fn wraparound_offset(step: usize, batch_size: usize, size: usize) -> usize {
    (step * batch_size) % size
}

/// Number of steps of a bounded run over `size` samples.
pub fn bounded_steps(epochs: usize, size: usize, batch_size: usize) -> usize {
    epochs * size / batch_size
}

/// Encodes raw rows into a `[rows, sequence_length, D]` feature tensor.
pub fn encode_features<B: Backend>(
    batch: &SequenceBatch,
    sequence_length: usize,
    encoding: FeatureEncoding,
    device: &B::Device,
) -> Tensor<B, 3> {
    let input_size = encoding.input_size();

    let data = match encoding {
        FeatureEncoding::OneHot { depth } => {
            let mut data = vec![0.0f32; batch.rows * sequence_length * depth];
            for (i, &symbol) in batch.features.iter().enumerate() {
                data[i * depth + symbol as usize] = 1.0;
            }
            data
        }
        FeatureEncoding::Raw { .. } => batch.features.clone(),
    };

    Tensor::<B, 3>::from_data(
        TensorData::new(data, [batch.rows, sequence_length, input_size]),
        device,
    )
}

/// Encodes class labels into a `[rows, num_classes]` tensor.
pub fn encode_labels<B: Backend>(
    labels: &[usize],
    num_classes: usize,
    encoding: LabelEncoding,
    device: &B::Device,
) -> Tensor<B, 2> {
    let off_value = match encoding {
        LabelEncoding::OneHot => 0.0f32,
        LabelEncoding::Signed => -1.0f32,
    };

    let mut data = vec![off_value; labels.len() * num_classes];
    for (row, &label) in labels.iter().enumerate() {
        data[row * num_classes + label] = 1.0;
    }

    Tensor::<B, 2>::from_data(TensorData::new(data, [labels.len(), num_classes]), device)
}
