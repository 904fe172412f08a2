use bincode::{Decode, Encode};
use burn::tensor::{backend::Backend, Tensor};
use chrono::{Local, Utc};
use ndarray::{concatenate, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::constants::HISTOGRAM_BUCKETS;
use crate::error::{TrainError, TrainResult};

/// Bucketed distribution of a tensor's values
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub num: u64,
    pub sum: f64,
    pub sum_squares: f64,
    /// Upper edge of each bucket
    pub bucket_limits: Vec<f64>,
    pub bucket_counts: Vec<u64>,
}

impl Histogram {
    pub fn from_values(values: &[f32], buckets: usize) -> Self {
        let buckets = buckets.max(1);
        let min = values.iter().fold(f64::INFINITY, |acc, &v| acc.min(v as f64));
        let max = values.iter().fold(f64::NEG_INFINITY, |acc, &v| acc.max(v as f64));

        if values.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                num: 0,
                sum: 0.0,
                sum_squares: 0.0,
                bucket_limits: Vec::new(),
                bucket_counts: Vec::new(),
            };
        }

        let width = (max - min) / buckets as f64;
        let bucket_limits = (1..=buckets).map(|i| min + width * i as f64).collect();
        let mut bucket_counts = vec![0u64; buckets];
        for &v in values {
            let idx = if width > 0.0 {
                (((v as f64 - min) / width) as usize).min(buckets - 1)
            } else {
                0
            };
            bucket_counts[idx] += 1;
        }

        Self {
            min,
            max,
            num: values.len() as u64,
            sum: values.iter().map(|&v| v as f64).sum(),
            sum_squares: values.iter().map(|&v| (v as f64) * (v as f64)).sum(),
            bucket_limits,
            bucket_counts,
        }
    }
}

/// One tagged record of a summary
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryValue {
    Scalar { tag: String, value: f64 },
    Histogram { tag: String, histogram: Histogram },
}

/// A batch of scalar and histogram records written under one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    values: Vec<SummaryValue>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar(&mut self, tag: &str, value: f64) -> &mut Self {
        self.values.push(SummaryValue::Scalar {
            tag: tag.to_string(),
            value,
        });
        self
    }

    pub fn histogram(&mut self, tag: &str, values: &[f32]) -> &mut Self {
        self.values.push(SummaryValue::Histogram {
            tag: tag.to_string(),
            histogram: Histogram::from_values(values, HISTOGRAM_BUCKETS),
        });
        self
    }

    /// Mean, stddev, max, min and histogram of a variable under `{prefix}/summaries/`
    pub fn variable_summaries(&mut self, prefix: &str, values: &[f32]) -> &mut Self {
        let n = values.len().max(1) as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        let max = values.iter().fold(f64::NEG_INFINITY, |acc, &v| acc.max(v as f64));
        let min = values.iter().fold(f64::INFINITY, |acc, &v| acc.min(v as f64));

        self.scalar(&format!("{prefix}/summaries/mean"), mean)
            .scalar(&format!("{prefix}/summaries/stddev"), variance.sqrt())
            .scalar(&format!("{prefix}/summaries/max"), max)
            .scalar(&format!("{prefix}/summaries/min"), min)
            .histogram(&format!("{prefix}/summaries/histogram"), values)
    }

    pub fn values(&self) -> &[SummaryValue] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the scalar record tagged `tag`, if any
    pub fn scalar_value(&self, tag: &str) -> Option<f64> {
        self.values.iter().find_map(|value| match value {
            SummaryValue::Scalar { tag: t, value } if t == tag => Some(*value),
            _ => None,
        })
    }
}

/// Append-only destination for summaries, keyed by step
pub trait MetricSink {
    fn write(&mut self, summary: &Summary, step: usize) -> TrainResult<()>;

    fn flush(&mut self) -> TrainResult<()>;
}

/// One line of an event file
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    pub wall_time: f64,
    pub step: usize,
    #[serde(flatten)]
    pub value: SummaryValue,
}

/// Writes summaries as JSON lines to `{log_dir}/{run_name}/events.jsonl`
pub struct EventFileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl EventFileWriter {
    pub fn create(log_dir: &Path, run_name: &str) -> TrainResult<Self> {
        let dir = log_dir.join(run_name);
        fs::create_dir_all(&dir).map_err(|e| TrainError::io(&dir, e))?;

        let path = dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TrainError::io(&path, e))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes buffered records and closes the file
    pub fn close(mut self) -> TrainResult<()> {
        self.flush()
    }
}

impl MetricSink for EventFileWriter {
    fn write(&mut self, summary: &Summary, step: usize) -> TrainResult<()> {
        let wall_time = Utc::now().timestamp_micros() as f64 / 1e6;
        for value in summary.values() {
            let event = Event {
                wall_time,
                step,
                value: value.clone(),
            };
            let line = serde_json::to_string(&event).map_err(|source| TrainError::Json {
                what: "summary event",
                source,
            })?;
            writeln!(self.writer, "{}", line).map_err(|e| TrainError::io(&self.path, e))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> TrainResult<()> {
        self.writer.flush().map_err(|e| TrainError::io(&self.path, e))
    }
}

/// Reads back every event of an event file
pub fn read_events(path: &Path) -> TrainResult<Vec<Event>> {
    let content = fs::read_to_string(path).map_err(|e| TrainError::io(path, e))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|source| TrainError::Json {
                what: "summary event",
                source,
            })
        })
        .collect()
}

/// Directory name of a run, taken from the local wall clock
pub fn run_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Phase of a bounded run that produced a result file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Training,
    Validation,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Training => "training",
            Phase::Validation => "validation",
        }
    }
}

/// Predictions next to actual labels, as stored on disk
#[derive(Encode, Decode, Debug, Clone, PartialEq)]
pub struct LabelRecord {
    pub phase: String,
    pub step: u64,
    pub model_name: String,
    pub rows: u64,
    pub cols: u64,
    /// Row-major `[rows, cols]`: prediction columns first, then label columns
    pub values: Vec<f32>,
}

impl LabelRecord {
    pub fn to_array(&self) -> TrainResult<Array2<f32>> {
        Ok(Array2::from_shape_vec(
            (self.rows as usize, self.cols as usize),
            self.values.clone(),
        )?)
    }
}

/// Destination for per-step prediction/label pairs
pub trait ResultSink {
    fn save(
        &mut self,
        predictions: &Array2<f32>,
        actual: &Array2<f32>,
        phase: Phase,
        step: usize,
    ) -> TrainResult<PathBuf>;
}

/// Writes one bincode file `{phase}-{model_name}-{step}.bin` per step
pub struct ResultFileWriter {
    dir: PathBuf,
    model_name: String,
}

impl ResultFileWriter {
    pub fn new(dir: impl Into<PathBuf>, model_name: &str) -> TrainResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| TrainError::io(&dir, e))?;
        Ok(Self {
            dir,
            model_name: model_name.to_string(),
        })
    }

    pub fn result_path(&self, phase: Phase, step: usize) -> PathBuf {
        self.dir
            .join(format!("{}-{}-{}.bin", phase.as_str(), self.model_name, step))
    }
}

impl ResultSink for ResultFileWriter {
    fn save(
        &mut self,
        predictions: &Array2<f32>,
        actual: &Array2<f32>,
        phase: Phase,
        step: usize,
    ) -> TrainResult<PathBuf> {
        let labels = concatenate(Axis(1), &[predictions.view(), actual.view()])?;
        let (rows, cols) = labels.dim();

        let record = LabelRecord {
            phase: phase.as_str().to_string(),
            step: step as u64,
            model_name: self.model_name.clone(),
            rows: rows as u64,
            cols: cols as u64,
            values: labels.iter().copied().collect(),
        };

        let path = self.result_path(phase, step);
        let file = File::create(&path).map_err(|e| TrainError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        bincode::encode_into_std_write(&record, &mut writer, bincode::config::standard())?;
        writer.flush().map_err(|e| TrainError::io(&path, e))?;

        Ok(path)
    }
}

/// Loads a result file written by [`ResultFileWriter`]
pub fn read_result_file(path: &Path) -> TrainResult<LabelRecord> {
    let file = File::open(path).map_err(|e| TrainError::io(path, e))?;
    let mut reader = BufReader::new(file);
    Ok(bincode::decode_from_std_read(
        &mut reader,
        bincode::config::standard(),
    )?)
}

/// Copies a 2-D tensor to the host as an ndarray
pub fn tensor_to_array2<B: Backend>(tensor: Tensor<B, 2>) -> TrainResult<Array2<f32>> {
    let [rows, cols] = tensor.dims();
    let values = tensor_values(tensor);
    Ok(Array2::from_shape_vec((rows, cols), values)?)
}

/// Flat host copy of any tensor's values
pub fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}
