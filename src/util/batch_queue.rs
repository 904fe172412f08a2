// External imports
use crossbeam_channel::{bounded, Receiver};
use log::{debug, warn};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

// Internal imports
use crate::gru::step_1_tensor_preparation::{SequenceBatch, SequenceDataset};

/// Pull-based supplier of training batches; `None` marks the end of the stream.
pub trait BatchSource {
    fn next_batch(&mut self) -> Option<SequenceBatch>;
}

impl<I: Iterator<Item = SequenceBatch>> BatchSource for I {
    fn next_batch(&mut self) -> Option<SequenceBatch> {
        self.next()
    }
}

/// Options of the producer side of a [`BatchQueue`]
#[derive(Clone, Copy, Debug)]
pub struct QueueOptions {
    pub batch_size: usize,
    pub epochs: usize,
    pub capacity: usize,
    pub num_producers: usize,
    pub shuffle: bool,
}

impl QueueOptions {
    /// Same options over a single epoch, as used for evaluation streams
    pub fn single_pass(self) -> Self {
        Self { epochs: 1, ..self }
    }
}

/// Batches produced by background threads into a bounded channel.
///
/// Each epoch visits every row once in (optionally) shuffled order and yields
/// only full batches; the remainder of an epoch is dropped. Epochs are split
/// round-robin across producers. The channel closes once every producer has
/// finished, which ends the stream for the consumer.
pub struct BatchQueue {
    receiver: Option<Receiver<SequenceBatch>>,
    producers: Vec<JoinHandle<()>>,
}

impl BatchQueue {
    pub fn spawn(dataset: Arc<SequenceDataset>, options: QueueOptions) -> std::io::Result<Self> {
        let (sender, receiver) = bounded(options.capacity.max(1));
        let num_producers = options.num_producers.max(1);

        let mut producers = Vec::with_capacity(num_producers);
        for producer in 0..num_producers {
            let sender = sender.clone();
            let dataset = Arc::clone(&dataset);

            let handle = thread::Builder::new()
                .name(format!("batch-producer-{}", producer))
                .spawn(move || {
                    let mut indices: Vec<usize> = (0..dataset.len()).collect();

                    for epoch in (producer..options.epochs).step_by(num_producers) {
                        if options.shuffle {
                            indices.shuffle(&mut rand::rng());
                        }

                        for chunk in indices.chunks_exact(options.batch_size) {
                            if sender.send(dataset.gather(chunk)).is_err() {
                                debug!("Batch consumer gone, producer {} stops", producer);
                                return;
                            }
                        }
                        debug!("Producer {} finished epoch {}", producer, epoch);
                    }
                })?;
            producers.push(handle);
        }

        Ok(Self {
            receiver: Some(receiver),
            producers,
        })
    }
}

impl Iterator for BatchQueue {
    type Item = SequenceBatch;

    /// Blocks until a batch is available or every producer is done
    fn next(&mut self) -> Option<SequenceBatch> {
        self.receiver.as_ref()?.recv().ok()
    }
}

impl Drop for BatchQueue {
    fn drop(&mut self) {
        // Closing the receiver unblocks producers waiting on a full queue
        self.receiver.take();
        for handle in self.producers.drain(..) {
            if handle.join().is_err() {
                warn!("A batch producer panicked");
            }
        }
    }
}
