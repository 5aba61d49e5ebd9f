// Count-driven batch accumulation.
//
// The buffer itself never looks at the clock. Liveness under a stalled
// source is the pipeline's job (see `pipeline::spawn_pipeline`), which calls
// `flush_partial` on an idle timer.

use crate::types::{Batch, ClassifiedRecord};

/// Accumulates classified records into fixed-capacity batches
#[derive(Debug)]
pub struct BatchBuffer {
    capacity: usize,
    open: Vec<ClassifiedRecord>,
}

impl BatchBuffer {
    /// Create a buffer that flushes every `capacity` records.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            open: Vec::with_capacity(capacity),
        }
    }

    /// Append a record. Returns the batch once it is complete.
    pub fn accept(&mut self, record: ClassifiedRecord) -> Option<Batch> {
        self.open.push(record);

        if self.open.len() >= self.capacity {
            let records = std::mem::replace(&mut self.open, Vec::with_capacity(self.capacity));
            Some(Batch::new(records))
        } else {
            None
        }
    }

    /// Hand out whatever is buffered, if anything
    pub fn flush_partial(&mut self) -> Option<Batch> {
        if self.open.is_empty() {
            return None;
        }
        let records = std::mem::replace(&mut self.open, Vec::with_capacity(self.capacity));
        Some(Batch::new(records))
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
