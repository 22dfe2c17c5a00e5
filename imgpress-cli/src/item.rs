use bytes::Bytes;

/// One image travelling through the pipeline.
///
/// `data` is shared, so broadcasting an item to several stages clones a
/// reference count rather than the buffer.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Ingestion sequence, assigned once when the item leaves the source.
    pub seq: Option<u64>,
    /// File name the item was read from.
    pub name: String,
    pub data: Bytes,
    /// Size of the data as read from the source, before any transform.
    pub source_len: usize,
}

impl WorkItem {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            seq: None,
            name: name.into(),
            source_len: data.len(),
            data,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Replace the payload, keeping identity and original size.
    pub fn with_data(self, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..self
        }
    }

    /// Compressed size over original size; 1.0 for an empty source.
    pub fn ratio(&self) -> f64 {
        if self.source_len == 0 {
            1.0
        } else {
            self.data.len() as f64 / self.source_len as f64
        }
    }
}
