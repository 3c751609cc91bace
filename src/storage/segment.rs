// pgarchive/src/storage/segment.rs
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, Take};
use tokio_util::io::ReaderStream;

/// Width of the zero-padded segment ordinal, so lexicographic order matches
/// numeric order.
pub const ORDINAL_WIDTH: usize = 10;

/// One bounded slice of an artifact bound for a size-limited backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSpan {
    pub ordinal: u32,
    pub offset: u64,
    pub len: u64,
}

impl SegmentSpan {
    pub fn suffix(&self) -> String {
        format!("{:0width$}", self.ordinal, width = ORDINAL_WIDTH)
    }

    pub fn object_name(&self, key: &str) -> String {
        format!("{}/{}", key, self.suffix())
    }
}

/// Bytes a single segment holds: whole buffers are read while the offset
/// into the segment stays at or below `limit - buffer`.
pub fn segment_capacity(limit: u64, buffer: usize) -> u64 {
    let buffer = buffer.max(1) as u64;
    (limit / buffer).max(1) * buffer
}

/// Splits `total` bytes into consecutive spans, ordinals starting at 1.
pub fn plan_segments(total: u64, limit: u64, buffer: usize) -> Vec<SegmentSpan> {
    let capacity = segment_capacity(limit, buffer);
    let mut spans = Vec::new();
    let mut offset = 0;
    while offset < total {
        let len = capacity.min(total - offset);
        spans.push(SegmentSpan {
            ordinal: spans.len() as u32 + 1,
            offset,
            len,
        });
        offset += len;
    }
    spans
}

/// A segment's byte range within a file on disk, read lazily in
/// `buffer`-sized chunks.
#[derive(Debug, Clone)]
pub struct SegmentSource {
    pub path: PathBuf,
    pub span: SegmentSpan,
    pub buffer: usize,
}

impl SegmentSource {
    pub fn new(path: &Path, span: SegmentSpan, buffer: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            span,
            buffer,
        }
    }

    pub async fn open(&self) -> std::io::Result<Take<File>> {
        let mut file = File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(self.span.offset)).await?;
        Ok(file.take(self.span.len))
    }

    pub async fn stream(&self) -> std::io::Result<ReaderStream<Take<File>>> {
        Ok(ReaderStream::with_capacity(self.open().await?, self.buffer))
    }
}
