//! Streaming query results (`executeQuery`, `fetchNextRows`, LOB reads).
//!
//! Grounded on the donor's `data_client.rs` `ResultStream` (a background
//! task pumping frames into an mpsc channel that the caller drains),
//! retargeted from the donor's ad hoc `Data`/`Ack`/`Error` frames to
//! `ojp_proto::envelope::OpResult`/`OpResultKind`.

use ojp_proto::envelope::{OpResult, OpResultKind};
use ojp_proto::OjpError;
use tokio::sync::mpsc;

/// Consumed one chunk at a time; `next()` returns `None` once the server's
/// final (possibly empty) chunk carrying `EndOfCursor` has been observed,
/// per §4.M.
pub struct ResultStream {
    receiver: mpsc::Receiver<Result<OpResult, OjpError>>,
    done: bool,
}

impl ResultStream {
    pub fn new(receiver: mpsc::Receiver<Result<OpResult, OjpError>>) -> Self {
        Self { receiver, done: false }
    }

    pub async fn next(&mut self) -> Option<Result<OpResult, OjpError>> {
        if self.done {
            return None;
        }
        let item = self.receiver.recv().await;
        if let Some(Ok(OpResult {
            kind: OpResultKind::EndOfCursor,
            ..
        })) = &item
        {
            self.done = true;
        }
        item
    }

    /// Drains the stream, returning only row chunks already flattened to
    /// rows. Convenience for callers that don't need column headers.
    pub async fn collect_rows(mut self) -> Result<Vec<ojp_proto::Row>, OjpError> {
        let mut rows = Vec::new();
        while let Some(item) = self.next().await {
            if let OpResultKind::RowChunk(chunk) = item?.kind {
                rows.extend(chunk);
            }
        }
        Ok(rows)
    }
}
