//! Wire request/response mux (component M): request-type dispatch, error
//! taxonomy, and streaming responses (§4.M).
//!
//! Grounded directly on the donor's `MessageType`/`MessageCodec` dispatch
//! shape (now living in `ojp_proto::wire`), widened to the OJP request
//! types. Row-chunked streaming mirrors the donor's `ResultStream`
//! `Data`/`Ack`/`Error` sequencing in `data_client.rs`: the last chunk is
//! always sent, even if empty, so the client observes completion.

use ojp_proto::envelope::{OpResult, OpResultKind};
use ojp_proto::value::{ColumnMetadata, Row};
use ojp_proto::OjpError;
use tokio::sync::mpsc;

/// Result rows are chunked at this size until end-of-cursor (§4.M).
pub const ROWS_PER_BLOCK: usize = 100;

/// The upstream vendor driver, kept on the proxy. Loading it from disk and
/// its dialect quirks are external collaborators per §1's scope; this
/// trait is the seam component M dispatches through, analogous to how the
/// donor's `Connection` sits behind its own transport abstraction.
#[async_trait::async_trait]
pub trait UpstreamDriver: Send + Sync {
    async fn execute_update(&self, sql: &str, params: &[ojp_proto::value::Value]) -> Result<i64, OjpError>;

    async fn execute_query(
        &self,
        sql: &str,
        params: &[ojp_proto::value::Value],
    ) -> Result<(Vec<ColumnMetadata>, Vec<Row>), OjpError>;
}

/// Drives an `executeUpdate` call to completion, per §6's
/// `executeUpdate(Request) -> OpResult{kind, int|uuid, session}`.
pub async fn dispatch_execute_update(
    driver: &dyn UpstreamDriver,
    session_id: &str,
    sql: &str,
    params: &[ojp_proto::value::Value],
) -> Result<OpResult, OjpError> {
    let count = driver.execute_update(sql, params).await?;
    Ok(OpResult {
        session_id: session_id.to_string(),
        kind: OpResultKind::UpdateCount(count),
    })
}

/// Drives an `executeQuery` call, streaming the column header first and
/// then `ROWS_PER_BLOCK`-sized row chunks into `sink`, ending with an
/// empty `EndOfCursor` chunk so the client always observes completion
/// even for a zero-row result (§4.M).
pub async fn dispatch_execute_query(
    driver: &dyn UpstreamDriver,
    session_id: &str,
    sql: &str,
    params: &[ojp_proto::value::Value],
    sink: &mpsc::Sender<Result<OpResult, OjpError>>,
) -> Result<(), OjpError> {
    let (columns, rows) = match driver.execute_query(sql, params).await {
        Ok(v) => v,
        Err(err) => {
            let _ = sink.send(Err(err.clone())).await;
            return Err(err);
        }
    };

    send_chunk(sink, session_id, OpResultKind::ColumnHeader(columns)).await?;
    for chunk in rows.chunks(ROWS_PER_BLOCK) {
        send_chunk(sink, session_id, OpResultKind::RowChunk(chunk.to_vec())).await?;
    }
    send_chunk(sink, session_id, OpResultKind::EndOfCursor).await?;
    Ok(())
}

async fn send_chunk(
    sink: &mpsc::Sender<Result<OpResult, OjpError>>,
    session_id: &str,
    kind: OpResultKind,
) -> Result<(), OjpError> {
    sink.send(Ok(OpResult {
        session_id: session_id.to_string(),
        kind,
    }))
    .await
    .map_err(|_| OjpError::Internal {
        component: "mux".to_string(),
        details: "result sink closed before stream completed".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDriver {
        columns: Vec<ColumnMetadata>,
        rows: Vec<Row>,
    }

    #[async_trait::async_trait]
    impl UpstreamDriver for FakeDriver {
        async fn execute_update(&self, _sql: &str, _params: &[ojp_proto::value::Value]) -> Result<i64, OjpError> {
            Ok(1)
        }

        async fn execute_query(
            &self,
            _sql: &str,
            _params: &[ojp_proto::value::Value],
        ) -> Result<(Vec<ColumnMetadata>, Vec<Row>), OjpError> {
            Ok((self.columns.clone(), self.rows.clone()))
        }
    }

    fn row(n: i64) -> Row {
        Row {
            values: vec![ojp_proto::value::Value::Int(n)],
        }
    }

    #[tokio::test]
    async fn execute_update_returns_update_count() {
        let driver = FakeDriver {
            columns: Vec::new(),
            rows: Vec::new(),
        };
        let result = dispatch_execute_update(&driver, "s1", "UPDATE t SET x = 1", &[]).await.unwrap();
        assert!(matches!(result.kind, OpResultKind::UpdateCount(1)));
    }

    #[tokio::test]
    async fn execute_query_always_ends_with_end_of_cursor_even_for_zero_rows() {
        let driver = FakeDriver {
            columns: vec![ColumnMetadata {
                name: "id".to_string(),
                type_name: "INT".to_string(),
                nullable: false,
            }],
            rows: Vec::new(),
        };
        let (tx, mut rx) = mpsc::channel(8);
        dispatch_execute_query(&driver, "s1", "SELECT 1", &[], &tx).await.unwrap();
        drop(tx);

        let header = rx.recv().await.unwrap().unwrap();
        assert!(matches!(header.kind, OpResultKind::ColumnHeader(_)));
        let end = rx.recv().await.unwrap().unwrap();
        assert!(matches!(end.kind, OpResultKind::EndOfCursor));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn execute_query_chunks_rows_at_rows_per_block() {
        let rows: Vec<Row> = (0..(ROWS_PER_BLOCK + 10) as i64).map(row).collect();
        let driver = FakeDriver {
            columns: Vec::new(),
            rows,
        };
        let (tx, mut rx) = mpsc::channel(32);
        dispatch_execute_query(&driver, "s1", "SELECT * FROM t", &[], &tx).await.unwrap();
        drop(tx);

        let mut chunk_sizes = Vec::new();
        while let Some(Ok(item)) = rx.recv().await {
            if let OpResultKind::RowChunk(chunk) = item.kind {
                chunk_sizes.push(chunk.len());
            }
        }
        assert_eq!(chunk_sizes, vec![ROWS_PER_BLOCK, 10]);
    }
}
