//! Top-level driver-facing client (component D's public surface).
//!
//! Grounded on the donor's `Client::connect` facade shape (validate config,
//! wire up the manager, authenticate, return a ready handle), retargeted
//! from the donor's single-cluster auth handshake to OJP's per-call
//! `connect(ConnectionDetails) -> SessionInfo` wire operation.

use crate::dispatcher::MultinodeDispatcher;
use crate::endpoint::{EndpointId, EndpointRegistry};
use crate::metrics::MetricsCollector;
use crate::query::ResultStream;
use crate::session_tracker::SessionTracker;
use crate::transport::Transport;
use crate::url::parse_proxy_url;
use ojp_proto::conn_hash::ConnHash;
use ojp_proto::config::OjpConfig;
use ojp_proto::envelope::{
    ConnectionDetails, FetchRequest, LobDataBlock, LobReference, LobType, OpResult, OpResultKind,
    ReadLobRequest, Request, RequestEnvelope, SessionInfo, SessionTerminationStatus,
    TransactionInfo, XaRequest, XaResponse,
};
use ojp_proto::resource::{CallResourceRequest, CallResourceResponse};
use ojp_proto::value::Value;
use ojp_proto::wire::MessageType;
use ojp_proto::xid::{Xid, XaEndFlag, XaStartFlag};
use ojp_proto::OjpError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Everything needed to talk to one upstream datasource through the
/// cluster of proxy nodes named in the client URL.
pub struct OjpClient {
    endpoints: Arc<EndpointRegistry>,
    sessions: Arc<SessionTracker>,
    dispatcher: MultinodeDispatcher,
    transports: Mutex<HashMap<EndpointId, Transport>>,
    conn_hash: ConnHash,
    client_uuid: String,
    config: OjpConfig,
    metrics: MetricsCollector,
}

impl OjpClient {
    /// `connect(ConnectionDetails) -> SessionInfo` from the caller's side:
    /// parses the proxy URL, stands up the dispatcher, and performs the
    /// wire `connect` call against a freshly-selected endpoint.
    pub async fn connect(
        proxy_url: &str,
        username: &str,
        password: &str,
        properties: Vec<(String, String)>,
        is_xa: bool,
        config: OjpConfig,
    ) -> Result<(Self, SessionInfo), OjpError> {
        config.validate()?;

        let parsed = parse_proxy_url(proxy_url)?;
        let endpoints = EndpointRegistry::parse(&parsed.server_list)?;
        let sessions = Arc::new(SessionTracker::new());
        let dispatcher = MultinodeDispatcher::new(
            Arc::clone(&endpoints),
            Arc::clone(&sessions),
            config.load_aware_selection_enabled,
            config.retry,
        );
        let conn_hash = ConnHash::compute(&parsed.driver_url, username, password, &properties);

        let client = Self {
            endpoints,
            sessions,
            dispatcher,
            transports: Mutex::new(HashMap::new()),
            conn_hash,
            client_uuid: uuid::Uuid::new_v4().to_string(),
            config,
            metrics: MetricsCollector::new(),
        };

        let details = ConnectionDetails {
            raw_url: parsed.driver_url.clone(),
            username: username.to_string(),
            password: password.to_string(),
            properties,
            is_xa,
        };

        let started = std::time::Instant::now();
        let envelope = client.envelope(None, None, is_xa, String::new()).await;
        let request_bytes = bincode::serialize(&(envelope, details)).map_err(|e| OjpError::Serialization {
            message: e.to_string(),
        })?;

        let response: Result<(SessionInfo, EndpointId), OjpError> = client
            .dispatcher
            .dispatch_with_retry(None, |endpoint| {
                let request_bytes = request_bytes.clone();
                async move {
                    let mut transports = client.transports.lock().await;
                    client.call_raw(&mut transports, &endpoint, MessageType::Connect, request_bytes).await
                }
            })
            .await;
        client
            .metrics
            .record_connect_attempt(response.is_ok(), started.elapsed().as_millis() as f64)
            .await;
        let (info, connected_endpoint) = response?;

        // Bind to the endpoint the connect RPC actually succeeded on, not a
        // fresh pick -- re-picking here would advance the selector's
        // fairness cursor and could bind the session to a node that never
        // created it (§4.D stickiness).
        sessions.register(&info.session_id, &connected_endpoint).await;

        Ok((client, info))
    }

    async fn envelope(
        &self,
        session_id: Option<&str>,
        transaction: Option<TransactionInfo>,
        is_xa: bool,
        target_server: String,
    ) -> RequestEnvelope {
        RequestEnvelope {
            session_uuid: session_id.map(str::to_string),
            conn_hash: self.conn_hash.clone(),
            client_uuid: self.client_uuid.clone(),
            transaction_info: transaction,
            is_xa,
            target_server,
            cluster_health: self.endpoints.health_view().await,
        }
    }

    async fn call_raw<Resp: serde::de::DeserializeOwned>(
        &self,
        transports: &mut HashMap<EndpointId, Transport>,
        endpoint: &EndpointId,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Result<Resp, OjpError> {
        if !transports.contains_key(endpoint) {
            let transport = Transport::connect(endpoint, self.config.pool.connection_timeout_ms).await?;
            transports.insert(endpoint.clone(), transport);
        }
        let transport = transports.get_mut(endpoint).expect("just inserted");
        let message = transport.send_request(message_type, payload).await?;
        match message.message_type {
            MessageType::Error => {
                let err: OjpError = bincode::deserialize(&message.payload).map_err(|e| OjpError::Serialization {
                    message: e.to_string(),
                })?;
                Err(err)
            }
            _ => bincode::deserialize(&message.payload).map_err(|e| OjpError::Serialization {
                message: e.to_string(),
            }),
        }
    }

    /// `executeUpdate(Request) -> OpResult`.
    pub async fn execute_update(
        &self,
        session_id: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<OpResult, OjpError> {
        let started = std::time::Instant::now();
        let envelope = self.envelope(Some(session_id), None, false, String::new()).await;
        let request = Request {
            envelope,
            statement_id: None,
            sql: sql.to_string(),
            params,
        };
        let payload = bincode::serialize(&request).map_err(|e| OjpError::Serialization { message: e.to_string() })?;

        let result = self
            .dispatcher
            .dispatch_with_retry(Some(session_id), |endpoint| {
                let payload = payload.clone();
                async move {
                    let mut transports = self.transports.lock().await;
                    self.call_raw(&mut transports, &endpoint, MessageType::ExecuteUpdate, payload).await
                }
            })
            .await;
        self.metrics
            .record_execute(result.is_ok(), started.elapsed().as_millis() as f64)
            .await;
        result.map(|(value, _endpoint)| value)
    }

    /// `executeQuery(Request) -> stream OpResult`.
    pub async fn execute_query(
        &self,
        session_id: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<ResultStream, OjpError> {
        let started = std::time::Instant::now();
        let envelope = self.envelope(Some(session_id), None, false, String::new()).await;
        let request = Request {
            envelope,
            statement_id: None,
            sql: sql.to_string(),
            params,
        };
        let payload = bincode::serialize(&request).map_err(|e| OjpError::Serialization { message: e.to_string() })?;

        let route = self.dispatcher.route(Some(session_id)).await?;
        let stream = {
            let mut transports = self.transports.lock().await;
            self.open_stream(&mut transports, &route.endpoint, MessageType::ExecuteQuery, payload)
                .await
        };
        self.metrics
            .record_query(stream.is_ok(), started.elapsed().as_millis() as f64)
            .await;
        stream
    }

    /// `fetchNextRows(FetchRequest) -> stream OpResult`.
    pub async fn fetch_next_rows(
        &self,
        session_id: &str,
        result_set_id: u64,
        rows_per_block: u32,
    ) -> Result<ResultStream, OjpError> {
        let envelope = self.envelope(Some(session_id), None, false, String::new()).await;
        let request = FetchRequest {
            envelope,
            result_set_id,
            rows_per_block,
        };
        let payload = bincode::serialize(&request).map_err(|e| OjpError::Serialization { message: e.to_string() })?;
        let route = self.dispatcher.route(Some(session_id)).await?;
        let mut transports = self.transports.lock().await;
        self.open_stream(&mut transports, &route.endpoint, MessageType::FetchNextRows, payload)
            .await
    }

    /// Opens a streaming response: reads frames off the connection one at a
    /// time, publishing each to the returned [`ResultStream`] until
    /// `EndOfCursor` (§4.M: the last chunk is sent even if empty).
    async fn open_stream(
        &self,
        transports: &mut HashMap<EndpointId, Transport>,
        endpoint: &EndpointId,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Result<ResultStream, OjpError> {
        if !transports.contains_key(endpoint) {
            let transport = Transport::connect(endpoint, self.config.pool.connection_timeout_ms).await?;
            transports.insert(endpoint.clone(), transport);
        }
        let transport = transports.get_mut(endpoint).expect("just inserted");

        let first = transport.send_request(message_type, payload).await?;
        let (tx, rx) = mpsc::channel(64);
        let mut done = false;
        let publish = |message: ojp_proto::Message, tx: &mpsc::Sender<Result<OpResult, OjpError>>| {
            let parsed: Result<OpResult, OjpError> = bincode::deserialize(&message.payload).map_err(|e| OjpError::Serialization {
                message: e.to_string(),
            });
            let is_end = matches!(
                parsed,
                Ok(OpResult {
                    kind: OpResultKind::EndOfCursor,
                    ..
                })
            );
            let _ = tx.try_send(parsed);
            is_end
        };
        done |= publish(first, &tx);
        while !done {
            let next = transport.read_next_frame().await?;
            done = publish(next, &tx);
        }
        Ok(ResultStream::new(rx))
    }

    /// `startTransaction | commitTransaction | rollbackTransaction -> SessionInfo`.
    async fn transaction_call(
        &self,
        session_id: &str,
        message_type: MessageType,
        transaction_id: String,
    ) -> Result<SessionInfo, OjpError> {
        let info = TransactionInfo {
            transaction_id,
            xid: None,
        };
        let envelope = self.envelope(Some(session_id), Some(info), false, String::new()).await;
        let payload = bincode::serialize(&envelope).map_err(|e| OjpError::Serialization { message: e.to_string() })?;
        let result: Result<SessionInfo, OjpError> = self
            .dispatcher
            .dispatch_with_retry(Some(session_id), |endpoint| {
                let payload = payload.clone();
                async move {
                    let mut transports = self.transports.lock().await;
                    self.call_raw(&mut transports, &endpoint, message_type, payload).await
                }
            })
            .await
            .map(|(value, _endpoint)| value);
        if message_type == MessageType::StartTransaction && result.is_ok() {
            self.sessions.set_in_transaction(session_id, true).await;
        } else if matches!(message_type, MessageType::CommitTransaction | MessageType::RollbackTransaction) {
            self.sessions.set_in_transaction(session_id, false).await;
        }
        result
    }

    pub async fn start_transaction(&self, session_id: &str, transaction_id: String) -> Result<SessionInfo, OjpError> {
        self.transaction_call(session_id, MessageType::StartTransaction, transaction_id).await
    }

    pub async fn commit_transaction(&self, session_id: &str, transaction_id: String) -> Result<SessionInfo, OjpError> {
        self.transaction_call(session_id, MessageType::CommitTransaction, transaction_id).await
    }

    pub async fn rollback_transaction(&self, session_id: &str, transaction_id: String) -> Result<SessionInfo, OjpError> {
        self.transaction_call(session_id, MessageType::RollbackTransaction, transaction_id).await
    }

    async fn xa_call(
        &self,
        session_id: &str,
        message_type: MessageType,
        xid: Xid,
        start_flag: Option<XaStartFlag>,
        end_flag: Option<XaEndFlag>,
        one_phase: bool,
        timeout_seconds: Option<u32>,
    ) -> Result<XaResponse, OjpError> {
        let envelope = self.envelope(Some(session_id), None, true, String::new()).await;
        let request = XaRequest {
            envelope,
            xid,
            start_flag,
            end_flag,
            one_phase,
            timeout_seconds,
        };
        let payload = bincode::serialize(&request).map_err(|e| OjpError::Serialization { message: e.to_string() })?;
        self.dispatcher
            .dispatch_with_retry(Some(session_id), |endpoint| {
                let payload = payload.clone();
                async move {
                    let mut transports = self.transports.lock().await;
                    self.call_raw(&mut transports, &endpoint, message_type, payload).await
                }
            })
            .await
            .map(|(value, _endpoint)| value)
    }

    pub async fn xa_start(&self, session_id: &str, xid: Xid, flag: XaStartFlag) -> Result<XaResponse, OjpError> {
        self.xa_call(session_id, MessageType::XaStart, xid, Some(flag), None, false, None).await
    }

    pub async fn xa_end(&self, session_id: &str, xid: Xid, flag: XaEndFlag) -> Result<XaResponse, OjpError> {
        self.xa_call(session_id, MessageType::XaEnd, xid, None, Some(flag), false, None).await
    }

    pub async fn xa_prepare(&self, session_id: &str, xid: Xid) -> Result<XaResponse, OjpError> {
        self.xa_call(session_id, MessageType::XaPrepare, xid, None, None, false, None).await
    }

    pub async fn xa_commit(&self, session_id: &str, xid: Xid, one_phase: bool) -> Result<XaResponse, OjpError> {
        self.xa_call(session_id, MessageType::XaCommit, xid, None, None, one_phase, None).await
    }

    pub async fn xa_rollback(&self, session_id: &str, xid: Xid) -> Result<XaResponse, OjpError> {
        self.xa_call(session_id, MessageType::XaRollback, xid, None, None, false, None).await
    }

    pub async fn xa_recover(&self, session_id: &str) -> Result<Vec<Xid>, OjpError> {
        let dummy = Xid {
            format_id: 0,
            global_tx_id: Vec::new(),
            branch_qualifier: Vec::new(),
        };
        match self.xa_call(session_id, MessageType::XaRecover, dummy, None, None, false, None).await? {
            XaResponse::Recovered(xids) => Ok(xids),
            other => Err(OjpError::XaProtocolViolation {
                xid: String::new(),
                attempted: "recover".to_string(),
                from_state: format!("{other:?}"),
            }),
        }
    }

    pub async fn xa_forget(&self, session_id: &str, xid: Xid) -> Result<(), OjpError> {
        self.xa_call(session_id, MessageType::XaForget, xid, None, None, false, None).await?;
        Ok(())
    }

    pub async fn xa_set_transaction_timeout(
        &self,
        session_id: &str,
        xid: Xid,
        timeout_seconds: u32,
    ) -> Result<(), OjpError> {
        self.xa_call(
            session_id,
            MessageType::XaSetTransactionTimeout,
            xid,
            None,
            None,
            false,
            Some(timeout_seconds),
        )
        .await?;
        Ok(())
    }

    pub async fn xa_get_transaction_timeout(&self, session_id: &str, xid: Xid) -> Result<u32, OjpError> {
        match self
            .xa_call(session_id, MessageType::XaGetTransactionTimeout, xid, None, None, false, None)
            .await?
        {
            XaResponse::Timeout(seconds) => Ok(seconds),
            other => Err(OjpError::XaProtocolViolation {
                xid: String::new(),
                attempted: "getTransactionTimeout".to_string(),
                from_state: format!("{other:?}"),
            }),
        }
    }

    /// `xaIsSameRM(xid, otherConnHash) -> bool` (§4.I): two branches share a
    /// resource manager iff they were opened against the same connHash.
    /// The proxy needs no state lookup for this, so the comparison travels
    /// on the envelope's `target_server` field rather than a dedicated
    /// request shape.
    pub async fn xa_is_same_rm(&self, session_id: &str, xid: Xid, other_conn_hash: &str) -> Result<bool, OjpError> {
        let mut envelope = self.envelope(Some(session_id), None, true, String::new()).await;
        envelope.target_server = other_conn_hash.to_string();
        let request = XaRequest {
            envelope,
            xid,
            start_flag: None,
            end_flag: None,
            one_phase: false,
            timeout_seconds: None,
        };
        let payload = bincode::serialize(&request).map_err(|e| OjpError::Serialization { message: e.to_string() })?;
        self.dispatcher
            .dispatch_with_retry(Some(session_id), |endpoint| {
                let payload = payload.clone();
                async move {
                    let mut transports = self.transports.lock().await;
                    self.call_raw(&mut transports, &endpoint, MessageType::XaIsSameRm, payload).await
                }
            })
            .await
            .map(|(value, _endpoint)| value)
    }

    /// `callResource(CallResourceRequest) -> CallResourceResponse` (component N).
    pub async fn call_resource(
        &self,
        session_id: &str,
        request: CallResourceRequest,
    ) -> Result<CallResourceResponse, OjpError> {
        let payload = bincode::serialize(&request).map_err(|e| OjpError::Serialization { message: e.to_string() })?;
        self.dispatcher
            .dispatch_with_retry(Some(session_id), |endpoint| {
                let payload = payload.clone();
                async move {
                    let mut transports = self.transports.lock().await;
                    self.call_raw(&mut transports, &endpoint, MessageType::CallResource, payload).await
                }
            })
            .await
            .map(|(value, _endpoint)| value)
    }

    /// `createLob() -> stream LobDataBlock -> stream LobReference`.
    pub async fn create_lob(
        &self,
        session_id: &str,
        lob_type: LobType,
        blocks: Vec<Vec<u8>>,
    ) -> Result<LobReference, OjpError> {
        let endpoint_route = self.dispatcher.route(Some(session_id)).await?;
        let mut transports = self.transports.lock().await;
        if !transports.contains_key(&endpoint_route.endpoint) {
            let transport =
                Transport::connect(&endpoint_route.endpoint, self.config.pool.connection_timeout_ms).await?;
            transports.insert(endpoint_route.endpoint.clone(), transport);
        }
        let transport = transports.get_mut(&endpoint_route.endpoint).expect("just inserted");

        let mut reference: Option<LobReference> = None;
        let mut position = 0u64;
        for (idx, bytes) in blocks.into_iter().enumerate() {
            let block = LobDataBlock {
                lob_id: reference.as_ref().map(|r| r.lob_id),
                position,
                bytes: bytes.clone(),
                lob_type,
                metadata: None,
            };
            position += bytes.len() as u64;
            let payload = bincode::serialize(&block).map_err(|e| OjpError::Serialization { message: e.to_string() })?;
            let message = transport.send_request(MessageType::LobDataBlock, payload).await?;
            let response: LobReference = bincode::deserialize(&message.payload).map_err(|e| OjpError::Serialization {
                message: e.to_string(),
            })?;
            reference = Some(response);
            let _ = idx;
        }
        reference.ok_or_else(|| OjpError::Configuration {
            details: "createLob called with no blocks".to_string(),
        })
    }

    /// `readLob(ReadLobRequest) -> stream LobDataBlock`.
    pub async fn read_lob(
        &self,
        session_id: &str,
        lob_id: u64,
        position: u64,
        length: u64,
    ) -> Result<Vec<u8>, OjpError> {
        let envelope = self.envelope(Some(session_id), None, false, String::new()).await;
        let request = ReadLobRequest {
            envelope,
            lob_id,
            position,
            length,
        };
        let route = self.dispatcher.route(Some(session_id)).await?;
        let mut transports = self.transports.lock().await;
        if !transports.contains_key(&route.endpoint) {
            let transport = Transport::connect(&route.endpoint, self.config.pool.connection_timeout_ms).await?;
            transports.insert(route.endpoint.clone(), transport);
        }
        let transport = transports.get_mut(&route.endpoint).expect("just inserted");

        let payload = bincode::serialize(&request).map_err(|e| OjpError::Serialization { message: e.to_string() })?;
        let mut message = transport.send_request(MessageType::ReadLob, payload).await?;
        let mut out = Vec::with_capacity(length as usize);
        loop {
            let block: LobDataBlock = bincode::deserialize(&message.payload).map_err(|e| OjpError::Serialization {
                message: e.to_string(),
            })?;
            let block_len = block.bytes.len() as u64;
            out.extend_from_slice(&block.bytes);
            if out.len() as u64 >= length || block_len == 0 {
                break;
            }
            message = transport.read_next_frame().await?;
        }
        out.truncate(length as usize);
        Ok(out)
    }

    /// `terminateSession -> SessionTerminationStatus` (invariant 7: idempotent).
    pub async fn terminate_session(&self, session_id: &str) -> Result<SessionTerminationStatus, OjpError> {
        let route = self.dispatcher.route(Some(session_id)).await;
        let envelope = self.envelope(Some(session_id), None, false, String::new()).await;
        let payload = bincode::serialize(&envelope).map_err(|e| OjpError::Serialization { message: e.to_string() })?;

        let status = match route {
            Ok(route) => {
                let mut transports = self.transports.lock().await;
                self.call_raw(&mut transports, &route.endpoint, MessageType::TerminateSession, payload)
                    .await
            }
            Err(_) => Ok(SessionTerminationStatus {
                session_id: session_id.to_string(),
                already_terminated: true,
            }),
        };
        self.sessions.unregister(session_id).await;
        status
    }

    pub fn endpoints(&self) -> &Arc<EndpointRegistry> {
        &self.endpoints
    }
}
