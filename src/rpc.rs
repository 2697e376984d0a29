// Copyright (c) 2025 - Cowboy AI, Inc.
//! Ledger RPC over NATS request-reply
//!
//! ```text
//! RemoteLedger ──request(LedgerRequest)──► quota.rpc ──► LedgerResponder ──► Ledger
//!              ◄──────────────────────── LedgerResponse ◄─┘
//! ```
//!
//! Envelopes are JSON. Errors travel as [`WireError`], which keeps the error
//! kind and its structured fields so the caller gets the same [`QuotaError`]
//! back.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::domain::{
    Commission, Holding, HoldingFilter, HoldingKey, IssueRequest, Limit, PendingResolution,
    ResolveOutcome, Serial,
};
use crate::errors::{ErrorKind, QuotaError, QuotaResult};
use crate::nats::NatsClient;
use crate::service::{Ledger, QuotaService};

/// Request envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerRequest {
    Issue {
        request: IssueRequest,
    },
    Resolve {
        serial: Serial,
        accept: bool,
    },
    GetHolding {
        key: HoldingKey,
    },
    ListHoldings {
        holder: Option<String>,
        #[serde(default)]
        resources: Vec<String>,
    },
    SetLimit {
        key: HoldingKey,
        limit: Limit,
    },
    ResolvePending {
        client_key: String,
        #[serde(default)]
        accept: Vec<Serial>,
        #[serde(default)]
        reject: Vec<Serial>,
    },
    PendingCommissions {
        client_key: String,
    },
    GetCommission {
        client_key: String,
        serial: Serial,
    },
}

impl LedgerRequest {
    fn op(&self) -> &'static str {
        match self {
            LedgerRequest::Issue { .. } => "issue",
            LedgerRequest::Resolve { .. } => "resolve",
            LedgerRequest::GetHolding { .. } => "get_holding",
            LedgerRequest::ListHoldings { .. } => "list_holdings",
            LedgerRequest::SetLimit { .. } => "set_limit",
            LedgerRequest::ResolvePending { .. } => "resolve_pending",
            LedgerRequest::PendingCommissions { .. } => "pending_commissions",
            LedgerRequest::GetCommission { .. } => "get_commission",
        }
    }
}

/// Response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LedgerResponse {
    Issued { serial: Serial },
    Resolved { outcome: ResolveOutcome },
    Holding { holding: Holding },
    Holdings { holdings: Vec<Holding> },
    PendingResolved { resolution: PendingResolution },
    Pending { serials: Vec<Serial> },
    Commission { commission: Commission },
    Error { error: WireError },
}

/// Error as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,

    /// The error with its structured fields
    pub payload: serde_json::Value,
}

impl From<&QuotaError> for WireError {
    fn from(err: &QuotaError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            payload: serde_json::to_value(err).unwrap_or(serde_json::Value::Null),
        }
    }
}

impl From<WireError> for QuotaError {
    fn from(wire: WireError) -> Self {
        match serde_json::from_value::<QuotaError>(wire.payload) {
            Ok(err) if err.kind() == wire.kind => err,
            _ => match wire.kind {
                ErrorKind::InvalidRequest => QuotaError::InvalidRequest(wire.message),
                ErrorKind::Serialization => QuotaError::Serialization(wire.message),
                ErrorKind::Configuration => QuotaError::Configuration(wire.message),
                _ => QuotaError::Nats(wire.message),
            },
        }
    }
}

/// Serves a [`Ledger`] on a request-reply subject
pub struct LedgerResponder {
    client: NatsClient,
    ledger: Arc<Ledger>,
    subject: String,
}

impl LedgerResponder {
    pub fn new(client: NatsClient, ledger: Arc<Ledger>, subject: impl Into<String>) -> Self {
        Self {
            client,
            ledger,
            subject: subject.into(),
        }
    }

    /// Answer requests until the subscription closes
    ///
    /// Each request is handled on its own task; requests on the same
    /// holdings are serialized by the ledger's row locks.
    pub async fn serve(&self) -> QuotaResult<()> {
        let mut subscriber = self.client.subscribe(&self.subject).await?;
        info!(subject = %self.subject, "Ledger responder listening");

        while let Some(msg) = subscriber.next().await {
            let Some(reply) = msg.reply.clone() else {
                warn!(subject = %msg.subject, "Ignoring ledger request without reply subject");
                continue;
            };

            let ledger = self.ledger.clone();
            let client = self.client.clone();
            tokio::spawn(async move {
                let response = match serde_json::from_slice::<LedgerRequest>(&msg.payload) {
                    Ok(request) => {
                        debug!(op = request.op(), "Ledger request");
                        handle(&ledger, request).await
                    }
                    Err(e) => LedgerResponse::Error {
                        error: WireError::from(&QuotaError::from(e)),
                    },
                };

                match serde_json::to_vec(&response) {
                    Ok(payload) => {
                        if let Err(e) = client.inner().publish(reply, payload.into()).await {
                            error!(error = %e, "Failed to send ledger response");
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to encode ledger response"),
                }
            });
        }

        info!(subject = %self.subject, "Ledger responder stopped");
        Ok(())
    }
}

/// Dispatch one request to the ledger
pub async fn handle(ledger: &Ledger, request: LedgerRequest) -> LedgerResponse {
    let result = match request {
        LedgerRequest::Issue { request } => ledger
            .issue(request)
            .await
            .map(|serial| LedgerResponse::Issued { serial }),
        LedgerRequest::Resolve { serial, accept } => ledger
            .resolve(serial, accept)
            .await
            .map(|outcome| LedgerResponse::Resolved { outcome }),
        LedgerRequest::GetHolding { key } => ledger
            .get_holding(&key)
            .await
            .map(|holding| LedgerResponse::Holding { holding }),
        LedgerRequest::ListHoldings { holder, resources } => ledger
            .list_holdings(&HoldingFilter { holder, resources })
            .await
            .map(|holdings| LedgerResponse::Holdings { holdings }),
        LedgerRequest::SetLimit { key, limit } => ledger
            .set_limit(&key, limit)
            .await
            .map(|holding| LedgerResponse::Holding { holding }),
        LedgerRequest::ResolvePending {
            client_key,
            accept,
            reject,
        } => ledger
            .resolve_pending(&client_key, &accept, &reject)
            .await
            .map(|resolution| LedgerResponse::PendingResolved { resolution }),
        LedgerRequest::PendingCommissions { client_key } => ledger
            .pending_commissions(&client_key)
            .await
            .map(|serials| LedgerResponse::Pending { serials }),
        LedgerRequest::GetCommission { client_key, serial } => ledger
            .get_commission(&client_key, serial)
            .await
            .map(|commission| LedgerResponse::Commission { commission }),
    };

    result.unwrap_or_else(|e| LedgerResponse::Error {
        error: WireError::from(&e),
    })
}

/// [`QuotaService`] backed by a remote ledger
#[derive(Clone)]
pub struct RemoteLedger {
    client: NatsClient,
    subject: String,
}

impl RemoteLedger {
    pub fn new(client: NatsClient, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }

    async fn call(&self, request: LedgerRequest) -> QuotaResult<LedgerResponse> {
        let response: LedgerResponse = self.client.request(&self.subject, &request).await?;
        match response {
            LedgerResponse::Error { error } => Err(error.into()),
            other => Ok(other),
        }
    }

    pub async fn pending_commissions(&self, client_key: &str) -> QuotaResult<Vec<Serial>> {
        match self
            .call(LedgerRequest::PendingCommissions {
                client_key: client_key.to_string(),
            })
            .await?
        {
            LedgerResponse::Pending { serials } => Ok(serials),
            other => Err(unexpected(other)),
        }
    }

    pub async fn resolve_pending(
        &self,
        client_key: &str,
        accept: &[Serial],
        reject: &[Serial],
    ) -> QuotaResult<PendingResolution> {
        match self
            .call(LedgerRequest::ResolvePending {
                client_key: client_key.to_string(),
                accept: accept.to_vec(),
                reject: reject.to_vec(),
            })
            .await?
        {
            LedgerResponse::PendingResolved { resolution } => Ok(resolution),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_commission(&self, client_key: &str, serial: Serial) -> QuotaResult<Commission> {
        match self
            .call(LedgerRequest::GetCommission {
                client_key: client_key.to_string(),
                serial,
            })
            .await?
        {
            LedgerResponse::Commission { commission } => Ok(commission),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: LedgerResponse) -> QuotaError {
    QuotaError::Serialization(format!("unexpected ledger response: {:?}", response))
}

#[async_trait]
impl QuotaService for RemoteLedger {
    async fn issue_commission(&self, request: IssueRequest) -> QuotaResult<Serial> {
        match self.call(LedgerRequest::Issue { request }).await? {
            LedgerResponse::Issued { serial } => Ok(serial),
            other => Err(unexpected(other)),
        }
    }

    async fn resolve_commission(&self, serial: Serial, accept: bool) -> QuotaResult<ResolveOutcome> {
        match self.call(LedgerRequest::Resolve { serial, accept }).await? {
            LedgerResponse::Resolved { outcome } => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    async fn get_holding(&self, key: &HoldingKey) -> QuotaResult<Holding> {
        match self.call(LedgerRequest::GetHolding { key: key.clone() }).await? {
            LedgerResponse::Holding { holding } => Ok(holding),
            other => Err(unexpected(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::nats::NatsConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_error_keeps_structured_fields() {
        let err = QuotaError::NoCapacity {
            key: HoldingKey::new("alice", "cpu"),
            quantity: 3,
            usage_reserved: 2,
            limit: Limit::new(4),
        };
        let wire = WireError::from(&err);
        assert_eq!(wire.kind, ErrorKind::NoCapacity);

        let json = serde_json::to_string(&wire).unwrap();
        let decoded: WireError = serde_json::from_str(&json).unwrap();
        assert_eq!(QuotaError::from(decoded), err);
    }

    #[test]
    fn test_wire_error_without_payload_falls_back_to_message() {
        let wire = WireError {
            kind: ErrorKind::InvalidRequest,
            message: "bad".to_string(),
            payload: serde_json::Value::Null,
        };
        assert_eq!(QuotaError::from(wire), QuotaError::InvalidRequest("bad".to_string()));
    }

    #[test]
    fn test_request_envelope_is_tagged() {
        let request = LedgerRequest::Resolve {
            serial: Serial(5),
            accept: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["op"], "resolve");
        assert_eq!(json["serial"], 5);
    }

    #[tokio::test]
    async fn test_handle_maps_errors() {
        let ledger = Ledger::in_memory(&LedgerConfig::default());
        let response = handle(
            &ledger,
            LedgerRequest::Resolve {
                serial: Serial(1),
                accept: true,
            },
        )
        .await;

        match response {
            LedgerResponse::Error { error } => assert_eq!(error.kind, ErrorKind::UnknownCommission),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_remote_ledger_roundtrip() -> QuotaResult<()> {
        let client = NatsClient::new(NatsConfig::default()).await?;
        let ledger = Arc::new(Ledger::in_memory(&LedgerConfig::default()));
        ledger.register_resource("cpu", Limit::new(4)).await?;

        let subject = format!("quota.rpc.test.{}", uuid::Uuid::now_v7().simple());
        let responder = LedgerResponder::new(client.clone(), ledger.clone(), subject.clone());
        tokio::spawn(async move { responder.serve().await });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let remote = RemoteLedger::new(client, subject);
        let key = HoldingKey::new("alice", "cpu");
        let serial = remote
            .issue_commission(IssueRequest::new("cyclades", "vm").provision(key.clone(), 2))
            .await?;
        remote.resolve_commission(serial, true).await?;

        let holding = remote.get_holding(&key).await?;
        assert_eq!(holding.usage_committed, 2);

        let err = remote
            .issue_commission(IssueRequest::new("cyclades", "vm").provision(key, 5))
            .await
            .unwrap_err();
        assert!(err.is_capacity_error());
        Ok(())
    }
}
