#![forbid(unsafe_code)]

//! Caller side of the processor boundary. Correlates responses to requests by
//! `requestId`; arrival order carries no meaning.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use formseal_contracts::form_config::EncryptedFormConfig;
use formseal_contracts::form_structure::{FormStructure, MatchResult};
use formseal_contracts::processor_wire::{
    DecryptRequest, DecryptResult, ErrorName, KeyMaterial, MatchFieldsRequest, MatchFieldsResult,
    ProcessFormDataRequest, ProcessFormDataResult, ProcessorAction, ProcessorRequest,
    ProcessorResponse, ResolveFormRequest, ResponseStatus, SanitizeRequest, SanitizeResult,
    WipeRequest, WipeResult,
};
use formseal_contracts::{ContractViolation, Validate};
use formseal_os::config::env_parse;
use formseal_os::ProcessorHandle;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub request_timeout_ms: u64,
    pub max_in_flight: usize,
}

impl ChannelConfig {
    pub fn mvp_v1() -> Self {
        Self {
            request_timeout_ms: 10_000,
            max_in_flight: 64,
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::mvp_v1();
        Self {
            request_timeout_ms: env_parse("FORMSEAL_REQUEST_TIMEOUT_MS", 10..=600_000)
                .unwrap_or(defaults.request_timeout_ms),
            max_in_flight: env_parse("FORMSEAL_MAX_IN_FLIGHT", 1..=4_096)
                .unwrap_or(defaults.max_in_flight),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Validate for ChannelConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.request_timeout_ms == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "channel_config.request_timeout_ms",
                reason: "must be > 0",
            });
        }
        if self.max_in_flight == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "channel_config.max_in_flight",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("secure channel is closed")]
    Closed,
    #[error("too many requests in flight (max {max})")]
    Busy { max: usize },
    #[error("request {request_id} timed out after {timeout_ms} ms")]
    Timeout { request_id: String, timeout_ms: u64 },
    #[error("processor unavailable: {0}")]
    Worker(String),
    #[error("{}: {message}", .name.as_str())]
    Remote {
        name: ErrorName,
        message: String,
        details: Vec<String>,
    },
    #[error("invalid channel configuration: {0}")]
    Config(ContractViolation),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChannelError {
    pub fn remote_name(&self) -> Option<ErrorName> {
        match self {
            Self::Remote { name, .. } => Some(*name),
            _ => None,
        }
    }
}

type PendingTable = BTreeMap<String, oneshot::Sender<ProcessorResponse>>;

#[derive(Debug, Default)]
struct Shared {
    pending: Mutex<PendingTable>,
    closed: AtomicBool,
    disconnected: AtomicBool,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Removes its correlation entry on every exit from `request`, including a
// caller dropping the future mid-await. The reader has already removed the
// entry when a reply was delivered.
struct PendingEntry<'a> {
    shared: &'a Shared,
    request_id: &'a str,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(self.request_id);
    }
}

/// Instance-owned correlation table plus the reader task that feeds it.
#[derive(Debug)]
pub struct SecureChannel {
    config: ChannelConfig,
    outbound: mpsc::Sender<String>,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SecureChannel {
    /// Starts the reader task; must be called from inside a tokio runtime.
    pub fn open(
        config: ChannelConfig,
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<String>,
    ) -> Result<Self, ChannelError> {
        config.validate().map_err(ChannelError::Config)?;
        let shared = Arc::new(Shared::default());
        let reader = tokio::spawn(read_responses(inbound, Arc::clone(&shared)));
        Ok(Self {
            config,
            outbound,
            shared,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Attaches to a running processor. The processor's reply stream can only
    /// be attached once.
    pub fn connect(
        config: ChannelConfig,
        processor: &mut ProcessorHandle,
    ) -> Result<Self, ChannelError> {
        let replies = processor
            .take_replies()
            .ok_or_else(|| ChannelError::Worker("processor replies already attached".to_string()))?;
        Self::open(config, processor.mailbox(), replies)
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Fails every pending request with `Closed` and stops the reader.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = {
            let mut pending = self.shared.pending();
            let count = pending.len();
            pending.clear();
            count
        };
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
        debug!(dropped, "secure channel closed");
    }

    /// Sends one request and waits for the correlated response or the
    /// configured timeout. A timed-out request's late response is dropped.
    /// Dropping the returned future releases its correlation entry.
    pub async fn request(
        &self,
        action: ProcessorAction,
        payload: Value,
    ) -> Result<Value, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if self.shared.disconnected.load(Ordering::SeqCst) {
            return Err(ChannelError::Worker(
                "processor reply stream ended".to_string(),
            ));
        }

        let request_id = Uuid::new_v4().to_string();
        let message = serde_json::to_string(&ProcessorRequest {
            action,
            payload,
            request_id: request_id.clone(),
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let _entry = {
            let mut pending = self.shared.pending();
            if pending.len() >= self.config.max_in_flight {
                return Err(ChannelError::Busy {
                    max: self.config.max_in_flight,
                });
            }
            pending.insert(request_id.clone(), reply_tx);
            PendingEntry {
                shared: &self.shared,
                request_id: &request_id,
            }
        };

        if self.outbound.send(message).await.is_err() {
            return Err(ChannelError::Worker("processor mailbox closed".to_string()));
        }
        debug!(request_id = %request_id, action = action.as_str(), "request sent");

        let response = match tokio::time::timeout(self.config.request_timeout(), reply_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(if self.is_closed() {
                    ChannelError::Closed
                } else {
                    ChannelError::Worker("processor reply stream ended".to_string())
                })
            }
            Err(_) => {
                warn!(request_id = %request_id, action = action.as_str(), "request timed out");
                return Err(ChannelError::Timeout {
                    request_id: request_id.clone(),
                    timeout_ms: self.config.request_timeout_ms,
                });
            }
        };

        match response.status {
            ResponseStatus::Success => response
                .result
                .ok_or_else(|| ChannelError::Worker("success response without result".to_string())),
            ResponseStatus::Error => {
                let error = response.error.ok_or_else(|| {
                    ChannelError::Worker("error response without error".to_string())
                })?;
                Err(ChannelError::Remote {
                    name: error.name,
                    message: error.message,
                    details: error.details,
                })
            }
        }
    }

    async fn call<Req, Res>(
        &self,
        action: ProcessorAction,
        payload: &Req,
    ) -> Result<Res, ChannelError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let result = self.request(action, serde_json::to_value(payload)?).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn decrypt(
        &self,
        config: &EncryptedFormConfig,
        key: &KeyMaterial,
    ) -> Result<DecryptResult, ChannelError> {
        let payload = DecryptRequest {
            config: config.clone(),
            key: key.clone(),
        };
        self.call(ProcessorAction::Decrypt, &payload).await
    }

    pub async fn process_form_data(
        &self,
        data: Value,
    ) -> Result<ProcessFormDataResult, ChannelError> {
        self.call(ProcessorAction::ProcessFormData, &ProcessFormDataRequest { data })
            .await
    }

    pub async fn match_fields(
        &self,
        request: &MatchFieldsRequest,
    ) -> Result<Vec<MatchResult>, ChannelError> {
        let result: MatchFieldsResult = self.call(ProcessorAction::MatchFields, request).await?;
        Ok(result.results)
    }

    /// Matches the fields behind a `decrypt` handle; the handle is consumed.
    pub async fn match_retained(
        &self,
        payload_handle: &str,
        form_structure: &FormStructure,
    ) -> Result<Vec<MatchResult>, ChannelError> {
        self.match_fields(&MatchFieldsRequest {
            payload_handle: Some(payload_handle.to_string()),
            fields: None,
            form_structure: form_structure.clone(),
        })
        .await
    }

    pub async fn resolve_form(
        &self,
        config: &EncryptedFormConfig,
        key: &KeyMaterial,
        form_structure: &FormStructure,
    ) -> Result<Vec<MatchResult>, ChannelError> {
        let payload = ResolveFormRequest {
            config: config.clone(),
            key: key.clone(),
            form_structure: form_structure.clone(),
        };
        let result: MatchFieldsResult = self.call(ProcessorAction::ResolveForm, &payload).await?;
        Ok(result.results)
    }

    pub async fn sanitize(&self, value: Value, schema: Value) -> Result<Value, ChannelError> {
        let result: SanitizeResult = self
            .call(ProcessorAction::Sanitize, &SanitizeRequest { value, schema })
            .await?;
        Ok(result.value)
    }

    pub async fn wipe(&self, references: Vec<String>) -> Result<usize, ChannelError> {
        let result: WipeResult = self
            .call(ProcessorAction::Wipe, &WipeRequest { references })
            .await?;
        Ok(result.wiped)
    }
}

impl Drop for SecureChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_responses(mut inbound: mpsc::Receiver<String>, shared: Arc<Shared>) {
    while let Some(raw) = inbound.recv().await {
        let response = match serde_json::from_str::<ProcessorResponse>(&raw) {
            Ok(response) => response,
            Err(_) => {
                warn!(len = raw.len(), "dropping undecodable processor response");
                continue;
            }
        };
        let waiter = shared.pending().remove(&response.request_id);
        match waiter {
            Some(waiter) => {
                if waiter.send(response).is_err() {
                    debug!("requester went away before its response arrived");
                }
            }
            None => {
                warn!(
                    request_id = %response.request_id,
                    "dropping response for unknown request id"
                );
            }
        }
    }
    shared.disconnected.store(true, Ordering::SeqCst);
    let orphaned = {
        let mut pending = shared.pending();
        let count = pending.len();
        pending.clear();
        count
    };
    if orphaned > 0 {
        warn!(orphaned, "processor reply stream ended with requests pending");
    }
}
