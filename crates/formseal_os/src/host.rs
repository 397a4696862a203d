#![forbid(unsafe_code)]

//! Runs a `ProcessorRuntime` on its own task. Only serialized JSON strings
//! cross the mailbox in either direction.

use formseal_contracts::ContractViolation;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::config::ProcessorConfig;
use crate::processor::{ProcessorError, ProcessorRuntime};

/// Owner side of a running processor. Dropping the handle stops the task and
/// wipes every retained payload.
#[derive(Debug)]
pub struct ProcessorHandle {
    mailbox: mpsc::Sender<String>,
    replies: Option<mpsc::Receiver<String>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<usize>,
}

impl ProcessorHandle {
    /// Must be called from inside a tokio runtime.
    pub fn spawn(config: ProcessorConfig) -> Result<Self, ContractViolation> {
        let runtime = ProcessorRuntime::new(config)?;
        let (mailbox, inbox) = mpsc::channel(config.mailbox_capacity);
        let (reply_tx, replies) = mpsc::channel(config.mailbox_capacity);
        let (shutdown, stop) = oneshot::channel();
        let task = tokio::spawn(run(runtime, inbox, reply_tx, stop));
        info!(
            mailbox_capacity = config.mailbox_capacity,
            max_retained_payloads = config.max_retained_payloads,
            "processor started"
        );
        Ok(Self {
            mailbox,
            replies: Some(replies),
            shutdown: Some(shutdown),
            task,
        })
    }

    pub fn mailbox(&self) -> mpsc::Sender<String> {
        self.mailbox.clone()
    }

    /// The reply stream has a single reader; later calls return `None`.
    pub fn take_replies(&mut self) -> Option<mpsc::Receiver<String>> {
        self.replies.take()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the task and returns how many retained payloads were wiped.
    pub async fn shutdown(mut self) -> Result<usize, ProcessorError> {
        if let Some(stop) = self.shutdown.take() {
            let _ = stop.send(());
        }
        (&mut self.task)
            .await
            .map_err(|err| ProcessorError::Worker(format!("processor task failed: {err}")))
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.shutdown.take() {
            let _ = stop.send(());
        }
    }
}

async fn run(
    mut runtime: ProcessorRuntime,
    mut inbox: mpsc::Receiver<String>,
    replies: mpsc::Sender<String>,
    mut stop: oneshot::Receiver<()>,
) -> usize {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            message = inbox.recv() => {
                let Some(mut message) = message else {
                    break;
                };
                let reply = runtime.handle_message(&message);
                message.zeroize();
                if let Some(reply) = reply {
                    if replies.send(reply).await.is_err() {
                        warn!("processor reply stream closed");
                        break;
                    }
                }
            }
        }
    }
    let wiped = runtime.wipe_all();
    info!(wiped, "processor stopped");
    wiped
}
