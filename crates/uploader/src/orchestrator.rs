//! Upload orchestrator.
//!
//! [`UploadOrchestrator`] is a cloneable handle to a single actor task that
//! owns all upload state. Caller requests, stall ticks and transport
//! completions are funnelled through one command channel, so transitions
//! never interleave and every accepted upload is finalized exactly once.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use nodeflash_image::{ImageInfo, ImageLoader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::error::UploadError;
use crate::observer::CompletionObserver;
use crate::stall::StallTimer;
use crate::transport::{TransferHandle, TransportSession};
use crate::types::{
    NodeAddress, Outcome, RetryReason, StateSnapshot, TransferAttempt, TransferResult, UploadEvent,
    UploadId, UploadRequest, UploaderConfig,
};

const COMMAND_CAPACITY: usize = 64;

pub(crate) enum Command {
    Configure(Arc<dyn TransportSession>),
    RegisterObserver(Arc<dyn CompletionObserver>),
    Begin {
        request: UploadRequest,
        reply: oneshot::Sender<Result<(), UploadError>>,
    },
    Tick {
        upload_id: UploadId,
    },
    Completed {
        generation: u64,
        result: TransferResult,
    },
    Snapshot(oneshot::Sender<StateSnapshot>),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Configure(_) => f.write_str("Configure"),
            Command::RegisterObserver(_) => f.write_str("RegisterObserver"),
            Command::Begin { request, .. } => f.debug_struct("Begin").field("request", request).finish(),
            Command::Tick { upload_id } => f.debug_struct("Tick").field("upload_id", upload_id).finish(),
            Command::Completed { generation, result } => f
                .debug_struct("Completed")
                .field("generation", generation)
                .field("result", result)
                .finish(),
            Command::Snapshot(_) => f.write_str("Snapshot"),
        }
    }
}

/// Handle to the upload state machine.
///
/// The actor stops once every handle has been dropped.
#[derive(Clone)]
pub struct UploadOrchestrator {
    commands: mpsc::Sender<Command>,
    events_rx: Arc<Mutex<Option<mpsc::Receiver<UploadEvent>>>>,
}

impl UploadOrchestrator {
    /// Validates `config` and spawns the actor on the current tokio runtime.
    pub fn spawn(
        config: UploaderConfig,
        loader: Arc<dyn ImageLoader>,
    ) -> Result<Self, UploadError> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);

        let actor = Actor {
            config,
            loader,
            transport: None,
            observer: None,
            state: UploadState::default(),
            stall_timer: StallTimer::default(),
            commands: commands_tx.downgrade(),
            events_tx,
        };
        tokio::spawn(actor.run(commands_rx));

        Ok(Self {
            commands: commands_tx,
            events_rx: Arc::new(Mutex::new(Some(events_rx))),
        })
    }

    /// Takes the progress event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Binds the transport used by subsequent attempts.
    pub async fn configure(&self, transport: Arc<dyn TransportSession>) -> Result<(), UploadError> {
        self.send(Command::Configure(transport)).await
    }

    /// Binds the observer that receives outcomes, replacing any previous one.
    pub async fn register_observer(
        &self,
        observer: Arc<dyn CompletionObserver>,
    ) -> Result<(), UploadError> {
        self.send(Command::RegisterObserver(observer)).await
    }

    /// Starts uploading `source` to `target`.
    ///
    /// Returns once the first attempt is under way, or once the upload has
    /// already finished (missing transport, unreadable image). The final
    /// result always arrives at the observer. Fails with
    /// [`UploadError::Busy`] while another upload is in progress.
    pub async fn begin_upload(
        &self,
        target: NodeAddress,
        source: impl Into<PathBuf>,
    ) -> Result<UploadId, UploadError> {
        let request = UploadRequest::new(target, source);
        let upload_id = request.id;
        let (reply, reply_rx) = oneshot::channel();
        self.send(Command::Begin { request, reply }).await?;
        reply_rx.await.map_err(|_| UploadError::Closed)??;
        Ok(upload_id)
    }

    /// Returns a copy of the current state.
    pub async fn state(&self) -> Result<StateSnapshot, UploadError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| UploadError::Closed)
    }

    async fn send(&self, cmd: Command) -> Result<(), UploadError> {
        self.commands.send(cmd).await.map_err(|_| UploadError::Closed)
    }
}

#[derive(Debug, Default)]
struct UploadState {
    busy: bool,
    request: Option<UploadRequest>,
    stall_remaining: u32,
    retry_count: u32,
    generation: u64,
}

impl UploadState {
    /// Back to idle. The generation keeps counting so completions from
    /// earlier uploads stay recognisable as stale.
    fn reset(&mut self) {
        self.busy = false;
        self.request = None;
        self.stall_remaining = 0;
        self.retry_count = 0;
    }
}

struct Actor {
    config: UploaderConfig,
    loader: Arc<dyn ImageLoader>,
    transport: Option<Arc<dyn TransportSession>>,
    observer: Option<Arc<dyn CompletionObserver>>,
    state: UploadState,
    stall_timer: StallTimer,
    commands: mpsc::WeakSender<Command>,
    events_tx: mpsc::Sender<UploadEvent>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(cmd) = commands.recv().await {
            self.handle(cmd).await;
        }

        self.stall_timer.disarm();
        if let Some(request) = &self.state.request {
            warn!(upload = %request.id, "orchestrator stopped with an upload in flight");
        }
        debug!("upload orchestrator stopped");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Configure(transport) => {
                debug!("transport configured");
                self.transport = Some(transport);
            }
            Command::RegisterObserver(observer) => {
                debug!("completion observer registered");
                self.observer = Some(observer);
            }
            Command::Begin { request, reply } => {
                let result = self.begin(request).await;
                let _ = reply.send(result);
            }
            Command::Tick { upload_id } => self.on_tick(upload_id).await,
            Command::Completed { generation, result } => {
                self.on_completed(generation, result).await;
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn begin(&mut self, request: UploadRequest) -> Result<(), UploadError> {
        if self.transport.is_none() {
            warn!(upload = %request.id, node = %request.target, "upload requested with no transport configured");
            self.dispatch(request.id, Outcome::NoTransportConfigured, 0);
            return Ok(());
        }
        if self.state.busy {
            warn!(upload = %request.id, "upload rejected: another upload is in progress");
            return Err(UploadError::Busy);
        }

        info!(
            upload = %request.id,
            node = %request.target,
            source = %request.source.display(),
            worst_case = ?self.config.worst_case_duration(),
            "starting upload"
        );
        self.state.busy = true;
        self.state.retry_count = 0;
        self.state.request = Some(request);
        self.attempt_upload(true).await;
        Ok(())
    }

    /// Loads the image and starts one transfer.
    ///
    /// The stall ticker is armed on the first attempt only; retries reuse it.
    async fn attempt_upload(&mut self, first_attempt: bool) {
        let (Some(request), Some(transport)) = (self.state.request.clone(), self.transport.clone())
        else {
            return;
        };

        let loader = Arc::clone(&self.loader);
        let path = request.source.clone();
        let payload = match tokio::task::spawn_blocking(move || loader.load(&path)).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!(upload = %request.id, error = %e, "upload failed at image read");
                self.finalize(Outcome::SourceNotFound);
                return;
            }
            Err(e) => {
                error!(upload = %request.id, error = %e, "image loader task failed");
                self.finalize(Outcome::SourceNotFound);
                return;
            }
        };

        if first_attempt {
            self.stall_timer
                .arm(request.id, self.config.tick_period, self.commands.clone());
        }
        self.state.stall_remaining = self.config.wait_budget;
        self.state.generation += 1;

        let attempt = TransferAttempt {
            payload,
            attempt: self.state.retry_count + 1,
            generation: self.state.generation,
        };
        let image = ImageInfo::of(&attempt.payload);
        info!(
            upload = %request.id,
            node = %request.target,
            attempt = attempt.attempt,
            max_attempts = self.config.max_attempts,
            generation = attempt.generation,
            bytes = image.size,
            sha256 = %image.short_digest(),
            "starting transfer"
        );
        self.emit(UploadEvent::AttemptStarted {
            upload_id: request.id,
            attempt: attempt.attempt,
            generation: attempt.generation,
            bytes: image.size,
        });

        let handle = transport.start_transfer(request.target, attempt.payload);
        tokio::spawn(forward_completion(
            handle,
            attempt.generation,
            self.commands.clone(),
        ));
    }

    async fn on_tick(&mut self, upload_id: UploadId) {
        let current = self.state.request.as_ref().map(|r| r.id);
        if !self.state.busy || current != Some(upload_id) {
            trace!(upload = %upload_id, "ignoring tick for finished upload");
            return;
        }

        self.state.stall_remaining = self.state.stall_remaining.saturating_sub(1);
        trace!(upload = %upload_id, remaining = self.state.stall_remaining, "stall check");
        if self.state.stall_remaining > 0 {
            return;
        }

        let attempt = self.state.retry_count + 1;
        warn!(upload = %upload_id, attempt, "transfer stalled");
        self.emit(UploadEvent::Stalled { upload_id, attempt });
        self.retry_or_give_up(RetryReason::Stall).await;
    }

    async fn on_completed(&mut self, generation: u64, result: TransferResult) {
        if !self.state.busy || generation != self.state.generation {
            debug!(
                generation,
                current = self.state.generation,
                result = ?result,
                "ignoring completion from abandoned attempt"
            );
            self.emit(UploadEvent::StaleCompletion { generation, result });
            return;
        }

        match result {
            TransferResult::Success => {
                info!(generation, "script uploaded successfully");
                self.finalize(Outcome::Success);
            }
            TransferResult::Timeout if self.config.retry_transport_timeouts => {
                warn!(generation, "transport reported a timeout");
                self.retry_or_give_up(RetryReason::TransportTimeout).await;
            }
            TransferResult::Timeout => {
                warn!(generation, "transport reported a timeout");
                self.finalize(Outcome::TransportReportedTimeout);
            }
            TransferResult::Failed(code) => {
                warn!(generation, code, "transport reported a failure");
                self.finalize(Outcome::TransportReportedOtherFailure);
            }
        }
    }

    /// Consumes one retry: re-attempts while budget remains, else gives up.
    async fn retry_or_give_up(&mut self, reason: RetryReason) {
        self.state.retry_count += 1;
        let upload_id = self.state.request.as_ref().map(|r| r.id);

        if self.state.retry_count < self.config.max_attempts {
            self.state.stall_remaining = self.config.wait_budget;
            if let Some(upload_id) = upload_id {
                info!(upload = %upload_id, retry = self.state.retry_count, ?reason, "retrying upload");
                self.emit(UploadEvent::Retrying {
                    upload_id,
                    retry: self.state.retry_count,
                    reason,
                });
            }
            self.attempt_upload(false).await;
        } else {
            if let Some(request) = &self.state.request {
                warn!(
                    upload = %request.id,
                    node = %request.target,
                    attempts = self.state.retry_count,
                    "upload halted due to excessive retries"
                );
            }
            self.finalize(Outcome::RetriesExhausted);
        }
    }

    /// The one exit path for an accepted upload.
    fn finalize(&mut self, outcome: Outcome) {
        self.stall_timer.disarm();
        let request = self.state.request.take();
        let retries = self.state.retry_count;
        self.state.reset();

        let Some(request) = request else {
            error!(outcome = ?outcome, "finalize without an active upload");
            return;
        };
        info!(
            upload = %request.id,
            node = %request.target,
            code = outcome.code(),
            retries,
            "upload finished: {outcome}"
        );
        self.dispatch(request.id, outcome, retries);
    }

    fn dispatch(&self, upload_id: UploadId, outcome: Outcome, retries: u32) {
        self.emit(UploadEvent::Finished {
            upload_id,
            outcome,
            retries,
        });
        match &self.observer {
            Some(observer) => observer.notify(outcome),
            None => warn!(upload = %upload_id, outcome = ?outcome, "no completion observer registered, outcome dropped"),
        }
    }

    fn emit(&self, event: UploadEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            trace!("upload event not delivered: {e}");
        }
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            busy: self.state.busy,
            request: self.state.request.clone(),
            stall_remaining: self.state.stall_remaining,
            retry_count: self.state.retry_count,
            timer_armed: self.stall_timer.is_armed(),
            generation: self.state.generation,
        }
    }
}

/// Relays a transfer's completion back into the actor, tagged with the
/// attempt's generation.
async fn forward_completion(
    handle: TransferHandle,
    generation: u64,
    commands: mpsc::WeakSender<Command>,
) {
    let Some(result) = handle.wait().await else {
        trace!(generation, "transfer dropped without completing");
        return;
    };
    if let Some(tx) = commands.upgrade() {
        let _ = tx.send(Command::Completed { generation, result }).await;
    }
}
