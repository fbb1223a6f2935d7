//! Streaming response framer.
//!
//! A [`Framer`] belongs to exactly one invocation. It is a two-state machine
//! (`Open → Closed`) that stamps envelopes with the invocation's correlation
//! id and enqueues them on the output sink in call order. Exactly one
//! terminal envelope ever leaves a framer; later termination attempts are
//! logged and ignored.

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::envelope::ResponseEnvelope;
use crate::error::{HandlerError, ProtocolError, SinkClosed};
use crate::types::CorrelationId;

enum SinkTarget {
    /// Transport-provided bounded channel.
    Channel(mpsc::Sender<ResponseEnvelope>),
    /// Degrade-to-unary mode: partials are counted and dropped, the
    /// terminal envelope is kept for the dispatcher.
    Discard,
}

/// Per-invocation envelope sequencer handed to streaming handlers.
pub struct Framer {
    correlation_id: CorrelationId,
    /// `None` once the framer is closed; dropping it releases the sink.
    sink: Option<SinkTarget>,
    cancellation: CancellationToken,
    terminal: Option<ResponseEnvelope>,
    emitted: usize,
    discarded: usize,
}

impl Framer {
    /// Framer writing into a transport channel.
    pub fn channel(
        correlation_id: CorrelationId,
        sink: mpsc::Sender<ResponseEnvelope>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            correlation_id,
            sink: Some(SinkTarget::Channel(sink)),
            cancellation,
            terminal: None,
            emitted: 0,
            discarded: 0,
        }
    }

    /// Framer that keeps only the terminal envelope.
    pub(crate) fn buffered(correlation_id: CorrelationId, cancellation: CancellationToken) -> Self {
        Self {
            correlation_id,
            sink: Some(SinkTarget::Discard),
            cancellation,
            terminal: None,
            emitted: 0,
            discarded: 0,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Cancelled once the caller stops reading.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Number of envelopes delivered to the sink, or kept as the terminal
    /// result by a buffered framer. Discarded partials are not counted.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Emit an intermediate chunk (`partial: true, final: false`).
    ///
    /// Awaits the sink's capacity. Returns `Err(SinkClosed)` if the caller is
    /// gone, after which the framer is closed and further output is pointless.
    pub async fn send(
        &mut self,
        content: Value,
        metadata: Option<Map<String, Value>>,
    ) -> Result<(), SinkClosed> {
        let envelope = ResponseEnvelope::partial(self.correlation_id.clone(), content, metadata);
        self.emit(envelope, false).await
    }

    /// Emit the terminal success envelope and close.
    pub async fn complete(
        &mut self,
        content: Value,
        metadata: Option<Map<String, Value>>,
    ) -> Result<(), SinkClosed> {
        let envelope = ResponseEnvelope::complete(self.correlation_id.clone(), content, metadata);
        self.emit(envelope, true).await
    }

    /// Terminate with a handler failure and close.
    ///
    /// Execution errors become an `isError` success envelope; faults become
    /// an `InternalFault` protocol failure.
    pub async fn error(&mut self, err: HandlerError) -> Result<(), SinkClosed> {
        let envelope = match err {
            HandlerError::Execution(tool_err) => {
                ResponseEnvelope::tool_error(self.correlation_id.clone(), &tool_err)
            }
            HandlerError::Fault(msg) => ResponseEnvelope::failure(
                self.correlation_id.clone(),
                &ProtocolError::InternalFault(msg),
            ),
        };
        self.emit(envelope, true).await
    }

    /// Terminate with a protocol failure and close.
    pub async fn fail(&mut self, err: &ProtocolError) -> Result<(), SinkClosed> {
        let envelope = ResponseEnvelope::failure(self.correlation_id.clone(), err);
        self.emit(envelope, true).await
    }

    /// Take the captured terminal envelope of a buffered framer.
    pub(crate) fn take_terminal(&mut self) -> Option<ResponseEnvelope> {
        self.terminal.take()
    }

    /// Partials dropped by a buffered framer.
    pub(crate) fn discarded_partials(&self) -> usize {
        self.discarded
    }

    async fn emit(&mut self, envelope: ResponseEnvelope, terminal: bool) -> Result<(), SinkClosed> {
        let Some(sink) = self.sink.as_mut() else {
            warn!(
                correlation_id = %self.correlation_id,
                terminal,
                "Ignoring envelope emitted after the stream was closed"
            );
            return Ok(());
        };

        let delivered = match sink {
            SinkTarget::Channel(tx) => tx.send(envelope).await.map_err(|_| SinkClosed),
            SinkTarget::Discard if terminal => {
                self.terminal = Some(envelope);
                Ok(())
            }
            SinkTarget::Discard => {
                self.discarded += 1;
                return Ok(());
            }
        };

        match delivered {
            Ok(()) => {
                self.emitted += 1;
                if terminal {
                    self.sink = None;
                }
                Ok(())
            }
            Err(SinkClosed) => {
                debug!(correlation_id = %self.correlation_id, "Output sink closed by caller");
                self.sink = None;
                self.cancellation.cancel();
                Err(SinkClosed)
            }
        }
    }
}

impl Drop for Framer {
    fn drop(&mut self) {
        let Some(SinkTarget::Channel(tx)) = self.sink.take() else {
            return;
        };
        warn!(
            correlation_id = %self.correlation_id,
            "Stream dropped while open; delivering internal fault"
        );
        let envelope = ResponseEnvelope::failure(
            self.correlation_id.clone(),
            &ProtocolError::InternalFault("stream terminated without completion".to_string()),
        );
        let Err(TrySendError::Full(envelope)) = tx.try_send(envelope) else {
            return;
        };
        // Sink is full: wait for capacity off the dropping thread.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = tx.send(envelope).await;
                });
            }
            Err(_) => warn!(
                correlation_id = %self.correlation_id,
                "Sink full and no runtime available; internal fault not delivered"
            ),
        }
    }
}
