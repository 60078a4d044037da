//! Request multiplexer for a transaction's duplex stream.
//!
//! One physical stream carries arbitrarily many in-flight logical requests.
//! Outgoing envelopes are funnelled through a single writer task so frames
//! are never interleaved; the dispatch loop routes incoming envelopes back
//! to the waiter registered under their correlation id. When the stream
//! dies, every still-pending request is resolved with a closed error exactly
//! once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{DriverError, DriverResult};
use crate::protocol::{
    FrameReader, FrameWriter, RequestBody, RequestEnvelope, ResponseBody, ResponseEnvelope,
    StreamSignal,
};

pub(crate) type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

type CloseCallback = Box<dyn FnOnce(Option<DriverError>) + Send>;

enum Waiter {
    Single(oneshot::Sender<DriverResult<Value>>),
    Stream(mpsc::UnboundedSender<StreamItem>),
}

enum StreamItem {
    Part(Value),
    Signal(StreamSignal),
    Failed(DriverError),
}

struct MuxState {
    pending: HashMap<Uuid, Waiter>,
    closed: bool,
    close_cause: Option<DriverError>,
    callbacks: Vec<CloseCallback>,
    writer_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub(crate) struct Multiplexer {
    outgoing: mpsc::UnboundedSender<RequestEnvelope>,
    state: Arc<Mutex<MuxState>>,
}

impl Multiplexer {
    /// Takes ownership of the duplex stream halves and starts the writer
    /// task and the dispatch loop.
    pub(crate) fn spawn(read: BoxedRead, write: BoxedWrite) -> Multiplexer {
        let (outgoing, mut queue) = mpsc::unbounded_channel::<RequestEnvelope>();
        let state = Arc::new(Mutex::new(MuxState {
            pending: HashMap::new(),
            closed: false,
            close_cause: None,
            callbacks: Vec::new(),
            writer_task: None,
            reader_task: None,
        }));

        let writer_task = tokio::spawn(async move {
            let mut writer = FrameWriter::new(write);
            while let Some(envelope) = queue.recv().await {
                if let Err(e) = writer.write_frame(&envelope).await {
                    tracing::debug!("transaction stream write failed: {}", e);
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });
        state.lock().unwrap().writer_task = Some(writer_task);

        let mux = Multiplexer { outgoing, state };

        let dispatch_mux = mux.clone();
        let reader_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(read);
            let cause = loop {
                match reader.read_frame::<ResponseEnvelope>().await {
                    Ok(Some(envelope)) => dispatch_mux.dispatch(envelope),
                    Ok(None) => break None,
                    Err(e) => break Some(e),
                }
            };
            if let Some(ref e) = cause {
                tracing::debug!("transaction stream terminated: {}", e);
            }
            dispatch_mux.close_internal(cause, false);
        });
        mux.state.lock().unwrap().reader_task = Some(reader_task);

        mux
    }

    /// Sends a single-answer request and suspends until its terminal
    /// response arrives.
    pub(crate) async fn single(&self, body: RequestBody) -> DriverResult<Value> {
        let receiver = {
            let (sender, receiver) = oneshot::channel();
            self.register_and_send(body, Waiter::Single(sender))?;
            receiver
        };
        match receiver.await {
            Ok(result) => result,
            // The sender is only ever dropped after delivering a terminal
            // result, so this is unreachable in practice.
            Err(_) => Err(self.closed_error()),
        }
    }

    /// Sends a streaming request and returns the lazy fragment sequence.
    pub(crate) fn stream(&self, body: RequestBody) -> DriverResult<RowStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let req_id = self.register_and_send(body, Waiter::Stream(sender))?;
        Ok(RowStream {
            req_id,
            incoming: receiver,
            outgoing: self.outgoing.clone(),
            finished: false,
        })
    }

    /// Registers the pending request before enqueueing the envelope, so the
    /// dispatch loop can never observe a response for a half-registered id.
    fn register_and_send(&self, body: RequestBody, waiter: Waiter) -> DriverResult<Uuid> {
        let req_id = Uuid::new_v4();
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(closed_error_for(&state.close_cause));
            }
            state.pending.insert(req_id, waiter);
        }
        if self.outgoing.send(RequestEnvelope { req_id, body }).is_err() {
            self.state.lock().unwrap().pending.remove(&req_id);
            return Err(self.closed_error());
        }
        Ok(req_id)
    }

    fn dispatch(&self, envelope: ResponseEnvelope) {
        let ResponseEnvelope { req_id, body } = envelope;
        let mut state = self.state.lock().unwrap();
        match body {
            ResponseBody::Done { payload } => match state.pending.remove(&req_id) {
                Some(Waiter::Single(sender)) => {
                    let _ = sender.send(Ok(payload));
                }
                Some(Waiter::Stream(sender)) => {
                    let _ = sender.send(StreamItem::Failed(DriverError::IllegalState(
                        "single-answer result for a streamed request".to_string(),
                    )));
                }
                None => tracing::debug!(%req_id, "dropping response for unknown request"),
            },
            ResponseBody::Part { payload } => match state.pending.get(&req_id) {
                Some(Waiter::Stream(sender)) => {
                    let _ = sender.send(StreamItem::Part(payload));
                }
                Some(Waiter::Single(_)) => {
                    if let Some(Waiter::Single(sender)) = state.pending.remove(&req_id) {
                        let _ = sender.send(Err(DriverError::IllegalState(
                            "stream fragment for a single-answer request".to_string(),
                        )));
                    }
                }
                None => tracing::debug!(%req_id, "dropping fragment for unknown request"),
            },
            ResponseBody::StreamSignal { signal } => match signal {
                StreamSignal::Continue => {
                    if let Some(Waiter::Stream(sender)) = state.pending.get(&req_id) {
                        let _ = sender.send(StreamItem::Signal(StreamSignal::Continue));
                    } else {
                        tracing::debug!(%req_id, "dropping continue signal for unknown request");
                    }
                }
                StreamSignal::Done => match state.pending.remove(&req_id) {
                    Some(Waiter::Stream(sender)) => {
                        let _ = sender.send(StreamItem::Signal(StreamSignal::Done));
                    }
                    Some(Waiter::Single(sender)) => {
                        let _ = sender.send(Err(DriverError::IllegalState(
                            "stream signal for a single-answer request".to_string(),
                        )));
                    }
                    None => tracing::debug!(%req_id, "dropping done signal for unknown request"),
                },
            },
            ResponseBody::Error { error } => {
                if let Some(waiter) = state.pending.remove(&req_id) {
                    let err = DriverError::from_server(error);
                    match waiter {
                        Waiter::Single(sender) => {
                            let _ = sender.send(Err(err));
                        }
                        Waiter::Stream(sender) => {
                            let _ = sender.send(StreamItem::Failed(err));
                        }
                    }
                } else {
                    tracing::debug!(%req_id, "dropping error for unknown request");
                }
            }
        }
    }

    /// Tears the stream down. Idempotent; the first caller resolves every
    /// pending request and fires the close callbacks, later calls no-op.
    pub(crate) fn close(&self, cause: Option<DriverError>) {
        self.close_internal(cause, true);
    }

    fn close_internal(&self, cause: Option<DriverError>, abort_reader: bool) {
        let (drained, callbacks, writer, reader) = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            state.close_cause = cause.clone();
            (
                state.pending.drain().collect::<Vec<_>>(),
                std::mem::take(&mut state.callbacks),
                state.writer_task.take(),
                state.reader_task.take(),
            )
        };

        let error = closed_error_for(&cause);
        for (_, waiter) in drained {
            match waiter {
                Waiter::Single(sender) => {
                    let _ = sender.send(Err(error.clone()));
                }
                Waiter::Stream(sender) => {
                    let _ = sender.send(StreamItem::Failed(error.clone()));
                }
            }
        }

        if let Some(task) = writer {
            task.abort();
        }
        if abort_reader {
            if let Some(task) = reader {
                task.abort();
            }
        }

        for callback in callbacks {
            callback(cause.clone());
        }
    }

    /// Registers a callback fired exactly once when the stream closes. If
    /// the stream is already closed the callback runs immediately.
    pub(crate) fn on_close(&self, callback: impl FnOnce(Option<DriverError>) + Send + 'static) {
        let run_now = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                Some(state.close_cause.clone())
            } else {
                state.callbacks.push(Box::new(callback));
                return;
            }
        };
        if let Some(cause) = run_now {
            callback(cause);
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.state.lock().unwrap().closed
    }

    pub(crate) fn closed_error(&self) -> DriverError {
        closed_error_for(&self.state.lock().unwrap().close_cause)
    }
}

fn closed_error_for(cause: &Option<DriverError>) -> DriverError {
    match cause {
        Some(cause) => DriverError::TransactionClosedWithCause(cause.to_string()),
        None => DriverError::TransactionClosed,
    }
}

/// A lazy, finite sequence of response fragments for one streamed request.
///
/// Fragments arrive in server order. After the terminal marker (or a
/// terminal error) the stream yields nothing; it is not restartable.
pub struct RowStream {
    req_id: Uuid,
    incoming: mpsc::UnboundedReceiver<StreamItem>,
    outgoing: mpsc::UnboundedSender<RequestEnvelope>,
    finished: bool,
}

impl RowStream {
    /// The next fragment, `None` once the stream has terminated.
    pub async fn next(&mut self) -> Option<DriverResult<Value>> {
        if self.finished {
            return None;
        }
        loop {
            match self.incoming.recv().await {
                Some(StreamItem::Part(payload)) => return Some(Ok(payload)),
                Some(StreamItem::Signal(StreamSignal::Continue)) => {
                    // The server paused; re-arm it. A failed send means the
                    // stream is closing and a terminal item is on its way.
                    let _ = self.outgoing.send(RequestEnvelope {
                        req_id: self.req_id,
                        body: RequestBody::StreamContinue,
                    });
                }
                Some(StreamItem::Signal(StreamSignal::Done)) => {
                    self.finished = true;
                    return None;
                }
                Some(StreamItem::Failed(error)) => {
                    self.finished = true;
                    return Some(Err(error));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Drains the stream, failing on the first terminal error.
    pub async fn try_collect(mut self) -> DriverResult<Vec<Value>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }
}
