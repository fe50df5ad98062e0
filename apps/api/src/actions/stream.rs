//! Streaming delivery for bulk job actions.
//!
//! Emits `started`, one `progress` per settled job, then `completed` (or a
//! terminal `error`). A heartbeat frame goes out on its own timer. Liveness is
//! checked before every write; once the client is gone nothing more is written,
//! no new jobs are claimed, and jobs already running still finish and are
//! tallied in the returned [`StreamSummary`].

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::response::sse::Event;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use super::{ActionContext, ActionResult, JobAction, JobActionRequest, JOB_ACTION_CONCURRENCY};
use crate::errors::AppError;
use crate::pool::BoundedPool;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionStreamEvent {
    Started {
        action: JobAction,
        requested: usize,
        completed: usize,
        succeeded: usize,
        failed: usize,
    },
    Progress {
        action: JobAction,
        requested: usize,
        completed: usize,
        succeeded: usize,
        failed: usize,
        result: ActionResult,
    },
    Completed {
        action: JobAction,
        requested: usize,
        completed: usize,
        succeeded: usize,
        failed: usize,
        results: Vec<ActionResult>,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(ActionStreamEvent),
    Heartbeat,
}

impl StreamFrame {
    pub fn into_sse(self) -> Option<Event> {
        match self {
            StreamFrame::Event(event) => Event::default().json_data(&event).ok(),
            StreamFrame::Heartbeat => Some(Event::default().comment("heartbeat")),
        }
    }
}

/// Where stream frames go. `send` returns `false` when the frame was not
/// delivered.
pub trait EventSink: Send + Sync {
    fn is_open(&self) -> bool;
    fn send(&self, frame: StreamFrame) -> bool;
}

/// Feeds an SSE response body. Closed once the response is dropped.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamFrame>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send(&self, frame: StreamFrame) -> bool {
        self.tx.send(frame).is_ok()
    }
}

/// Periodic keep-alive writer. Stops itself once the sink closes.
pub struct Heartbeat {
    stopped: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub fn start(sink: Arc<dyn EventSink>, every: Duration) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if flag.load(Ordering::SeqCst) || !sink.is_open() || !sink.send(StreamFrame::Heartbeat) {
                    flag.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });
        Self { stopped, handle }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.handle.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// In-process tally of a streamed batch, kept even when the client left.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub action: Option<JobAction>,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// In requested order. Filled once every claimed job has settled.
    pub results: Vec<ActionResult>,
    /// `true` when the terminal frame reached the sink.
    pub delivered: bool,
}

impl StreamSummary {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

struct StreamWriter<'a> {
    sink: &'a dyn EventSink,
    heartbeat: &'a Heartbeat,
}

impl StreamWriter<'_> {
    fn is_open(&self) -> bool {
        self.sink.is_open()
    }

    fn send(&self, event: ActionStreamEvent) -> bool {
        if !self.sink.is_open() || !self.sink.send(StreamFrame::Event(event)) {
            self.heartbeat.stop();
            return false;
        }
        true
    }
}

/// Parses `body`, runs the action and streams its progress into `sink`.
pub async fn stream_job_action(
    ctx: &ActionContext,
    body: Value,
    sink: Arc<dyn EventSink>,
    heartbeat_every: Duration,
) -> StreamSummary {
    let heartbeat = Heartbeat::start(sink.clone(), heartbeat_every);
    let writer = StreamWriter {
        sink: sink.as_ref(),
        heartbeat: &heartbeat,
    };
    let tally = Mutex::new(StreamSummary::default());

    let run = AssertUnwindSafe(run_stream(ctx, body, &writer, &tally)).catch_unwind().await;
    let failure = match run {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(_) => Some(AppError::Internal(anyhow::anyhow!("Unknown error"))),
    };

    let mut summary = tally.into_inner().unwrap_or_else(PoisonError::into_inner);
    if let Some(err) = failure {
        error!(
            code = err.code(),
            error = %err,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Job action stream failed"
        );
        let delivered = writer.send(ActionStreamEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        });
        if !delivered {
            info!("Skipping stream error event because client disconnected");
        }
        summary.delivered = delivered;
    }

    heartbeat.stop();
    summary
}

async fn run_stream(
    ctx: &ActionContext,
    body: Value,
    writer: &StreamWriter<'_>,
    tally: &Mutex<StreamSummary>,
) -> Result<(), AppError> {
    let request = JobActionRequest::parse(body)?;
    let action = request.action;
    let job_ids = request.unique_job_ids();
    let requested = job_ids.len();
    {
        let mut summary = tally.lock().unwrap_or_else(PoisonError::into_inner);
        summary.action = Some(action);
        summary.requested = requested;
    }

    let started = writer.send(ActionStreamEvent::Started {
        action,
        requested,
        completed: 0,
        succeeded: 0,
        failed: 0,
    });
    if !started {
        info!(action = action.as_str(), requested, "Client disconnected before action stream started");
        return Ok(());
    }

    let batch = ctx.batch(action, request.options);
    let pool = BoundedPool::<Uuid, Option<ActionResult>, Infallible>::new(JOB_ACTION_CONCURRENCY)
        .should_stop(|| !writer.is_open());

    let settled = pool
        .run(&job_ids, |job_id, _| {
            let batch = &batch;
            async move {
                if !writer.is_open() {
                    return Ok(None);
                }
                let result = ctx.run_one(batch, job_id).await;

                let event = {
                    let mut summary = tally.lock().unwrap_or_else(PoisonError::into_inner);
                    if result.is_ok() {
                        summary.succeeded += 1;
                    } else {
                        summary.failed += 1;
                    }
                    ActionStreamEvent::Progress {
                        action,
                        requested,
                        completed: summary.completed(),
                        succeeded: summary.succeeded,
                        failed: summary.failed,
                        result: result.clone(),
                    }
                };
                if !writer.send(event) {
                    info!(action = action.as_str(), %job_id, "Client disconnected while writing action stream progress");
                }
                Ok(Some(result))
            }
        })
        .await
        .unwrap_or_else(|never| match never {});

    // requested order, not settle order
    let results: Vec<ActionResult> = settled.into_iter().flatten().collect();
    let summary = {
        let mut summary = tally.lock().unwrap_or_else(PoisonError::into_inner);
        summary.results = results.clone();
        summary.clone()
    };
    let delivered = writer.send(ActionStreamEvent::Completed {
        action,
        requested,
        completed: summary.completed(),
        succeeded: summary.succeeded,
        failed: summary.failed,
        results,
    });
    tally.lock().unwrap_or_else(PoisonError::into_inner).delivered = delivered;

    info!(
        action = action.as_str(),
        requested,
        completed = summary.completed(),
        succeeded = summary.succeeded,
        failed = summary.failed,
        delivered,
        "Job action stream completed"
    );
    Ok(())
}
