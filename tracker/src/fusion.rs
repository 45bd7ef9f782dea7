//! The fusion task: single owner of the target map.
//!
//! Ingest tasks post reports; the controller and the display ask questions.
//! Both kinds of traffic arrive on channels, so the map itself needs no
//! lock, and reports are applied in arrival order per source. Pending
//! reports are always drained before a question is answered, so a caller
//! that posts a report and then asks sees its own write.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

use shared::clock;
use shared::target::{Report, TargetId, TargetMap};

/// How often the map is swept for evictions.
const SWEEP_INTERVAL: f64 = 1.0;

/// A point prediction for one target at a query time.
#[derive(Debug, Clone, Copy)]
pub struct Prediction {
    pub az: f64,
    pub el: f64,
    pub range: f64,
    pub in_space: bool,
    pub stale: bool,
}

/// Display-facing summary of one target.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub id: TargetId,
    pub callsign: String,
    pub az: f64,
    pub el: f64,
    pub range: f64,
    pub in_space: bool,
    pub stale: bool,
}

enum FusionRequest {
    Predict {
        id: TargetId,
        t: f64,
        reply: Sender<Option<Prediction>>,
    },
    Snapshot {
        t: f64,
        reply: Sender<Vec<TargetInfo>>,
    },
}

/// Cheap cloneable query interface to the fusion task.
#[derive(Clone)]
pub struct FusionHandle {
    requests: Sender<FusionRequest>,
}

impl FusionHandle {
    /// Extrapolated direction of `id` at time `t`, or `None` if the target
    /// is unknown (or the fusion task is gone).
    pub fn predict(&self, id: &TargetId, t: f64) -> Option<Prediction> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.requests
            .send(FusionRequest::Predict {
                id: id.clone(),
                t,
                reply: reply_tx,
            })
            .ok()?;
        reply_rx.recv().ok()?
    }

    /// Every current target, extrapolated to `t`.
    pub fn snapshot(&self, t: f64) -> Vec<TargetInfo> {
        let (reply_tx, reply_rx) = mpsc::channel();
        if self
            .requests
            .send(FusionRequest::Snapshot { t, reply: reply_tx })
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.recv().unwrap_or_default()
    }
}

/// Start the fusion task. Reports go into the returned sender; queries go
/// through the handle. The task exits when every query handle is dropped.
pub fn spawn(silence_timeout: f64) -> (FusionHandle, Sender<Report>, JoinHandle<()>) {
    let (report_tx, report_rx) = mpsc::channel();
    let (request_tx, request_rx) = mpsc::channel();
    let thread = std::thread::Builder::new()
        .name("fusion".to_string())
        .spawn(move || run(TargetMap::new(silence_timeout), report_rx, request_rx))
        .expect("spawn fusion thread");
    (
        FusionHandle {
            requests: request_tx,
        },
        report_tx,
        thread,
    )
}

fn run(mut map: TargetMap, reports: Receiver<Report>, requests: Receiver<FusionRequest>) {
    let mut next_sweep = clock::monotonic_seconds() + SWEEP_INTERVAL;

    loop {
        let now = clock::monotonic_seconds();
        if now >= next_sweep {
            let evicted = map.sweep(now);
            if evicted > 0 {
                debug!(evicted, remaining = map.len(), "swept silent targets");
            }
            next_sweep = now + SWEEP_INTERVAL;
        }

        drain_reports(&mut map, &reports);

        match requests.recv_timeout(Duration::from_millis(10)) {
            Ok(request) => {
                // See the module doc: writes posted before this question
                // must be visible to it.
                drain_reports(&mut map, &reports);
                answer(&map, request);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn drain_reports(map: &mut TargetMap, reports: &Receiver<Report>) {
    while let Ok(report) = reports.try_recv() {
        map.apply(report);
    }
}

fn answer(map: &TargetMap, request: FusionRequest) {
    match request {
        FusionRequest::Predict { id, t, reply } => {
            let prediction = map.get(&id).map(|target| {
                let (az, el, range) = target.azel_range(t);
                Prediction {
                    az,
                    el,
                    range,
                    in_space: target.in_space,
                    stale: map.is_stale(&id, t),
                }
            });
            let _ = reply.send(prediction);
        }
        FusionRequest::Snapshot { t, reply } => {
            let mut targets: Vec<TargetInfo> = map
                .iter()
                .map(|(id, target)| {
                    let (az, el, range) = target.azel_range(t);
                    TargetInfo {
                        id: id.clone(),
                        callsign: target.callsign.clone(),
                        az,
                        el,
                        range,
                        in_space: target.in_space,
                        stale: map.is_stale(id, t),
                    }
                })
                .collect();
            targets.sort_by(|a, b| a.id.cmp(&b.id));
            let _ = reply.send(targets);
        }
    }
}
