//! Operation executor
//!
//! Dispatches a selected [`OperationKind`] to the transport, applies the
//! per-call checks and normalizes the response into an [`Outcome`].
//! Nothing here returns an error: unexpected statuses, slow calls and
//! transport failures are all data.

use crate::data::DataFactory;
use crate::metrics::{CHECKS_TOTAL, OPERATIONS_TOTAL, OPERATION_DURATION};
use crate::mix::OperationKind;
use crate::transport::{Transport, TransportResponse, STATUS_TRANSPORT_FAILURE};
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Default latency ceiling for the per-call latency check.
pub const DEFAULT_LATENCY_CEILING_MS: f64 = 500.0;

/// Normalized result of one operation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Outcome {
    pub kind: OperationKind,
    pub status_code: u16,
    pub duration_millis: f64,
    pub body_present: bool,
}

impl Outcome {
    pub fn new(kind: OperationKind, status_code: u16, duration_millis: f64, body_present: bool) -> Self {
        Self {
            kind,
            status_code,
            duration_millis,
            body_present,
        }
    }

    fn from_response(kind: OperationKind, response: &TransportResponse) -> Self {
        Self::new(
            kind,
            response.status,
            response.duration_ms,
            response.body_present(),
        )
    }

    /// Whether the status is one the operation anticipates.
    ///
    /// Read accepts 200 and 404 (the id may not exist), Search accepts 200,
    /// Write accepts 200 and 201.
    pub fn status_accepted(&self) -> bool {
        match self.kind {
            OperationKind::Read => matches!(self.status_code, 200 | 404),
            OperationKind::Search => self.status_code == 200,
            OperationKind::Write => matches!(self.status_code, 200 | 201),
        }
    }

    /// Whether aggregation counts this outcome as an error.
    ///
    /// Transport failures (status 0) and 4xx/5xx statuses are errors, except
    /// for statuses the operation anticipates (a 404 on Read).
    pub fn is_error(&self) -> bool {
        if self.status_code == STATUS_TRANSPORT_FAILURE {
            return true;
        }
        self.status_code >= 400 && !self.status_accepted()
    }
}

#[derive(Debug, Default)]
struct CheckCounter {
    passes: AtomicU64,
    fails: AtomicU64,
}

impl CheckCounter {
    fn record(&self, passed: bool) {
        if passed {
            self.passes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fails.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self, name: String) -> CheckResult {
        CheckResult {
            name,
            passes: self.passes.load(Ordering::Relaxed),
            fails: self.fails.load(Ordering::Relaxed),
        }
    }
}

/// Pass/fail tally of one named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckResult {
    /// Pass ratio (1.0 when the check never ran)
    pub fn pass_rate(&self) -> f64 {
        let total = self.passes + self.fails;
        if total == 0 {
            return 1.0;
        }
        self.passes as f64 / total as f64
    }
}

/// Concurrent tally of per-call checks: status acceptance and latency
/// ceiling for each operation kind.
#[derive(Debug)]
pub struct CheckCounters {
    latency_ceiling_ms: f64,
    status: [CheckCounter; 3],
    latency: [CheckCounter; 3],
}

impl CheckCounters {
    pub fn new(latency_ceiling_ms: f64) -> Self {
        Self {
            latency_ceiling_ms,
            status: Default::default(),
            latency: Default::default(),
        }
    }

    /// Record both checks for one outcome. Returns true when both passed.
    pub fn record(&self, outcome: &Outcome) -> bool {
        let idx = outcome.kind.index();
        let status_ok = outcome.status_accepted();
        let latency_ok = outcome.duration_millis < self.latency_ceiling_ms;

        self.status[idx].record(status_ok);
        self.latency[idx].record(latency_ok);

        CHECKS_TOTAL
            .with_label_values(&[&self.status_check_name(outcome.kind), pass_label(status_ok)])
            .inc();
        CHECKS_TOTAL
            .with_label_values(&[&self.latency_check_name(outcome.kind), pass_label(latency_ok)])
            .inc();

        status_ok && latency_ok
    }

    fn status_check_name(&self, kind: OperationKind) -> String {
        let accepted = match kind {
            OperationKind::Read => "200 or 404",
            OperationKind::Search => "200",
            OperationKind::Write => "200 or 201",
        };
        format!("{} status is {}", kind, accepted)
    }

    fn latency_check_name(&self, kind: OperationKind) -> String {
        format!("{} response time < {}ms", kind, self.latency_ceiling_ms)
    }

    /// Current tallies, status checks first.
    pub fn snapshot(&self) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(6);
        for kind in OperationKind::ALL {
            results.push(self.status[kind.index()].snapshot(self.status_check_name(kind)));
            results.push(self.latency[kind.index()].snapshot(self.latency_check_name(kind)));
        }
        results
    }
}

impl Default for CheckCounters {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_CEILING_MS)
    }
}

fn pass_label(passed: bool) -> &'static str {
    if passed {
        "pass"
    } else {
        "fail"
    }
}

/// Inputs drawn for one call before it is dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedCall {
    Read { id: u64 },
    Search { term: String },
    Write { payload: Value },
}

impl PreparedCall {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Read { .. } => OperationKind::Read,
            Self::Search { .. } => OperationKind::Search,
            Self::Write { .. } => OperationKind::Write,
        }
    }
}

/// Issues one transport call per invocation. No retries.
pub struct OperationExecutor {
    transport: Arc<dyn Transport>,
    factory: Arc<dyn DataFactory>,
    checks: Arc<CheckCounters>,
}

impl OperationExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        factory: Arc<dyn DataFactory>,
        checks: Arc<CheckCounters>,
    ) -> Self {
        Self {
            transport,
            factory,
            checks,
        }
    }

    pub fn checks(&self) -> &Arc<CheckCounters> {
        &self.checks
    }

    /// Draw the inputs `kind` needs from the data factory.
    pub fn prepare<R: RngCore>(&self, kind: OperationKind, rng: &mut R) -> PreparedCall {
        match kind {
            OperationKind::Read => PreparedCall::Read {
                id: self.factory.random_entity_id(rng),
            },
            OperationKind::Search => PreparedCall::Search {
                term: self.factory.random_search_term(rng),
            },
            OperationKind::Write => PreparedCall::Write {
                payload: self.factory.random_record(rng),
            },
        }
    }

    /// Dispatch a prepared call and record its checks.
    pub async fn dispatch(&self, call: PreparedCall) -> Outcome {
        let kind = call.kind();
        let response = match &call {
            PreparedCall::Read { id } => self.transport.get_entity(*id).await,
            PreparedCall::Search { term } => self.transport.search(term).await,
            PreparedCall::Write { payload } => self.transport.create(payload).await,
        };

        let outcome = Outcome::from_response(kind, &response);
        if outcome.status_code == STATUS_TRANSPORT_FAILURE {
            debug!(operation = %kind, "transport failure after {:.1}ms", outcome.duration_millis);
        }

        self.checks.record(&outcome);
        OPERATIONS_TOTAL
            .with_label_values(&[kind.as_str(), if outcome.is_error() { "error" } else { "ok" }])
            .inc();
        OPERATION_DURATION
            .with_label_values(&[kind.as_str()])
            .observe(outcome.duration_millis / 1000.0);

        outcome
    }

    /// Prepare and dispatch in one step.
    pub async fn execute<R: RngCore>(&self, kind: OperationKind, rng: &mut R) -> Outcome {
        let call = self.prepare(kind, rng);
        self.dispatch(call).await
    }
}
