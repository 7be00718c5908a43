//! Per operator accounting of time, communication and power.
use crate::party::Party;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;
use std::time::Instant;
use tracing::error;

const MIB: f64 = (1024 * 1024) as f64;

/// Categories under which the operators record their cost.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Conv,
    MatMul,
    BatchNorm,
    Truncation,
    Relu,
    MaxPool,
    AvgPool,
    ArgMax,
}

impl OpKind {
    pub const ALL: [OpKind; 8] = [
        OpKind::Conv,
        OpKind::MatMul,
        OpKind::BatchNorm,
        OpKind::Truncation,
        OpKind::Relu,
        OpKind::MaxPool,
        OpKind::AvgPool,
        OpKind::ArgMax,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Whether calls of this kind count as a network layer. Truncation is accounted separately
    /// but is never a layer of its own.
    pub fn is_layer(self) -> bool {
        self != OpKind::Truncation
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Conv => "Conv",
            OpKind::MatMul => "MatMul",
            OpKind::BatchNorm => "BatchNorm",
            OpKind::Truncation => "Truncation",
            OpKind::Relu => "Relu",
            OpKind::MaxPool => "MaxPool",
            OpKind::AvgPool => "AvgPool",
            OpKind::ArgMax => "ArgMax",
        };
        f.write_str(name)
    }
}

/// Accumulated cost of all calls of one [`OpKind`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OpStats {
    pub time_ms: u64,
    pub bytes_sent: u64,
    pub rounds: u64,
    pub calls: u64,
    /// Sum of all power readings taken during the calls.
    pub power_microwatts: u64,
}

impl OpStats {
    pub fn mib_sent(&self) -> f64 {
        self.bytes_sent as f64 / MIB
    }
}

impl AddAssign<&OpStats> for OpStats {
    fn add_assign(&mut self, rhs: &OpStats) {
        self.time_ms += rhs.time_ms;
        self.bytes_sent += rhs.bytes_sent;
        self.rounds += rhs.rounds;
        self.calls += rhs.calls;
        self.power_microwatts += rhs.power_microwatts;
    }
}

/// Number of invocations per layer kind. The value after incrementing is the layer number used
/// in telemetry labels.
#[derive(Clone, Debug, Default)]
pub struct LayerCounters {
    counts: [u64; OpKind::ALL.len()],
}

impl LayerCounters {
    pub fn increment(&mut self, kind: OpKind) -> u64 {
        let count = &mut self.counts[kind.index()];
        *count += 1;
        *count
    }

    pub fn get(&self, kind: OpKind) -> u64 {
        self.counts[kind.index()]
    }

    /// Counts of all layer kinds, see [`OpKind::is_layer`].
    pub fn layers(&self) -> BTreeMap<OpKind, u64> {
        OpKind::ALL
            .into_iter()
            .filter(|kind| kind.is_layer())
            .map(|kind| (kind, self.get(kind)))
            .collect()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Communication counters one party sends to the other at teardown.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommReport {
    pub total_bytes_sent: u64,
    pub rounds: u64,
    pub per_op: BTreeMap<OpKind, OpStats>,
}

impl CommReport {
    pub fn total_mib_sent(&self) -> f64 {
        self.total_bytes_sent as f64 / MIB
    }
}

/// Summary of a finished session as returned by
/// [`SessionContext::end`](crate::session::SessionContext::end).
#[derive(Clone, Debug, Serialize)]
pub struct SessionReport {
    pub party: Party,
    pub backend: String,
    pub total_time_ms: u64,
    pub comm: CommReport,
    pub layer_counts: BTreeMap<OpKind, u64>,
    /// Average power in watts per layer kind.
    pub avg_power: BTreeMap<OpKind, f64>,
    /// Counters of the client. Only present on the server.
    pub peer: Option<CommReport>,
}

impl SessionReport {
    /// Bytes sent by both parties. Only the server knows the counters of the other side, the
    /// client reports its own.
    pub fn combined_bytes_sent(&self) -> u64 {
        self.comm.total_bytes_sent + self.peer.as_ref().map_or(0, |p| p.total_bytes_sent)
    }
}

/// Average power in watts of `count` layers which together accumulated `total_microwatts`.
pub fn average_power(kind: OpKind, total_microwatts: u64, count: u64) -> f64 {
    if count == 0 {
        error!(%kind, total_microwatts, "No layers to average power over");
        return 0.0;
    }
    total_microwatts as f64 / 1e6 / count as f64
}
