//! Session lifecycle: setup of the worker instances, per operator accounting and teardown.
use crate::backend::{new_backend, LayerBackend};
use crate::config::SessionConfig;
use crate::domain::Domain;
use crate::errors::{ProtocolError, SessionError};
use crate::metrics::{average_power, CommReport, LayerCounters, OpKind, OpStats, Timer};
use crate::party::Party;
use crate::primitives::correlations::SeededCorrelations;
use crate::primitives::net::{Msg, NetIo};
use crate::primitives::ProtocolInstance;
use crate::telemetry::{
    CsvRowSink, LayerRecord, LayerRowSink, LayerShape, PowerMeasurement, PowerSampler,
};
use crate::verify::VerificationRecord;
use futures::future::try_join_all;
use rand::Rng;
use seclayer_channel::Tcp;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

pub use crate::metrics::SessionReport;

/// Time the client keeps retrying to connect to the server.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// State shared by all operator calls of one party.
///
/// Operators borrow the backend and the instances independently, which is why both are
/// crate visible fields.
pub struct SessionContext {
    config: SessionConfig,
    pub(crate) backend: Box<dyn LayerBackend>,
    pub(crate) instances: Vec<ProtocolInstance>,
    counters: LayerCounters,
    stats: BTreeMap<OpKind, OpStats>,
    verification_log: Vec<VerificationRecord>,
    row_sink: Option<Box<dyn LayerRowSink>>,
    timer: Timer,
}

/// Accounting state of a running operator call, see [`SessionContext::begin_op`].
pub(crate) struct OpGuard {
    kind: OpKind,
    layer_number: u64,
    timer: Timer,
    bytes_before: u64,
    rounds_before: u64,
    power: Option<PowerMeasurement>,
}

/// Open one channel per worker instance. The server listens on `port + i`, the client connects
/// to `address:port + i`.
#[tracing::instrument(skip_all, fields(party = ?config.party), err)]
pub async fn connect_channels(config: &SessionConfig) -> Result<Vec<NetIo>, SessionError> {
    config.validate()?;
    let channels = (0..config.num_threads).map(|i| {
        let port = config.channel_port(i);
        let address = config.address.clone();
        let party = config.party;
        async move {
            let port = port.ok_or_else(|| {
                SessionError::InvalidConfig(format!("no port for channel {i}"))
            })?;
            let channel: Tcp<Msg> = match party {
                Party::SERVER => Tcp::listen(("0.0.0.0", port)).await?,
                Party::CLIENT => {
                    Tcp::connect_with_timeout((address.as_str(), port), CONNECT_TIMEOUT).await?
                }
            };
            Ok::<_, SessionError>(NetIo::new(channel))
        }
    });
    try_join_all(channels).await
}

impl SessionContext {
    /// Agree on a seed for the correlated randomness, set up one instance per channel and
    /// synchronize all channels.
    ///
    /// `channels[i]` must be connected to the remote's `channels[i]`.
    #[tracing::instrument(skip_all, fields(party = ?config.party), err)]
    pub async fn start(
        config: SessionConfig,
        mut channels: Vec<NetIo>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        if channels.len() != config.num_threads {
            return Err(SessionError::InvalidConfig(format!(
                "expected {} channels, got {}",
                config.num_threads,
                channels.len()
            )));
        }
        let party = config.party;
        let backend = new_backend(config.backend, config.bitlength);
        let domain = *backend.domain();

        let seed = match party {
            Party::First => {
                let seed: [u8; 32] = rand::thread_rng().gen();
                channels[0].send(Msg::Seed(seed)).await?;
                seed
            }
            Party::Second => match channels[0].recv().await? {
                Msg::Seed(seed) => seed,
                got => {
                    return Err(ProtocolError::UnexpectedMessage {
                        expected: "Seed",
                        got,
                    }
                    .into())
                }
            },
        };
        debug!("Established session seed");

        let mut instances: Vec<ProtocolInstance> = channels
            .into_iter()
            .enumerate()
            .map(|(i, io)| {
                let role = party.for_thread(i);
                let correlations = SeededCorrelations::new(role, seed, i as u64);
                ProtocolInstance::new(party, role, domain, io, Box::new(correlations))
            })
            .collect();
        try_join_all(instances.iter_mut().map(|inst| inst.io.sync())).await?;

        info!(
            backend = backend.name(),
            %domain,
            threads = instances.len(),
            verify = config.verify,
            "Session started"
        );
        let row_sink = config
            .telemetry_dir
            .as_ref()
            .map(|dir| Box::new(CsvRowSink::new(dir)) as Box<dyn LayerRowSink>);
        Ok(Self {
            config,
            backend,
            instances,
            counters: LayerCounters::default(),
            stats: BTreeMap::new(),
            verification_log: vec![],
            row_sink,
            timer: Timer::start(),
        })
    }

    pub fn party(&self) -> Party {
        self.config.party
    }

    pub fn domain(&self) -> &Domain {
        self.backend.domain()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn num_threads(&self) -> usize {
        self.instances.len()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn verification_enabled(&self) -> bool {
        self.config.verify
    }

    pub fn layer_counters(&self) -> &LayerCounters {
        &self.counters
    }

    pub fn stats(&self, kind: OpKind) -> Option<&OpStats> {
        self.stats.get(&kind)
    }

    /// Verification results of the client. Always empty on the server.
    pub fn verification_log(&self) -> &[VerificationRecord] {
        &self.verification_log
    }

    /// Replace the destination of the per layer telemetry rows.
    pub fn set_row_sink(&mut self, sink: Box<dyn LayerRowSink>) {
        self.row_sink = Some(sink);
    }

    fn bytes_sent(&self) -> u64 {
        self.instances.iter().map(|inst| inst.io.bytes_sent()).sum()
    }

    fn rounds(&self) -> u64 {
        self.instances.iter().map(|inst| inst.io.rounds()).sum()
    }

    /// Panics if the client's share of a model operand is not zero. Only the server knows the
    /// model, so the client must not contribute to it.
    pub(crate) fn assert_model_share_zero(&self, model: &[u64]) {
        if self.party() == Party::CLIENT {
            assert!(
                model.iter().all(|&v| v == 0),
                "non-model party's share of the model operand must be zero"
            );
        }
    }

    /// Start the accounting for an operator call. Layer kinds also increment their counter.
    pub(crate) fn begin_op(&mut self, kind: OpKind) -> OpGuard {
        let layer_number = if kind.is_layer() {
            self.counters.increment(kind)
        } else {
            0
        };
        let power = self
            .config
            .power_sample_path
            .as_ref()
            .map(|path| PowerSampler::start(path, self.config.power_sample_interval()));
        OpGuard {
            kind,
            layer_number,
            timer: Timer::start(),
            bytes_before: self.bytes_sent(),
            rounds_before: self.rounds(),
            power,
        }
    }

    /// Record time, communication and power of a finished call. If `shape` is given, a
    /// telemetry row is written for every power reading.
    pub(crate) fn finish_op(&mut self, guard: OpGuard, shape: Option<LayerShape>) {
        let readings = guard.power.map(PowerMeasurement::stop).unwrap_or_default();
        let elapsed = guard.timer.elapsed_ms();
        let bytes_sent = self.bytes_sent() - guard.bytes_before;
        let rounds = self.rounds() - guard.rounds_before;
        let stats = self.stats.entry(guard.kind).or_default();
        *stats += &OpStats {
            time_ms: elapsed,
            bytes_sent,
            rounds,
            calls: 1,
            power_microwatts: readings.iter().map(|r| r.value).sum(),
        };
        debug!(
            kind = %guard.kind,
            layer = guard.layer_number,
            elapsed_ms = elapsed,
            bytes_sent,
            rounds,
            "Operator finished"
        );
        if let (Some(sink), Some(shape)) = (self.row_sink.as_mut(), shape) {
            sink.write_layer(&LayerRecord {
                shape: &shape,
                layer_number: guard.layer_number,
                execution_ms: elapsed,
                readings: &readings,
            });
        }
    }

    pub(crate) fn log_verification(&mut self, record: Option<VerificationRecord>) {
        if let Some(record) = record {
            self.verification_log.push(record);
        }
    }

    fn comm_report(&self) -> CommReport {
        CommReport {
            total_bytes_sent: self.bytes_sent(),
            rounds: self.rounds(),
            per_op: self.stats.clone(),
        }
    }

    /// Exchange communication counters and summarize the session. The client sends its
    /// counters to the server, so only the server's report contains both sides.
    #[tracing::instrument(skip_all, fields(party = ?self.party()), err)]
    pub async fn end(mut self) -> Result<SessionReport, SessionError> {
        let comm = self.comm_report();
        let total_time_ms = self.timer.elapsed_ms();
        let peer = match self.party() {
            Party::CLIENT => {
                self.instances[0].io.send(Msg::Report(comm.clone())).await?;
                None
            }
            Party::SERVER => match self.instances[0].io.recv().await? {
                Msg::Report(report) => Some(report),
                got => {
                    return Err(ProtocolError::UnexpectedMessage {
                        expected: "Report",
                        got,
                    }
                    .into())
                }
            },
        };

        info!(
            total_time_ms,
            mib_sent = comm.total_mib_sent(),
            rounds = comm.rounds,
            "Session finished"
        );
        for (kind, stats) in &comm.per_op {
            info!(
                %kind,
                time_ms = stats.time_ms,
                mib_sent = stats.mib_sent(),
                calls = stats.calls,
                "Operator communication"
            );
        }
        if let Some(peer) = &peer {
            info!(
                peer_mib_sent = peer.total_mib_sent(),
                combined_mib_sent = comm.total_mib_sent() + peer.total_mib_sent(),
                "Communication of both parties"
            );
        }

        let layer_counts = self.counters.layers();
        let avg_power = layer_counts
            .iter()
            .filter(|_| self.config.power_sample_path.is_some())
            .map(|(&kind, &count)| {
                let total = self.stats.get(&kind).map_or(0, |s| s.power_microwatts);
                (kind, average_power(kind, total, count))
            })
            .collect();
        info!(?layer_counts, "Layer counts");

        Ok(SessionReport {
            party: self.party(),
            backend: self.backend.name().to_string(),
            total_time_ms,
            comm,
            layer_counts,
            avg_power,
            peer,
        })
    }
}
