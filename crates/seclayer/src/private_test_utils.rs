//! Private test utilities - Do Not Use!
//!
//! This module is activated by the "_integration_tests" feature and should not be used by
//! downstream code. It can change in any version.
use crate::config::{BackendKind, SessionConfig};
use crate::domain::Domain;
use crate::party::Party;
use crate::primitives::correlations::SeededCorrelations;
use crate::primitives::net::{Msg, NetIo};
use crate::primitives::ProtocolInstance;
use crate::session::SessionContext;
use anyhow::Result;
use rand::Rng;
use seclayer_channel::{InMemory, Tcp};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const TEST_SEED: [u8; 32] = [42; 32];

pub fn init_tracing() -> tracing::dispatcher::DefaultGuard {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .set_default()
}

#[derive(Debug, Copy, Clone)]
pub enum TestChannel {
    InMemory,
    Tcp,
}

/// Two connected instances, the first playing [`Party::First`] in both roles.
pub fn instance_pair(domain: Domain) -> (ProtocolInstance, ProtocolInstance) {
    let (io0, io1) = NetIo::new_in_memory_pair();
    let inst = |party: Party, io| {
        let correlations = SeededCorrelations::new(party, TEST_SEED, 0);
        ProtocolInstance::new(party, party, domain, io, Box::new(correlations))
    };
    (inst(Party::First, io0), inst(Party::Second, io1))
}

/// Random additive shares of `values`.
pub fn share(domain: &Domain, values: &[u64], rng: &mut impl Rng) -> (Vec<u64>, Vec<u64>) {
    values
        .iter()
        .map(|&v| {
            let r = rng.gen_range(0..domain.modulus());
            (r, domain.sub(v, r))
        })
        .unzip()
}

/// Shares of a model known to the server. The client's share is zero.
pub fn share_model(values: &[u64]) -> (Vec<u64>, Vec<u64>) {
    (values.to_vec(), vec![0; values.len()])
}

pub fn reconstruct(domain: &Domain, a: &[u64], b: &[u64]) -> Vec<u64> {
    assert_eq!(a.len(), b.len(), "share lengths");
    a.iter().zip(b).map(|(&x, &y)| domain.add(x, y)).collect()
}

pub fn from_signed(domain: &Domain, values: &[i64]) -> Vec<u64> {
    values.iter().map(|&v| domain.from_signed(v)).collect()
}

pub fn to_signed(domain: &Domain, values: &[u64]) -> Vec<i64> {
    values.iter().map(|&v| domain.to_signed(v)).collect()
}

pub fn test_config(backend: BackendKind, bitlength: u32, num_threads: usize) -> SessionConfig {
    SessionConfig {
        backend,
        bitlength,
        num_threads,
        ..Default::default()
    }
}

/// Start a server and a client session with the given configuration. The `party` of `config`
/// is ignored.
pub async fn session_pair(
    config: SessionConfig,
    channel: TestChannel,
) -> Result<(SessionContext, SessionContext)> {
    let threads = config.num_threads;
    let (server_channels, client_channels): (Vec<NetIo>, Vec<NetIo>) = match channel {
        TestChannel::InMemory => {
            let (a, b) = InMemory::<Msg>::new_pairs(threads);
            (
                a.into_iter().map(NetIo::new).collect(),
                b.into_iter().map(NetIo::new).collect(),
            )
        }
        TestChannel::Tcp => {
            let mut server = vec![];
            let mut client = vec![];
            for _ in 0..threads {
                let (a, b) = Tcp::<Msg>::new_local_pair(None).await?;
                server.push(NetIo::new(a));
                client.push(NetIo::new(b));
            }
            (server, client)
        }
    };
    let server_config = SessionConfig {
        party: Party::SERVER,
        ..config.clone()
    };
    let client_config = SessionConfig {
        party: Party::CLIENT,
        ..config
    };
    let sessions = tokio::try_join!(
        SessionContext::start(server_config, server_channels),
        SessionContext::start(client_config, client_channels)
    )?;
    Ok(sessions)
}

pub async fn in_memory_sessions(
    backend: BackendKind,
    bitlength: u32,
    num_threads: usize,
    verify: bool,
) -> Result<(SessionContext, SessionContext)> {
    let config = SessionConfig {
        verify,
        ..test_config(backend, bitlength, num_threads)
    };
    session_pair(config, TestChannel::InMemory).await
}
