use super::LayerBackend;
use crate::config::BackendKind;
use crate::domain::Domain;
use crate::errors::ProtocolError;
use crate::primitives::{chunk_ranges, nonlinear, ProtocolInstance};
use async_trait::async_trait;
use futures::future::try_join_all;

/// Silent OT ring protocols. Truncation drops the carry of the low bits and may be off by one,
/// division by other public divisors is exact.
#[derive(Debug, Clone)]
pub struct CheetahBackend {
    domain: Domain,
}

impl CheetahBackend {
    pub fn new(bitlength: u32) -> Self {
        Self {
            domain: Domain::ring(bitlength),
        }
    }
}

#[async_trait]
impl LayerBackend for CheetahBackend {
    fn name(&self) -> &'static str {
        "Ring-SilentOT-Cheetah"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Cheetah
    }

    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn truncation_tolerance(&self) -> u64 {
        1
    }

    async fn truncate(
        &self,
        instances: &mut [ProtocolInstance],
        x: &[u64],
        shift: u32,
        nonneg: bool,
    ) -> Result<Vec<u64>, ProtocolError> {
        let ranges = chunk_ranges(x.len(), instances.len());
        let parts = try_join_all(
            instances
                .iter_mut()
                .zip(ranges)
                .map(|(inst, range)| nonlinear::truncate_approx(inst, &x[range], shift, nonneg)),
        )
        .await?;
        Ok(parts.concat())
    }
}
