//! Backends implementing the protocol steps of the layer operators.
//!
//! The default methods of [`LayerBackend`] are generic over the modulus and split their work
//! into contiguous chunks which run concurrently on the worker instances. Backends override
//! the steps they realize differently.
use crate::config::BackendKind;
use crate::domain::Domain;
use crate::errors::ProtocolError;
use crate::primitives::linear::{model_hadamard, model_matmul, mul_shared};
use crate::primitives::{chunk_ranges, nonlinear, ProtocolInstance};
use crate::reshape::{self, ConvParams, PoolWindows};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::ops::Range;

mod cheetah;
mod field;
mod ring;

pub use cheetah::CheetahBackend;
pub use field::FieldBackend;
pub use ring::RingBackend;

pub fn new_backend(kind: BackendKind, bitlength: u32) -> Box<dyn LayerBackend> {
    match kind {
        BackendKind::Ring => Box::new(RingBackend::new(bitlength)),
        BackendKind::Field => Box::new(FieldBackend::new(bitlength)),
        BackendKind::Cheetah => Box::new(CheetahBackend::new(bitlength)),
    }
}

/// Columns `cols` of a row-major matrix with `width` columns.
fn column_slice(rows: usize, width: usize, m: &[u64], cols: Range<usize>) -> Vec<u64> {
    (0..rows)
        .flat_map(|r| m[r * width + cols.start..r * width + cols.end].iter().copied())
        .collect()
}

#[async_trait]
pub trait LayerBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> BackendKind;

    fn domain(&self) -> &Domain;

    /// Maximum absolute difference of a truncated result to the exact one.
    fn truncation_tolerance(&self) -> u64 {
        0
    }

    fn supports_grouped_conv(&self) -> bool {
        true
    }

    /// Shares of `A * B` for `A: s1 x s2` and `B: s2 x s3`, one of which is the model held by
    /// the server. The inner dimension is split across the instances and the partial products
    /// are summed.
    async fn matmul(
        &self,
        instances: &mut [ProtocolInstance],
        (s1, s2, s3): (usize, usize, usize),
        a: &[u64],
        b: &[u64],
        model_is_a: bool,
    ) -> Result<Vec<u64>, ProtocolError> {
        let domain = *self.domain();
        let ranges = chunk_ranges(s2, instances.len());
        let partial = try_join_all(instances.iter_mut().zip(ranges).map(|(inst, range)| {
            let a_part = column_slice(s1, s2, a, range.clone());
            let b_part = b[range.start * s3..range.end * s3].to_vec();
            async move {
                model_matmul(inst, (s1, range.len(), s3), &a_part, &b_part, model_is_a).await
            }
        }))
        .await?;
        let mut out = vec![0; s1 * s3];
        for part in partial {
            out.iter_mut()
                .zip(part)
                .for_each(|(o, p)| *o = domain.add(*o, p));
        }
        Ok(out)
    }

    /// Convolution as the product of the reshaped filter with the im2col input.
    async fn conv2d(
        &self,
        instances: &mut [ProtocolInstance],
        params: &ConvParams,
        input: &[u64],
        filter: &[u64],
    ) -> Result<Vec<u64>, ProtocolError> {
        let filter_mat = reshape::reshape_filter_for_matmul(params, filter);
        let input_mat = reshape::reshape_input_for_matmul(params, input);
        let product = self
            .matmul(instances, params.matmul_dims(), &filter_mat, &input_mat, true)
            .await?;
        let mut out = vec![0; params.output_len()];
        reshape::scatter_matmul_output_to_conv(params, &product, &mut out);
        Ok(out)
    }

    /// Elementwise product of a shared vector with a model vector held by the server.
    async fn elemwise_model_mult(
        &self,
        instances: &mut [ProtocolInstance],
        input: &[u64],
        model: &[u64],
    ) -> Result<Vec<u64>, ProtocolError> {
        let ranges = chunk_ranges(input.len(), instances.len());
        let parts = try_join_all(instances.iter_mut().zip(ranges).map(|(inst, range)| {
            model_hadamard(inst, &input[range.clone()], &model[range])
        }))
        .await?;
        Ok(parts.concat())
    }

    async fn elemwise_shared_mult(
        &self,
        instances: &mut [ProtocolInstance],
        a: &[u64],
        b: &[u64],
    ) -> Result<Vec<u64>, ProtocolError> {
        let ranges = chunk_ranges(a.len(), instances.len());
        let parts = try_join_all(
            instances
                .iter_mut()
                .zip(ranges)
                .map(|(inst, range)| mul_shared(inst, &a[range.clone()], &b[range])),
        )
        .await?;
        Ok(parts.concat())
    }

    async fn relu(
        &self,
        instances: &mut [ProtocolInstance],
        x: &[u64],
    ) -> Result<Vec<u64>, ProtocolError> {
        let ranges = chunk_ranges(x.len(), instances.len());
        let parts = try_join_all(
            instances
                .iter_mut()
                .zip(ranges)
                .map(|(inst, range)| nonlinear::relu(inst, &x[range])),
        )
        .await?;
        Ok(parts.concat())
    }

    /// Signed floor division by a public divisor. `nonneg` asserts that every input is
    /// non-negative.
    async fn div_public(
        &self,
        instances: &mut [ProtocolInstance],
        x: &[u64],
        divisor: u64,
        nonneg: bool,
    ) -> Result<Vec<u64>, ProtocolError> {
        let ranges = chunk_ranges(x.len(), instances.len());
        let parts = try_join_all(
            instances
                .iter_mut()
                .zip(ranges)
                .map(|(inst, range)| nonlinear::div_public(inst, &x[range], divisor, nonneg)),
        )
        .await?;
        Ok(parts.concat())
    }

    /// Division by `2^shift`.
    async fn truncate(
        &self,
        instances: &mut [ProtocolInstance],
        x: &[u64],
        shift: u32,
        nonneg: bool,
    ) -> Result<Vec<u64>, ProtocolError> {
        // any divisor beyond the modulus yields the same quotient
        let divisor = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        self.div_public(instances, x, divisor, nonneg).await
    }

    /// Maximum of every window row. Rows are split across the instances.
    async fn max_rows(
        &self,
        instances: &mut [ProtocolInstance],
        windows: &PoolWindows,
    ) -> Result<Vec<u64>, ProtocolError> {
        let cols = windows.window_len;
        let ranges = chunk_ranges(windows.padded_rows, instances.len());
        let parts = try_join_all(instances.iter_mut().zip(ranges).map(|(inst, range)| {
            let data = &windows.data[range.start * cols..range.end * cols];
            async move {
                let (max, _idx) = nonlinear::max_rows(inst, range.len(), cols, data).await?;
                Ok::<_, ProtocolError>(max)
            }
        }))
        .await?;
        Ok(parts.concat())
    }

    /// Index of the first maximal element of `x`. Runs on a single instance.
    async fn argmax(&self, inst: &mut ProtocolInstance, x: &[u64]) -> Result<u64, ProtocolError> {
        let (_max, idx) = nonlinear::max_rows(inst, 1, x.len(), x).await?;
        Ok(idx[0])
    }

    fn window_sums(&self, windows: &PoolWindows) -> Vec<u64> {
        reshape::window_sums(windows, self.domain())
    }

    /// Local multiplication by `2^shift`.
    fn scale_up(&self, x: &mut [u64], shift: u32) {
        let domain = self.domain();
        x.iter_mut().for_each(|v| *v = domain.shl(*v, shift));
    }
}

#[cfg(test)]
mod tests {
    use super::column_slice;

    #[test]
    fn column_slices() {
        let m: Vec<u64> = (0..12).collect();
        assert_eq!(column_slice(3, 4, &m, 1..3), [1, 2, 5, 6, 9, 10]);
        assert_eq!(column_slice(3, 4, &m, 0..0), Vec::<u64>::new());
    }
}
