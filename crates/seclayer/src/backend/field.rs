use super::LayerBackend;
use crate::config::BackendKind;
use crate::domain::Domain;
use crate::errors::ProtocolError;
use crate::plaintext;
use crate::primitives::linear::{model_hadamard, model_matmul};
use crate::primitives::ProtocolInstance;
use crate::reshape::{self, ConvParams};
use async_trait::async_trait;
use tracing::debug;

/// HE based linear layers over a prime field. The linear layers run as a single batched
/// product on the first instance, the nonlinear layers use the generic protocol steps.
#[derive(Debug, Clone)]
pub struct FieldBackend {
    domain: Domain,
}

impl FieldBackend {
    pub fn new(bitlength: u32) -> Self {
        Self {
            domain: Domain::field(bitlength),
        }
    }
}

#[async_trait]
impl LayerBackend for FieldBackend {
    fn name(&self) -> &'static str {
        "PrimeField-OT-SCI_HE"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Field
    }

    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn supports_grouped_conv(&self) -> bool {
        false
    }

    /// Fully connected layer on transposed operands, `C^T = B^T * A^T`.
    async fn matmul(
        &self,
        instances: &mut [ProtocolInstance],
        (s1, s2, s3): (usize, usize, usize),
        a: &[u64],
        b: &[u64],
        model_is_a: bool,
    ) -> Result<Vec<u64>, ProtocolError> {
        let a_t = plaintext::transpose(s1, s2, a);
        let b_t = plaintext::transpose(s2, s3, b);
        let c_t = model_matmul(&mut instances[0], (s3, s2, s1), &b_t, &a_t, !model_is_a).await?;
        Ok(plaintext::transpose(s3, s1, &c_t))
    }

    async fn conv2d(
        &self,
        instances: &mut [ProtocolInstance],
        params: &ConvParams,
        input: &[u64],
        filter: &[u64],
    ) -> Result<Vec<u64>, ProtocolError> {
        debug!(?params, "HE convolution");
        let filter_mat = reshape::reshape_filter_for_matmul(params, filter);
        let input_mat = reshape::reshape_input_for_matmul(params, input);
        let product = model_matmul(
            &mut instances[0],
            params.matmul_dims(),
            &filter_mat,
            &input_mat,
            true,
        )
        .await?;
        let mut out = vec![0; params.output_len()];
        reshape::scatter_matmul_output_to_conv(params, &product, &mut out);
        Ok(out)
    }

    async fn elemwise_model_mult(
        &self,
        instances: &mut [ProtocolInstance],
        input: &[u64],
        model: &[u64],
    ) -> Result<Vec<u64>, ProtocolError> {
        model_hadamard(&mut instances[0], input, model).await
    }
}
