//! Reveal of operator inputs and outputs to the client and comparison against the cleartext
//! computation.
use crate::errors::ProtocolError;
use crate::party::Party;
use crate::primitives::net::Msg;
use crate::primitives::ProtocolInstance;
use tracing::{info, warn};

/// Number of mismatching indices included in the log.
const LOGGED_MISMATCHES: usize = 16;

/// Outcome of verifying one operator call. Only the client produces records.
#[derive(Clone, Debug)]
pub struct VerificationRecord {
    pub op: &'static str,
    pub reconstructed: Vec<u64>,
    pub expected: Vec<u64>,
    pub mismatches: Vec<usize>,
    pub passed: bool,
}

/// The server sends its shares, the client returns the reconstructed values.
pub async fn reveal(
    inst: &mut ProtocolInstance,
    shares: &[u64],
) -> Result<Option<Vec<u64>>, ProtocolError> {
    match inst.party() {
        Party::SERVER => {
            inst.io.send(Msg::Elements(shares.to_vec())).await?;
            Ok(None)
        }
        Party::CLIENT => {
            let domain = *inst.domain();
            let remote = inst.io.recv_elements(shares.len()).await?;
            Ok(Some(
                shares
                    .iter()
                    .zip(remote)
                    .map(|(&own, r)| domain.add(own, r))
                    .collect(),
            ))
        }
    }
}

/// Reveal `inputs` and `output` and compare the output with `reference` applied to the
/// revealed inputs. Values may differ by `tolerance` in the signed interpretation.
///
/// A mismatch is logged but is not an error.
pub async fn verify<F>(
    inst: &mut ProtocolInstance,
    op: &'static str,
    inputs: &[&[u64]],
    output: &[u64],
    tolerance: u64,
    reference: F,
) -> Result<Option<VerificationRecord>, ProtocolError>
where
    F: FnOnce(&[Vec<u64>]) -> Vec<u64>,
{
    let mut revealed = Vec::with_capacity(inputs.len());
    for input in inputs {
        revealed.push(reveal(inst, input).await?);
    }
    let Some(reconstructed) = reveal(inst, output).await? else {
        return Ok(None);
    };
    let revealed: Vec<Vec<u64>> = revealed.into_iter().flatten().collect();
    let domain = *inst.domain();
    let expected = reference(&revealed);
    assert_eq!(expected.len(), reconstructed.len(), "{op} reference length");

    let mismatches: Vec<usize> = reconstructed
        .iter()
        .zip(&expected)
        .enumerate()
        .filter(|(_, (got, exp))| {
            domain.to_signed(domain.sub(**got, **exp)).unsigned_abs() > tolerance
        })
        .map(|(idx, _)| idx)
        .collect();
    let passed = mismatches.is_empty();
    if passed {
        info!("{op} Output Matches");
    } else {
        let shown = &mismatches[..mismatches.len().min(LOGGED_MISMATCHES)];
        warn!(
            count = mismatches.len(),
            indices = ?shown,
            "{op} Output Mismatch"
        );
    }
    Ok(Some(VerificationRecord {
        op,
        reconstructed,
        expected,
        mismatches,
        passed,
    }))
}
