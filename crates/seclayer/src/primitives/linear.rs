//! Multiplication of values held by different parties.
//!
//! Both cross term primitives use a Beaver style triple `Z = U * V` in which the holder of the
//! left operand `L` knows `U` and the holder of the right operand `R` knows `V`. The parties
//! open `E = L - U` and `F = R - V` in a single round. The left holder outputs `L * F + Z_0`,
//! the right holder `E * V + Z_1`, which sum to `L * R`.
use super::ProtocolInstance;
use crate::errors::ProtocolError;
use crate::party::Party;
use crate::plaintext;
use tracing::debug;

/// Shares of `L * R` where `L` is an `s1 x s2` matrix held by `left_holder` and `R` an
/// `s2 x s3` matrix held by the other party. `operand` is `L` or `R` depending on the role.
pub async fn matmul_cross_term(
    inst: &mut ProtocolInstance,
    (s1, s2, s3): (usize, usize, usize),
    operand: &[u64],
    left_holder: Party,
) -> Result<Vec<u64>, ProtocolError> {
    let domain = *inst.domain();
    let is_left = inst.role() == left_holder;
    let (own_len, remote_len) = if is_left {
        (s1 * s2, s2 * s3)
    } else {
        (s2 * s3, s1 * s2)
    };
    assert_eq!(operand.len(), own_len, "cross term operand length");
    debug!(s1, s2, s3, is_left, "Matmul cross term");

    let triple = inst
        .correlations
        .matrix_triple(&domain, (s1, s2, s3), left_holder);
    let masked = operand
        .iter()
        .zip(&triple.mask)
        .map(|(&x, &m)| domain.sub(x, m))
        .collect();
    let remote = inst.io.exchange_elements(masked).await?;
    debug_assert_eq!(remote.len(), remote_len);

    let product = if is_left {
        // L * F
        plaintext::matmul(&domain, s1, s2, s3, operand, &remote)
    } else {
        // E * V
        plaintext::matmul(&domain, s1, s2, s3, &remote, &triple.mask)
    };
    Ok(product
        .into_iter()
        .zip(triple.product)
        .map(|(p, z)| domain.add(p, z))
        .collect())
}

/// Shares of the elementwise product `L * R` where `L` is held by `left_holder` and `R` by the
/// other party.
pub async fn hadamard_cross_term(
    inst: &mut ProtocolInstance,
    operand: &[u64],
    left_holder: Party,
) -> Result<Vec<u64>, ProtocolError> {
    let domain = *inst.domain();
    let is_left = inst.role() == left_holder;
    let triple = inst
        .correlations
        .hadamard_triple(&domain, operand.len(), left_holder);
    let masked = operand
        .iter()
        .zip(&triple.mask)
        .map(|(&x, &m)| domain.sub(x, m))
        .collect();
    let remote = inst.io.exchange_elements(masked).await?;

    let factors: (&[u64], &[u64]) = if is_left {
        (operand, remote.as_slice())
    } else {
        (remote.as_slice(), triple.mask.as_slice())
    };
    Ok(factors
        .0
        .iter()
        .zip(factors.1)
        .zip(triple.product)
        .map(|((&x, &y), z)| domain.add(domain.mul(x, y), z))
        .collect())
}

/// Shares of `L * R` where one of the operands is a model known in full to the session party
/// [`Party::SERVER`]. The other party's share of the model must be zero.
///
/// The model holder adds its local term. The remaining cross term pairs the model with the
/// other party's share of the second operand.
pub async fn model_matmul(
    inst: &mut ProtocolInstance,
    dims: (usize, usize, usize),
    left: &[u64],
    right: &[u64],
    model_is_left: bool,
) -> Result<Vec<u64>, ProtocolError> {
    let (s1, s2, s3) = dims;
    let domain = *inst.domain();
    let holds_model = inst.party() == Party::SERVER;
    // physical party providing the left operand of the cross term
    let left_physical = if model_is_left {
        Party::SERVER
    } else {
        Party::CLIENT
    };
    let left_holder = inst.role_of(left_physical);
    let operand = if inst.party() == left_physical {
        left
    } else {
        right
    };
    let mut out = matmul_cross_term(inst, dims, operand, left_holder).await?;
    if holds_model {
        let local = plaintext::matmul(&domain, s1, s2, s3, left, right);
        out.iter_mut()
            .zip(local)
            .for_each(|(o, l)| *o = domain.add(*o, l));
    }
    Ok(out)
}

/// Elementwise product with a model vector held by [`Party::SERVER`].
pub async fn model_hadamard(
    inst: &mut ProtocolInstance,
    input: &[u64],
    model: &[u64],
) -> Result<Vec<u64>, ProtocolError> {
    assert_eq!(input.len(), model.len(), "operand lengths");
    let domain = *inst.domain();
    let holds_model = inst.party() == Party::SERVER;
    let left_holder = inst.role_of(Party::SERVER);
    let operand = if holds_model { model } else { input };
    let mut out = hadamard_cross_term(inst, operand, left_holder).await?;
    if holds_model {
        out.iter_mut()
            .zip(input.iter().zip(model))
            .for_each(|(o, (&x, &m))| *o = domain.add(*o, domain.mul(x, m)));
    }
    Ok(out)
}

/// Elementwise product of two secret shared vectors. Both parties add their local term, the
/// mixed terms `x_0 * y_1` and `x_1 * y_0` are computed by two cross terms with opposite
/// holders.
pub async fn mul_shared(
    inst: &mut ProtocolInstance,
    x: &[u64],
    y: &[u64],
) -> Result<Vec<u64>, ProtocolError> {
    assert_eq!(x.len(), y.len(), "operand lengths");
    let domain = *inst.domain();
    let first = inst.role().is_first();
    let (own_first, own_second) = if first { (x, y) } else { (y, x) };
    let mixed_1 = hadamard_cross_term(inst, own_first, Party::First).await?;
    let mixed_2 = hadamard_cross_term(inst, own_second, Party::Second).await?;
    Ok(x.iter()
        .zip(y)
        .zip(mixed_1.into_iter().zip(mixed_2))
        .map(|((&x, &y), (m1, m2))| domain.add(domain.mul(x, y), domain.add(m1, m2)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::private_test_utils::{instance_pair, reconstruct, share};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha12Rng;

    #[tokio::test]
    async fn cross_term_matmul() {
        let domain = Domain::ring(32);
        let (mut i0, mut i1) = instance_pair(domain);
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let l: Vec<u64> = (0..6).map(|_| rng.gen_range(0..domain.modulus())).collect();
        let r: Vec<u64> = (0..12).map(|_| rng.gen_range(0..domain.modulus())).collect();
        let (c0, c1) = tokio::try_join!(
            matmul_cross_term(&mut i0, (2, 3, 4), &l, Party::First),
            matmul_cross_term(&mut i1, (2, 3, 4), &r, Party::First),
        )
        .unwrap();
        assert_eq!(
            reconstruct(&domain, &c0, &c1),
            plaintext::matmul(&domain, 2, 3, 4, &l, &r)
        );
    }

    #[tokio::test]
    async fn mul_shared_in_field() {
        let domain = Domain::field(32);
        let (mut i0, mut i1) = instance_pair(domain);
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let x: Vec<u64> = [-5_i64, 7, 0, 1000].iter().map(|&v| domain.from_signed(v)).collect();
        let y: Vec<u64> = [3_i64, -2, 9, -1000].iter().map(|&v| domain.from_signed(v)).collect();
        let (x0, x1) = share(&domain, &x, &mut rng);
        let (y0, y1) = share(&domain, &y, &mut rng);
        let (z0, z1) = tokio::try_join!(
            mul_shared(&mut i0, &x0, &y0),
            mul_shared(&mut i1, &x1, &y1)
        )
        .unwrap();
        let z: Vec<i64> = reconstruct(&domain, &z0, &z1)
            .into_iter()
            .map(|v| domain.to_signed(v))
            .collect();
        assert_eq!(z, [-15, -14, 0, -1_000_000]);
    }
}
