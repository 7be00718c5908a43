//! Comparison based protocols over arithmetic shares: sign test, ReLU, maximum and division by
//! a public divisor.
//!
//! Everything in here works for any modulus `M`. A share `x_i` is an integer in `[0, M)` and the
//! integer sum `x_0 + x_1` lies in `[0, 2M - 1)`, so comparisons against the sum decide how
//! often it wrapped.
use super::boolean::greater_equal;
use super::linear::{hadamard_cross_term, mul_shared};
use super::ProtocolInstance;
use crate::errors::ProtocolError;
use crate::party::Party;
use bitvec::slice::BitSlice;
use bitvec::vec::BitVec;
use tracing::debug;

/// Arithmetic shares of XOR shared bits, `b = b_0 + b_1 - 2 * b_0 * b_1`.
pub async fn b2a(inst: &mut ProtocolInstance, bits: &BitSlice) -> Result<Vec<u64>, ProtocolError> {
    let domain = *inst.domain();
    let own: Vec<u64> = bits.iter().by_vals().map(u64::from).collect();
    let cross = hadamard_cross_term(inst, &own, Party::First).await?;
    Ok(own
        .into_iter()
        .zip(cross)
        .map(|(b, t)| domain.sub(b, domain.add(t, t)))
        .collect())
}

/// XOR shares of `[x_0 + x_1 >= t_j]` where `x_0 + x_1` is the integer sum of the shares and the
/// thresholds `t_j` are public.
async fn share_sum_at_least(
    inst: &mut ProtocolInstance,
    own: &[u64],
    thresholds: &[u64],
) -> Result<BitVec, ProtocolError> {
    assert_eq!(own.len(), thresholds.len());
    let modulus = inst.domain().modulus();
    let max_value = thresholds.iter().copied().fold(modulus - 1, u64::max);
    let bits = u64::BITS - max_value.leading_zeros();
    // x_0 >= t - x_1
    let values: Vec<u64> = match inst.role() {
        Party::First => own.to_vec(),
        Party::Second => thresholds
            .iter()
            .zip(own)
            .map(|(&t, &x)| t.saturating_sub(x))
            .collect(),
    };
    greater_equal(inst, &values, bits).await
}

/// Arithmetic shares of `[x >= 0]` in the signed interpretation.
///
/// With `B` the domain bias and `x' = x + B`, `x` is non-negative iff `x' >= B`. For the share
/// sum `S = x'_0 + x'_1` this is `[S >= B] - [S >= M] + [S >= M + B]`.
pub async fn drelu(inst: &mut ProtocolInstance, x: &[u64]) -> Result<Vec<u64>, ProtocolError> {
    let domain = *inst.domain();
    let n = x.len();
    let bias = domain.bias();
    let modulus = domain.modulus();
    let shifted: Vec<u64> = x
        .iter()
        .map(|&v| domain.add(v, inst.public(bias)))
        .collect();
    let own = [shifted.as_slice(), shifted.as_slice(), shifted.as_slice()].concat();
    let thresholds: Vec<u64> = [bias, modulus, modulus + bias]
        .into_iter()
        .flat_map(|t| std::iter::repeat(t).take(n))
        .collect();
    let bits = share_sum_at_least(inst, &own, &thresholds).await?;
    let arith = b2a(inst, &bits).await?;
    let (ge_bias, rest) = arith.split_at(n);
    let (ge_mod, ge_mod_bias) = rest.split_at(n);
    Ok((0..n)
        .map(|i| domain.add(domain.sub(ge_bias[i], ge_mod[i]), ge_mod_bias[i]))
        .collect())
}

/// Shares of `max(x, 0)`.
pub async fn relu(inst: &mut ProtocolInstance, x: &[u64]) -> Result<Vec<u64>, ProtocolError> {
    let sign = drelu(inst, x).await?;
    mul_shared(inst, x, &sign).await
}

/// Row wise maximum of a `rows x cols` matrix together with the index of the first maximal
/// element of every row.
pub async fn max_rows(
    inst: &mut ProtocolInstance,
    rows: usize,
    cols: usize,
    data: &[u64],
) -> Result<(Vec<u64>, Vec<u64>), ProtocolError> {
    assert_eq!(data.len(), rows * cols, "max input length");
    assert!(cols > 0, "max over empty rows");
    let domain = *inst.domain();
    let mut max: Vec<u64> = (0..rows).map(|r| data[r * cols]).collect();
    let mut idx = vec![0; rows];
    for col in 1..cols {
        let candidate: Vec<u64> = (0..rows).map(|r| data[r * cols + col]).collect();
        let diff: Vec<u64> = max
            .iter()
            .zip(&candidate)
            .map(|(&m, &c)| domain.sub(m, c))
            .collect();
        // candidate > max  <=>  !(max - candidate >= 0)
        let not_greater = drelu(inst, &diff).await?;
        let greater: Vec<u64> = not_greater
            .iter()
            .map(|&g| domain.sub(inst.public(1), g))
            .collect();
        let mut deltas: Vec<u64> = candidate
            .iter()
            .zip(&max)
            .map(|(&c, &m)| domain.sub(c, m))
            .collect();
        deltas.extend(idx.iter().map(|&i| domain.sub(inst.public(col as u64), i)));
        let selectors = [greater.as_slice(), greater.as_slice()].concat();
        let update = mul_shared(inst, &selectors, &deltas).await?;
        let (update_max, update_idx) = update.split_at(rows);
        for r in 0..rows {
            max[r] = domain.add(max[r], update_max[r]);
            idx[r] = domain.add(idx[r], update_idx[r]);
        }
    }
    Ok((max, idx))
}

/// Quotient of a division by a divisor of at least the bias. Every signed value then lies in
/// `[-divisor, divisor)`, so the quotient is `0` for non-negative and `-1` for negative values.
async fn sign_quotient(
    inst: &mut ProtocolInstance,
    x: &[u64],
    nonneg: bool,
) -> Result<Vec<u64>, ProtocolError> {
    if nonneg {
        return Ok(vec![0; x.len()]);
    }
    let domain = *inst.domain();
    let sign = drelu(inst, x).await?;
    Ok(sign
        .into_iter()
        .map(|s| domain.sub(s, inst.public(1)))
        .collect())
}

/// Shares of `floor(x / divisor)` in the signed interpretation.
///
/// The input is shifted by the bias `B` so that it is non-negative, `x' = x + B`. With
/// `x'_i = q_i * d + r_i` and `M = q_M * d + r_M` the quotient of the shifted value is
/// `q_0 + q_1 - w * q_M + floor((r_0 + r_1 - w * r_M) / d)` where `w` indicates whether the
/// share sum wrapped. The last term is recovered from three comparisons of `r_0 + r_1`.
/// Finally the quotient of the bias is subtracted, correcting by one if the remainder of `x'`
/// is smaller than that of `B`.
///
/// If `nonneg` is set, `x` is known to be non-negative and no shift is needed. Divisors of at
/// least the bias only need the sign of `x`.
pub async fn div_public(
    inst: &mut ProtocolInstance,
    x: &[u64],
    divisor: u64,
    nonneg: bool,
) -> Result<Vec<u64>, ProtocolError> {
    let domain = *inst.domain();
    assert!(divisor > 0, "divisor must be positive");
    if divisor >= domain.bias() {
        debug!(divisor, %domain, "Divisor exceeds the signed range");
        return sign_quotient(inst, x, nonneg).await;
    }
    let n = x.len();
    let modulus = domain.modulus();
    let bias = if nonneg { 0 } else { domain.bias() };
    debug!(n, divisor, nonneg, "Division by public divisor");

    let shifted: Vec<u64> = x
        .iter()
        .map(|&v| domain.add(v, inst.public(bias)))
        .collect();
    let remainders: Vec<u64> = shifted.iter().map(|v| v % divisor).collect();
    let (q_mod, r_mod) = (modulus / divisor, modulus % divisor);

    let own = [
        shifted.as_slice(),
        remainders.as_slice(),
        remainders.as_slice(),
        remainders.as_slice(),
    ]
    .concat();
    let thresholds: Vec<u64> = [modulus, divisor, divisor + r_mod, r_mod]
        .into_iter()
        .flat_map(|t| std::iter::repeat(t).take(n))
        .collect();
    let bits = share_sum_at_least(inst, &own, &thresholds).await?;
    let arith = b2a(inst, &bits).await?;
    let (wrap, rest) = arith.split_at(n);
    let (g_d, rest) = rest.split_at(n);
    let (g_d_rm, g_rm) = rest.split_at(n);

    // floor((r_0 + r_1 - w * r_M) / d) = g_d + w * (g_d_rm + g_rm - 1 - g_d)
    let wrapped_floor: Vec<u64> = (0..n)
        .map(|i| {
            let sum = domain.add(g_d_rm[i], g_rm[i]);
            domain.sub(sum, domain.add(inst.public(1), g_d[i]))
        })
        .collect();
    let correction = mul_shared(inst, wrap, &wrapped_floor).await?;
    let quotient: Vec<u64> = (0..n)
        .map(|i| {
            let q = domain.sub(shifted[i] / divisor, domain.mul(wrap[i], q_mod));
            domain.add(q, domain.add(g_d[i], correction[i]))
        })
        .collect();
    if bias == 0 {
        return Ok(quotient);
    }

    let (q_bias, r_bias) = (bias / divisor, bias % divisor);
    let below_bias_remainder = if r_bias == 0 {
        vec![0; n]
    } else {
        // remainder of x' lies in [0, d), compare it against r_B by a sign test
        let diff: Vec<u64> = (0..n)
            .map(|i| {
                let rem = domain.sub(shifted[i], domain.mul(quotient[i], divisor));
                domain.sub(rem, inst.public(r_bias))
            })
            .collect();
        let at_least = drelu(inst, &diff).await?;
        at_least
            .iter()
            .map(|&g| domain.sub(inst.public(1), g))
            .collect()
    };
    Ok((0..n)
        .map(|i| {
            domain.sub(
                quotient[i],
                domain.add(inst.public(q_bias), below_bias_remainder[i]),
            )
        })
        .collect())
}

/// Truncation by `shift` bits which ignores the carry of the low bits, so the result may be one
/// smaller than the exact one.
///
/// Only valid if `2^shift` divides both the modulus and the bias, i.e. in the ring domain.
/// Shifts of at least the bitlength minus one are exact.
pub async fn truncate_approx(
    inst: &mut ProtocolInstance,
    x: &[u64],
    shift: u32,
    nonneg: bool,
) -> Result<Vec<u64>, ProtocolError> {
    let domain = *inst.domain();
    let Some(divisor) = 1_u64.checked_shl(shift).filter(|&d| d < domain.bias()) else {
        return sign_quotient(inst, x, nonneg).await;
    };
    let modulus = domain.modulus();
    let bias = if nonneg { 0 } else { domain.bias() };
    assert!(
        modulus % divisor == 0 && bias % divisor == 0,
        "approximate truncation needs a power of two modulus"
    );
    let n = x.len();
    let shifted: Vec<u64> = x
        .iter()
        .map(|&v| domain.add(v, inst.public(bias)))
        .collect();
    let bits = share_sum_at_least(inst, &shifted, &vec![modulus; n]).await?;
    let wrap = b2a(inst, &bits).await?;
    let (q_mod, q_bias) = (modulus / divisor, bias / divisor);
    Ok((0..n)
        .map(|i| {
            let q = domain.sub(shifted[i] >> shift, domain.mul(wrap[i], q_mod));
            domain.sub(q, inst.public(q_bias))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::plaintext;
    use crate::private_test_utils::{instance_pair, reconstruct, share};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha12Rng;

    fn signed_inputs(domain: &Domain, rng: &mut ChaCha12Rng, n: usize, bound: i64) -> Vec<u64> {
        let mut values: Vec<u64> = (0..n)
            .map(|_| domain.from_signed(rng.gen_range(-bound..bound)))
            .collect();
        values.extend([0, 1, domain.from_signed(-1)]);
        values
    }

    #[tokio::test]
    async fn drelu_ring_and_field() {
        for domain in [Domain::ring(12), Domain::ring(63), Domain::field(25)] {
            let (mut i0, mut i1) = instance_pair(domain);
            let mut rng = ChaCha12Rng::seed_from_u64(11);
            let x = signed_inputs(&domain, &mut rng, 40, (domain.modulus() / 2) as i64 - 1);
            let (x0, x1) = share(&domain, &x, &mut rng);
            let (d0, d1) = tokio::try_join!(drelu(&mut i0, &x0), drelu(&mut i1, &x1)).unwrap();
            let d = reconstruct(&domain, &d0, &d1);
            for (v, bit) in x.iter().zip(d) {
                assert_eq!(bit, u64::from(domain.to_signed(*v) >= 0), "{domain} {v}");
            }
        }
    }

    #[tokio::test]
    async fn division_matches_floor() {
        for domain in [Domain::ring(20), Domain::field(28)] {
            for divisor in [1, 3, 4, 7, 256] {
                let (mut i0, mut i1) = instance_pair(domain);
                let mut rng = ChaCha12Rng::seed_from_u64(divisor);
                let x = signed_inputs(&domain, &mut rng, 32, 1 << 18);
                let (x0, x1) = share(&domain, &x, &mut rng);
                let (q0, q1) = tokio::try_join!(
                    div_public(&mut i0, &x0, divisor, false),
                    div_public(&mut i1, &x1, divisor, false)
                )
                .unwrap();
                assert_eq!(
                    reconstruct(&domain, &q0, &q1),
                    plaintext::div_public(&domain, &x, divisor),
                    "{domain} / {divisor}"
                );
            }
        }
    }

    #[tokio::test]
    async fn divisors_beyond_the_signed_range() {
        for domain in [Domain::ring(8), Domain::field(25)] {
            let bias = domain.bias();
            for divisor in [bias, bias + 1, domain.modulus(), u64::MAX] {
                let (mut i0, mut i1) = instance_pair(domain);
                let mut rng = ChaCha12Rng::seed_from_u64(divisor);
                let x = signed_inputs(&domain, &mut rng, 16, bias as i64 - 1);
                let (x0, x1) = share(&domain, &x, &mut rng);
                let (q0, q1) = tokio::try_join!(
                    div_public(&mut i0, &x0, divisor, false),
                    div_public(&mut i1, &x1, divisor, false)
                )
                .unwrap();
                assert_eq!(
                    reconstruct(&domain, &q0, &q1),
                    plaintext::div_public(&domain, &x, divisor),
                    "{domain} / {divisor}"
                );
            }
        }
    }

    #[tokio::test]
    async fn truncation_by_whole_bitlength() {
        let domain = Domain::ring(16);
        for shift in [15, 16, 64, 100] {
            let (mut i0, mut i1) = instance_pair(domain);
            let mut rng = ChaCha12Rng::seed_from_u64(shift as u64);
            let x = signed_inputs(&domain, &mut rng, 16, 1 << 15);
            let (x0, x1) = share(&domain, &x, &mut rng);
            let (t0, t1) = tokio::try_join!(
                truncate_approx(&mut i0, &x0, shift, false),
                truncate_approx(&mut i1, &x1, shift, false)
            )
            .unwrap();
            assert_eq!(
                reconstruct(&domain, &t0, &t1),
                plaintext::scale_down(&domain, &x, shift),
                "shift {shift}"
            );
        }
    }

    #[tokio::test]
    async fn approximate_truncation_is_off_by_at_most_one() {
        let domain = Domain::ring(32);
        let (mut i0, mut i1) = instance_pair(domain);
        let mut rng = ChaCha12Rng::seed_from_u64(4);
        let x = signed_inputs(&domain, &mut rng, 64, 1 << 20);
        let (x0, x1) = share(&domain, &x, &mut rng);
        let (t0, t1) = tokio::try_join!(
            truncate_approx(&mut i0, &x0, 5, false),
            truncate_approx(&mut i1, &x1, 5, false)
        )
        .unwrap();
        let expected = plaintext::scale_down(&domain, &x, 5);
        for (got, exp) in reconstruct(&domain, &t0, &t1).into_iter().zip(expected) {
            assert!(domain.to_signed(domain.sub(got, exp)).abs() <= 1);
        }
    }

    #[tokio::test]
    async fn max_with_index() {
        let domain = Domain::ring(16);
        let (mut i0, mut i1) = instance_pair(domain);
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let rows: Vec<Vec<i64>> = vec![vec![-3, 5, 2, 5], vec![-7, -2, -9, -2], vec![0, 0, 0, 1]];
        let data: Vec<u64> = rows.iter().flatten().map(|&v| domain.from_signed(v)).collect();
        let (x0, x1) = share(&domain, &data, &mut rng);
        let ((m0, idx0), (m1, idx1)) = tokio::try_join!(
            max_rows(&mut i0, 3, 4, &x0),
            max_rows(&mut i1, 3, 4, &x1)
        )
        .unwrap();
        let max: Vec<i64> = reconstruct(&domain, &m0, &m1)
            .into_iter()
            .map(|v| domain.to_signed(v))
            .collect();
        assert_eq!(max, [5, -2, 1]);
        assert_eq!(reconstruct(&domain, &idx0, &idx1), [1, 1, 3]);
    }
}
