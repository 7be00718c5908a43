//! Boolean sharing: AND gates and the millionaire comparison.
use super::ProtocolInstance;
use crate::errors::ProtocolError;
use crate::party::Party;
use bitvec::slice::BitSlice;
use bitvec::vec::BitVec;
use tracing::debug;

fn xor(a: &BitSlice, b: &BitSlice) -> BitVec {
    debug_assert_eq!(a.len(), b.len());
    a.iter().by_vals().zip(b.iter().by_vals()).map(|(x, y)| x ^ y).collect()
}

/// XOR shares of `x & y` for XOR shared `x` and `y`, using one AND triple per gate and a
/// single round.
pub async fn and(
    inst: &mut ProtocolInstance,
    x: &BitSlice,
    y: &BitSlice,
) -> Result<BitVec, ProtocolError> {
    assert_eq!(x.len(), y.len(), "AND operand lengths");
    let n = x.len();
    let triples = inst.correlations.and_triples(n);
    let mut masked = xor(x, &triples.a);
    masked.extend_from_bitslice(&xor(y, &triples.b));
    let remote = inst.io.exchange_bits(masked.clone()).await?;
    let opened = xor(&masked, &remote);
    let (d, e) = opened.split_at(n);
    let first = inst.role().is_first();
    Ok((0..n)
        .map(|i| {
            let mut z = triples.c[i] ^ (d[i] & triples.b[i]) ^ (e[i] & triples.a[i]);
            if first {
                z ^= d[i] & e[i];
            }
            z
        })
        .collect())
}

/// XOR shares of `[a >= b]` for `a` known to the first role and `b` known to the second. Both
/// inputs must be below `2^bits`.
///
/// Evaluates the carry out of `a + !b + 1` with a ripple carry circuit. The generate bits of
/// all positions are computed in one round, followed by one round per bit position.
pub async fn greater_equal(
    inst: &mut ProtocolInstance,
    values: &[u64],
    bits: u32,
) -> Result<BitVec, ProtocolError> {
    let n = values.len();
    let k = bits as usize;
    let role = inst.role();
    if k == 0 {
        return Ok(BitVec::repeat(role == Party::First, n));
    }
    debug!(n, bits, "Millionaire comparison");
    // position i of element j lives at j * k + i
    let mut x = BitVec::with_capacity(n * k);
    let mut y = BitVec::with_capacity(n * k);
    for &v in values {
        debug_assert!(bits >= 64 || v < 1 << bits, "comparison input out of range");
        for i in 0..k {
            let bit = (v >> i) & 1 == 1;
            match role {
                Party::First => {
                    x.push(bit);
                    y.push(false);
                }
                Party::Second => {
                    x.push(false);
                    y.push(!bit);
                }
            }
        }
    }
    let generate = and(inst, &x, &y).await?;
    let propagate = xor(&x, &y);

    // carry into position 1: g_0 ^ p_0, as the initial carry is 1
    let mut carry: BitVec = (0..n)
        .map(|j| generate[j * k] ^ propagate[j * k])
        .collect();
    for i in 1..k {
        let p_i: BitVec = (0..n).map(|j| propagate[j * k + i]).collect();
        let p_and_c = and(inst, &p_i, &carry).await?;
        carry = (0..n)
            .map(|j| generate[j * k + i] ^ p_and_c[j])
            .collect();
    }
    Ok(carry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use crate::private_test_utils::instance_pair;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha12Rng;

    #[tokio::test]
    async fn and_gates() {
        let (mut i0, mut i1) = instance_pair(Domain::ring(8));
        let x0: BitVec = [true, false, true, false].into_iter().collect();
        let x1: BitVec = [false, false, true, true].into_iter().collect();
        let y0: BitVec = [true, true, false, false].into_iter().collect();
        let y1: BitVec = [false, true, false, true].into_iter().collect();
        let (z0, z1) = tokio::try_join!(and(&mut i0, &x0, &y0), and(&mut i1, &x1, &y1)).unwrap();
        // x = 1010 ^ 0011 = 1001, y = 1100 ^ 0101 = 1001
        let z: Vec<bool> = xor(&z0, &z1).into_iter().collect();
        assert_eq!(z, [true, false, false, true]);
    }

    #[tokio::test]
    async fn millionaire() {
        let (mut i0, mut i1) = instance_pair(Domain::ring(8));
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let bits = 13;
        let mut a: Vec<u64> = (0..64).map(|_| rng.gen_range(0..1 << bits)).collect();
        let mut b: Vec<u64> = (0..64).map(|_| rng.gen_range(0..1 << bits)).collect();
        // edge cases
        a.extend([0, 0, (1 << bits) - 1, 17]);
        b.extend([0, (1 << bits) - 1, 0, 17]);
        let (r0, r1) = tokio::try_join!(
            greater_equal(&mut i0, &a, bits),
            greater_equal(&mut i1, &b, bits)
        )
        .unwrap();
        let result = xor(&r0, &r1);
        for j in 0..a.len() {
            assert_eq!(result[j], a[j] >= b[j], "{} >= {}", a[j], b[j]);
        }
    }
}
