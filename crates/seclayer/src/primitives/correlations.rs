//! Correlated randomness consumed by the multiplication and AND primitives.
//!
//! [`SeededCorrelations`] derives all correlations from a seed both parties know. This requires
//! no interaction but is **insecure**: each party could recompute the other party's
//! correlations. It is intended for testing and benchmarking, with a real OT or HE based
//! generator being a drop-in replacement behind [`CorrelationProvider`].
use crate::domain::Domain;
use crate::party::Party;
use crate::plaintext;
use bitvec::vec::BitVec;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::fmt::Debug;

/// One party's half of a matrix (or elementwise) multiplication triple `Z = U * V`.
///
/// The holder of `U` receives `mask = U`, the other party `mask = V`. `product` is an additive
/// share of `Z`.
#[derive(Debug, Clone)]
pub struct MulTriple {
    pub mask: Vec<u64>,
    pub product: Vec<u64>,
}

/// XOR shares of boolean triples `c = a & b`.
#[derive(Debug, Clone, Default)]
pub struct AndTriples {
    pub a: BitVec,
    pub b: BitVec,
    pub c: BitVec,
}

pub trait CorrelationProvider: Send + Debug {
    /// Triple for the product of an `s1 x s2` matrix held by `u_holder` with an `s2 x s3` matrix
    /// held by the other party.
    fn matrix_triple(
        &mut self,
        domain: &Domain,
        dims: (usize, usize, usize),
        u_holder: Party,
    ) -> MulTriple;

    /// Triple for the elementwise product of two vectors of length `len`.
    fn hadamard_triple(&mut self, domain: &Domain, len: usize, u_holder: Party) -> MulTriple;

    fn and_triples(&mut self, amount: usize) -> AndTriples;
}

/// Deterministic correlations expanded from a shared seed.
#[derive(Debug)]
pub struct SeededCorrelations {
    role: Party,
    rng: ChaCha12Rng,
}

impl SeededCorrelations {
    /// Instances with different `stream`s produce independent correlations from the same seed.
    pub fn new(role: Party, seed: [u8; 32], stream: u64) -> Self {
        let mut rng = ChaCha12Rng::from_seed(seed);
        rng.set_stream(stream);
        Self { role, rng }
    }

    fn sample_elements(&mut self, domain: &Domain, len: usize) -> Vec<u64> {
        let modulus = domain.modulus();
        (0..len).map(|_| self.rng.gen_range(0..modulus)).collect()
    }

    fn sample_bits(&mut self, len: usize) -> BitVec {
        let words: Vec<usize> = (0..len.div_ceil(usize::BITS as usize))
            .map(|_| self.rng.gen())
            .collect();
        let mut bits = BitVec::from_vec(words);
        bits.truncate(len);
        bits
    }

    /// Sample the share of `Z` and hand out `U` or `V` depending on the role.
    fn split_triple(
        &mut self,
        domain: &Domain,
        (u, v): (Vec<u64>, Vec<u64>),
        z_len: usize,
        u_holder: Party,
        product: impl FnOnce(&[u64], &[u64]) -> Vec<u64>,
    ) -> MulTriple {
        let z0 = self.sample_elements(domain, z_len);
        if self.role == u_holder {
            return MulTriple {
                mask: u,
                product: z0,
            };
        }
        let z1 = product(&u, &v)
            .into_iter()
            .zip(z0)
            .map(|(z, z0)| domain.sub(z, z0))
            .collect();
        MulTriple {
            mask: v,
            product: z1,
        }
    }
}

impl CorrelationProvider for SeededCorrelations {
    fn matrix_triple(
        &mut self,
        domain: &Domain,
        (s1, s2, s3): (usize, usize, usize),
        u_holder: Party,
    ) -> MulTriple {
        let u = self.sample_elements(domain, s1 * s2);
        let v = self.sample_elements(domain, s2 * s3);
        self.split_triple(domain, (u, v), s1 * s3, u_holder, |u, v| {
            plaintext::matmul(domain, s1, s2, s3, u, v)
        })
    }

    fn hadamard_triple(&mut self, domain: &Domain, len: usize, u_holder: Party) -> MulTriple {
        let u = self.sample_elements(domain, len);
        let v = self.sample_elements(domain, len);
        self.split_triple(domain, (u, v), len, u_holder, |u, v| {
            plaintext::hadamard(domain, u, v)
        })
    }

    fn and_triples(&mut self, amount: usize) -> AndTriples {
        let a0 = self.sample_bits(amount);
        let b0 = self.sample_bits(amount);
        let c0 = self.sample_bits(amount);
        let a1 = self.sample_bits(amount);
        let b1 = self.sample_bits(amount);
        match self.role {
            Party::First => AndTriples {
                a: a0,
                b: b0,
                c: c0,
            },
            Party::Second => {
                let c1 = (0..amount)
                    .map(|i| ((a0[i] ^ a1[i]) & (b0[i] ^ b1[i])) ^ c0[i])
                    .collect();
                AndTriples {
                    a: a1,
                    b: b1,
                    c: c1,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: [u8; 32] = [3; 32];

    #[test]
    fn matrix_triples_reconstruct() {
        let domain = Domain::ring(16);
        let mut p0 = SeededCorrelations::new(Party::First, SEED, 0);
        let mut p1 = SeededCorrelations::new(Party::Second, SEED, 0);
        let dims = (2, 3, 4);
        let t0 = p0.matrix_triple(&domain, dims, Party::First);
        let t1 = p1.matrix_triple(&domain, dims, Party::First);
        let z = plaintext::matmul(&domain, 2, 3, 4, &t0.mask, &t1.mask);
        let reconstructed: Vec<_> = t0
            .product
            .iter()
            .zip(&t1.product)
            .map(|(&a, &b)| domain.add(a, b))
            .collect();
        assert_eq!(z, reconstructed);
    }

    #[test]
    fn hadamard_triples_reconstruct_in_field() {
        let domain = Domain::field(31);
        let mut p0 = SeededCorrelations::new(Party::First, SEED, 5);
        let mut p1 = SeededCorrelations::new(Party::Second, SEED, 5);
        let t0 = p0.hadamard_triple(&domain, 10, Party::Second);
        let t1 = p1.hadamard_triple(&domain, 10, Party::Second);
        for i in 0..10 {
            // the second party holds U here
            let z = domain.mul(t1.mask[i], t0.mask[i]);
            assert_eq!(z, domain.add(t0.product[i], t1.product[i]));
        }
    }

    #[test]
    fn and_triples_reconstruct() {
        let mut p0 = SeededCorrelations::new(Party::First, SEED, 1);
        let mut p1 = SeededCorrelations::new(Party::Second, SEED, 1);
        let t0 = p0.and_triples(100);
        let t1 = p1.and_triples(100);
        assert_eq!(t0.a.len(), 100);
        for i in 0..100 {
            let a = t0.a[i] ^ t1.a[i];
            let b = t0.b[i] ^ t1.b[i];
            assert_eq!(a & b, t0.c[i] ^ t1.c[i]);
        }
    }
}
