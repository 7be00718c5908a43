//! Arithmetic over the two share domains, the ring Z_{2^l} and a prime field Z_p.
//!
//! Everything in here is local cleartext arithmetic. It is used to keep shares reduced, for the
//! local terms of the asymmetric protocols and by the verification oracle.
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Bitlength used for the field domain when the requested one has no table entry.
pub const FALLBACK_FIELD_BITLENGTH: u32 = 41;

/// Primes `p` with `p = 1 mod 2^k` for a sufficiently large `k`, keyed by the bitlength of the
/// fixed-point values they hold.
pub static DEFAULT_PRIME_MOD: Lazy<HashMap<u32, u64>> = Lazy::new(|| {
    HashMap::from([
        (25, 33550337),
        (28, 268582913),
        (31, 2147352577),
        (32, 4293918721),
        (33, 8589475841),
        (34, 17179672577),
        (35, 34359410689),
        (36, 68718428161),
        (37, 137438822401),
        (38, 274876334081),
        (39, 549755486209),
        (40, 1099510054913),
        (41, 2199023190017),
    ])
});

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainKind {
    Ring,
    Field,
}

/// The active share domain of a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Domain {
    kind: DomainKind,
    bitlength: u32,
    modulus: u64,
}

/// All-ones mask of `bitlength` bits. A bitlength of 64 yields `u64::MAX`.
pub fn bit_mask(bitlength: u32) -> u64 {
    if bitlength >= 64 {
        u64::MAX
    } else {
        (1 << bitlength) - 1
    }
}

/// `((x mod m) + m) mod m`, the non-negative representative of `x`.
pub fn neg_mod(x: i128, m: u64) -> u64 {
    let m = m as i128;
    (((x % m) + m) % m) as u64
}

impl Domain {
    /// Ring domain Z_{2^bitlength}.
    ///
    /// # Panics
    /// If `bitlength` is not in `1..64`.
    pub fn ring(bitlength: u32) -> Self {
        assert!(
            bitlength > 0 && bitlength < 64,
            "ring bitlength must be in 1..64, got {bitlength}"
        );
        Self {
            kind: DomainKind::Ring,
            bitlength,
            modulus: 1 << bitlength,
        }
    }

    /// Field domain for `bitlength`. Falls back to [`FALLBACK_FIELD_BITLENGTH`] when no prime is
    /// known for the requested bitlength.
    pub fn field(bitlength: u32) -> Self {
        let (bitlength, modulus) = match DEFAULT_PRIME_MOD.get(&bitlength) {
            Some(&p) => (bitlength, p),
            None => {
                warn!(
                    requested = bitlength,
                    "No prime for bitlength, using {FALLBACK_FIELD_BITLENGTH}"
                );
                (
                    FALLBACK_FIELD_BITLENGTH,
                    DEFAULT_PRIME_MOD[&FALLBACK_FIELD_BITLENGTH],
                )
            }
        };
        Self {
            kind: DomainKind::Field,
            bitlength,
            modulus,
        }
    }

    pub fn new(kind: DomainKind, bitlength: u32) -> Self {
        match kind {
            DomainKind::Ring => Self::ring(bitlength),
            DomainKind::Field => Self::field(bitlength),
        }
    }

    pub fn kind(&self) -> DomainKind {
        self.kind
    }

    pub fn bitlength(&self) -> u32 {
        self.bitlength
    }

    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    /// Offset which maps the signed range onto `[0, modulus)` while preserving order.
    ///
    /// A value `x` is non-negative in the signed interpretation iff
    /// `add(x, bias()) >= bias()`.
    pub fn bias(&self) -> u64 {
        self.modulus - self.modulus / 2
    }

    #[inline]
    pub fn mask(&self, x: u64) -> u64 {
        match self.kind {
            DomainKind::Ring => x & (self.modulus - 1),
            DomainKind::Field => x % self.modulus,
        }
    }

    pub fn mask_in_place(&self, xs: &mut [u64]) {
        xs.iter_mut().for_each(|x| *x = self.mask(*x));
    }

    #[inline]
    pub fn add(&self, x: u64, y: u64) -> u64 {
        match self.kind {
            DomainKind::Ring => self.mask(x.wrapping_add(y)),
            // field primes are below 2^42, so the sum can't overflow
            DomainKind::Field => (self.mask(x) + self.mask(y)) % self.modulus,
        }
    }

    #[inline]
    pub fn sub(&self, x: u64, y: u64) -> u64 {
        match self.kind {
            DomainKind::Ring => self.mask(x.wrapping_sub(y)),
            DomainKind::Field => (self.mask(x) + self.modulus - self.mask(y)) % self.modulus,
        }
    }

    #[inline]
    pub fn mul(&self, x: u64, y: u64) -> u64 {
        match self.kind {
            DomainKind::Ring => self.mask(x.wrapping_mul(y)),
            DomainKind::Field => ((x as u128 * y as u128) % self.modulus as u128) as u64,
        }
    }

    #[inline]
    pub fn neg(&self, x: u64) -> u64 {
        self.sub(0, x)
    }

    /// `x * 2^sf` in the domain.
    pub fn shl(&self, x: u64, sf: u32) -> u64 {
        match self.kind {
            DomainKind::Ring => self.mask(x.checked_shl(sf).unwrap_or(0)),
            DomainKind::Field => {
                let factor = ((1_u128 << sf.min(127)) % self.modulus as u128) as u64;
                self.mul(x, factor)
            }
        }
    }

    /// Signed residue of `x`: `x - modulus` if `x >= modulus / 2`, otherwise `x`.
    pub fn to_signed(&self, x: u64) -> i64 {
        let x = self.mask(x);
        if x >= self.modulus / 2 {
            x as i64 - self.modulus as i64
        } else {
            x as i64
        }
    }

    pub fn from_signed(&self, x: i64) -> u64 {
        neg_mod(x as i128, self.modulus)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DomainKind::Ring => write!(f, "Z_2^{}", self.bitlength),
            DomainKind::Field => write!(f, "Z_{} ({} bit)", self.modulus, self.bitlength),
        }
    }
}
