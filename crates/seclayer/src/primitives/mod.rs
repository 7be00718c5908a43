//! Two-party primitives the layer backends are built from.
//!
//! All primitives consume the calling party's shares and return shares of the result, reduced
//! into the instance's [`Domain`]. Randomness for the multiplications and AND gates comes from
//! the instance's [`CorrelationProvider`].
use crate::domain::Domain;
use crate::party::Party;
use correlations::CorrelationProvider;
use net::NetIo;
use std::ops::Range;

pub mod boolean;
pub mod correlations;
pub mod linear;
pub mod net;
pub mod nonlinear;

/// Everything one worker needs to run primitives with the remote party: its role, the domain,
/// a channel and a source of correlated randomness.
///
/// `party` is the role of the session, `role` the role this instance plays in its protocols.
/// They differ for odd worker instances.
pub struct ProtocolInstance {
    party: Party,
    role: Party,
    domain: Domain,
    pub(crate) io: NetIo,
    pub(crate) correlations: Box<dyn CorrelationProvider>,
}

impl ProtocolInstance {
    pub fn new(
        party: Party,
        role: Party,
        domain: Domain,
        io: NetIo,
        correlations: Box<dyn CorrelationProvider>,
    ) -> Self {
        Self {
            party,
            role,
            domain,
            io,
            correlations,
        }
    }

    pub fn party(&self) -> Party {
        self.party
    }

    pub fn role(&self) -> Party {
        self.role
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn io(&self) -> &NetIo {
        &self.io
    }

    /// Protocol role played on this instance by the session party `physical`.
    pub fn role_of(&self, physical: Party) -> Party {
        if physical == self.party {
            self.role
        } else {
            self.role.other()
        }
    }

    /// `value` if this instance plays the first role, otherwise 0. Used to add public
    /// constants to exactly one share.
    #[inline]
    pub(crate) fn public(&self, value: u64) -> u64 {
        if self.role.is_first() {
            self.domain.mask(value)
        } else {
            0
        }
    }
}

/// Split `0..len` into `parts` contiguous ranges. The last range absorbs the remainder.
pub fn chunk_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.clamp(1, len.max(1));
    let chunk = len / parts;
    (0..parts)
        .map(|i| {
            let end = if i + 1 == parts { len } else { (i + 1) * chunk };
            i * chunk..end
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::chunk_ranges;

    #[test]
    fn last_chunk_absorbs_remainder() {
        assert_eq!(chunk_ranges(10, 3), [0..3, 3..6, 6..10]);
        assert_eq!(chunk_ranges(2, 4), [0..1, 1..2]);
        assert_eq!(chunk_ranges(0, 4), [0..0]);
    }
}
