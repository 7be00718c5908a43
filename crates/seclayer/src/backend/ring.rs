use super::LayerBackend;
use crate::config::BackendKind;
use crate::domain::Domain;

/// OT based protocols over Z_{2^l}. Uses the generic protocol steps throughout.
#[derive(Debug, Clone)]
pub struct RingBackend {
    domain: Domain,
}

impl RingBackend {
    pub fn new(bitlength: u32) -> Self {
        Self {
            domain: Domain::ring(bitlength),
        }
    }
}

impl LayerBackend for RingBackend {
    fn name(&self) -> &'static str {
        "Ring-OT-SCI_OT"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Ring
    }

    fn domain(&self) -> &Domain {
        &self.domain
    }
}
