use serde::{Deserialize, Serialize};
use std::fmt;

/// The two roles of a computation.
///
/// `First` is also known as Alice or the server and holds the model. `Second` is Bob, the
/// client, which reconstructs values during verification.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    First,
    Second,
}

impl Party {
    pub const ALICE: Party = Party::First;
    pub const BOB: Party = Party::Second;
    pub const SERVER: Party = Party::First;
    pub const CLIENT: Party = Party::Second;

    pub fn other(self) -> Self {
        match self {
            Party::First => Party::Second,
            Party::Second => Party::First,
        }
    }

    /// Numeric id, 0 for `First` and 1 for `Second`.
    pub fn id(self) -> usize {
        match self {
            Party::First => 0,
            Party::Second => 1,
        }
    }

    pub fn is_first(self) -> bool {
        self == Party::First
    }

    /// Role of the worker instance with index `thread`. Odd instances swap roles.
    pub fn for_thread(self, thread: usize) -> Self {
        if thread & 1 == 1 {
            self.other()
        } else {
            self
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::First => write!(f, "SERVER"),
            Party::Second => write!(f, "CLIENT"),
        }
    }
}
