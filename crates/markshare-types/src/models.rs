use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Direction of a vote on a public post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteType {
    Up,
    Down,
}

impl VoteType {
    /// Storage and wire spelling (`UP` / `DOWN`).
    pub fn as_str(self) -> &'static str {
        match self {
            VoteType::Up => "UP",
            VoteType::Down => "DOWN",
        }
    }

    /// Counter deltas `(upvotes, downvotes)` for adding one vote of this type.
    pub fn deltas(self) -> (i64, i64) {
        match self {
            VoteType::Up => (1, 0),
            VoteType::Down => (0, 1),
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown vote type `{0}`")]
pub struct UnknownVoteType(pub String);

impl FromStr for VoteType {
    type Err = UnknownVoteType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(VoteType::Up),
            "DOWN" => Ok(VoteType::Down),
            other => Err(UnknownVoteType(other.to_string())),
        }
    }
}
