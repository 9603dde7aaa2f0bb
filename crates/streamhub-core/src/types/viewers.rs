//! Merge policy between the two viewer-counting pipelines.
//!
//! The upstream poller and the presence hub both report a viewer count for
//! the same stream. Every write of the effective count goes through
//! [`ViewerMergePolicy::merge`] so the precedence is explicit and testable.

use serde::{Deserialize, Serialize};

/// Which pipeline produced the signal being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerSource {
    /// Count reported by the upstream streaming service.
    Poll,
    /// Sum of presence-hub tallies across instances.
    Presence,
}

/// How the effective viewer count is derived from both pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerMergePolicy {
    /// Whichever pipeline wrote last wins.
    #[default]
    LatestSignal,
    /// Presence tally when non-zero, otherwise the polled count.
    PresenceFirst,
    /// The larger of the two counts.
    Max,
}

impl ViewerMergePolicy {
    /// Compute the effective viewer count.
    ///
    /// `polled` is the most recent upstream count, `presence` the summed
    /// presence tally, and `source` the pipeline performing this write.
    pub fn merge(self, polled: u64, presence: u64, source: ViewerSource) -> u64 {
        match self {
            Self::LatestSignal => match source {
                ViewerSource::Poll => polled,
                ViewerSource::Presence => presence,
            },
            Self::PresenceFirst => {
                if presence > 0 {
                    presence
                } else {
                    polled
                }
            }
            Self::Max => polled.max(presence),
        }
    }
}
