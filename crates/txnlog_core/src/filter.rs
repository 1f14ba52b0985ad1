//! Anchor-matching state machine for iteration.
//!
//! Iteration anchored at a transaction id delivers nothing until the anchor
//! is found, skips the anchor's own group, and delivers everything after
//! it. The three states and their transitions are the whole protocol;
//! [`step`](MatchFilter::step) is pure so the machine is testable without
//! I/O.

use crate::line::{line_key, LineTag};
use crate::types::TxnId;

/// Match state relative to the anchor transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchState {
    /// The anchor has not been seen yet; everything is consumed silently.
    PreMatch,
    /// Inside the anchor's own group; consumed, waiting for the next opener.
    Match,
    /// Past the anchor; lines are delivered.
    PostMatch,
}

/// Stateful filter selecting lines relative to an anchor id.
#[derive(Debug)]
pub(crate) struct MatchFilter {
    /// On-disk form of the anchor id; `None` anchors at the beginning.
    tid: Option<String>,
    state: MatchState,
}

impl MatchFilter {
    pub(crate) fn new(tid: Option<&TxnId>) -> Self {
        Self {
            tid: tid.map(ToString::to_string),
            state: match tid {
                None => MatchState::PostMatch,
                Some(_) => MatchState::PreMatch,
            },
        }
    }

    /// Advances the machine with one line and reports whether to deliver it.
    ///
    /// Transaction and Replay lines drive every transition; `payload` is
    /// the line body after the tag byte, consulted for the opener key only
    /// while searching for the anchor.
    pub(crate) fn step(&mut self, tag: LineTag, payload: &[u8]) -> bool {
        match self.state {
            MatchState::PostMatch => true,
            MatchState::PreMatch => {
                if tag.opens_txn() {
                    let anchored = self
                        .tid
                        .as_ref()
                        .is_some_and(|tid| tid.as_bytes() == line_key(payload));
                    if anchored {
                        self.state = MatchState::Match;
                    }
                }
                false
            }
            MatchState::Match => {
                if tag.opens_txn() {
                    self.state = MatchState::PostMatch;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Returns whether the anchor was found (or no anchor was requested).
    pub(crate) fn matched(&self) -> bool {
        self.state != MatchState::PreMatch
    }

    /// Adjusts the state when crossing from the archive into the active
    /// file.
    ///
    /// Delivery steps back to [`MatchState::Match`] so the snapshot group
    /// that re-expresses already-archived state is consumed rather than
    /// re-delivered; it resumes at the first opener appended after the
    /// rollover. An anchor still unmatched stays unmatched.
    pub(crate) fn enter_active(&mut self) {
        if self.state == MatchState::PostMatch {
            self.state = MatchState::Match;
        }
    }
}
