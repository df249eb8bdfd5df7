//! Labels and forward-reference chains.
//!
//! A [`Label`] names a code position that may not be known yet. Every branch
//! emitted to an unbound label leaves a patch site whose displacement field
//! temporarily holds the link to the previously emitted site for the same
//! label. The chain therefore lives inside the code itself and needs no side
//! allocation. A link is stored as the signed distance `previous - site`,
//! which is always negative; `0` terminates the chain.
//!
//! Binding walks the chain, checks that the true displacement fits each
//! site's field, and only then rewrites the fields. Once bound a label is
//! final.
//!
//! A label keeps one chain per displacement width, so a link only ever spans
//! sites whose fields have the same reach. x86-64 links rel32 sites on the
//! wide chain and rel8 sites on the near chain. AArch64 links imm26 sites
//! (including the `b` of a far branch pair) on the wide chain, imm19 sites
//! on the near chain and imm14 sites on the short chain.

use crate::buffer::{BufferId, CodeBuffer};
use crate::error::AsmError;

/// One of a label's pending chains, named by the reach of its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Chain {
    Wide,
    Near,
    #[cfg_attr(not(feature = "aarch64"), allow(dead_code))]
    Short,
}

impl Chain {
    #[cfg_attr(not(feature = "aarch64"), allow(dead_code))]
    pub(crate) const ALL: [Chain; 3] = [Chain::Wide, Chain::Near, Chain::Short];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Most recent patch site of each chain, indexed by [`Chain`].
    Unbound([Option<usize>; 3]),
    Bound(usize),
}

/// A position in the code buffer, possibly not yet known.
///
/// Labels are not `Clone`: a copy of an unbound label would share its chain
/// and corrupt it on bind.
#[derive(Debug, PartialEq, Eq)]
pub struct Label {
    state: State,
    owner: Option<BufferId>,
}

impl Default for Label {
    fn default() -> Self {
        Self::new()
    }
}

impl Label {
    /// A fresh, unused label.
    pub const fn new() -> Self {
        Self {
            state: State::Unbound([None; 3]),
            owner: None,
        }
    }

    /// Whether the label's position is known.
    #[inline]
    pub fn is_bound(&self) -> bool {
        matches!(self.state, State::Bound(_))
    }

    /// Whether any chain has pending sites.
    #[inline]
    pub fn is_linked(&self) -> bool {
        match self.state {
            State::Unbound(heads) => heads.iter().any(Option::is_some),
            State::Bound(_) => false,
        }
    }

    /// Whether the narrow chain (x86-64 rel8, AArch64 imm19) has pending
    /// sites.
    #[inline]
    pub fn has_near(&self) -> bool {
        self.head(Chain::Near).is_some()
    }

    /// Unbound with no pending references.
    #[inline]
    pub fn is_unused(&self) -> bool {
        self.state == State::Unbound([None; 3])
    }

    /// Bound offset, if bound.
    #[inline]
    pub fn position(&self) -> Option<usize> {
        match self.state {
            State::Bound(pos) => Some(pos),
            State::Unbound(_) => None,
        }
    }

    /// Tie the label to `buffer`, or check that it already is.
    pub(crate) fn claim(&mut self, buffer: &CodeBuffer) -> Result<(), AsmError> {
        match self.owner {
            None => {
                self.owner = Some(buffer.id());
                Ok(())
            }
            Some(id) if id == buffer.id() => Ok(()),
            Some(_) => Err(AsmError::ForeignLabel),
        }
    }

    /// Head of `chain`.
    pub(crate) fn head(&self, chain: Chain) -> Option<usize> {
        match self.state {
            State::Unbound(heads) => heads[chain as usize],
            State::Bound(_) => None,
        }
    }

    /// Record `site` as the new head of `chain`; returns the old head.
    pub(crate) fn push(&mut self, chain: Chain, site: usize, buffer: &mut CodeBuffer) -> Option<usize> {
        let was_unused = self.is_unused();
        let State::Unbound(heads) = &mut self.state else {
            unreachable!("linking a bound label");
        };
        let prev = heads[chain as usize].replace(site);
        if was_unused {
            buffer.note_linked();
        }
        prev
    }

    /// Fail if the label is already bound.
    pub(crate) fn check_unbound(&self) -> Result<(), AsmError> {
        match self.state {
            State::Bound(position) => Err(AsmError::LabelAlreadyBound { position }),
            State::Unbound(_) => Ok(()),
        }
    }

    /// Transition to bound once every site has been patched.
    pub(crate) fn mark_bound(&mut self, position: usize, buffer: &mut CodeBuffer) {
        if !self.is_unused() {
            buffer.note_resolved();
        }
        log::trace!("label bound at {:#x}", position);
        self.state = State::Bound(position);
    }
}

/// Stored form of a chain link from `site` back to `prev`.
#[inline]
pub(crate) fn link_distance(site: usize, prev: Option<usize>) -> i64 {
    prev.map_or(0, |p| {
        debug_assert!(p < site);
        p as i64 - site as i64
    })
}

/// Inverse of [`link_distance`].
#[inline]
pub(crate) fn link_target(site: usize, stored: i64) -> Option<usize> {
    if stored == 0 {
        None
    } else {
        debug_assert!(stored < 0, "chain link must point backwards");
        Some((site as i64 + stored) as usize)
    }
}

/// An absolute address outside the code buffer: a runtime entry or stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExternalLabel {
    /// Target address.
    pub address: u64,
}

impl ExternalLabel {
    /// Name an external target.
    pub const fn new(address: u64) -> Self {
        Self { address }
    }
}
