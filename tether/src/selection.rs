//! Track which candidate is selected.
//!
//! Every change of the candidate set runs [`reconcile`], which keeps the
//! user's choice when the same serial is still present (switching to the new
//! instance for it), and otherwise falls back to the first candidate.

use crate::{aggregator::CandidateSet, backend::BackendHandle};

/// Selection after the candidate set changed to `candidates`.
///
/// Preserve-by-serial first, then first-of-set, then none.
pub fn reconcile(
    previous: Option<&BackendHandle>,
    candidates: &CandidateSet,
) -> Option<BackendHandle> {
    previous
        .and_then(|old| candidates.find(old.serial()))
        .or_else(|| candidates.first())
        .cloned()
}

/// Holder of the current selection.
#[derive(Debug, Default)]
pub struct SelectionTracker {
    selected: Option<BackendHandle>,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<&BackendHandle> {
        self.selected.as_ref()
    }

    pub fn selected_serial(&self) -> Option<&str> {
        self.selected.as_ref().map(|backend| backend.serial())
    }

    /// Apply [`reconcile`] for a new candidate set.
    pub fn reconcile(&mut self, candidates: &CandidateSet) -> Option<&BackendHandle> {
        self.selected = reconcile(self.selected.as_ref(), candidates);
        self.selected.as_ref()
    }

    /// Select the candidate with `serial` from the current set.
    ///
    /// The handle is always looked up in `candidates` rather than taken from
    /// the caller. Returns false, leaving the selection unchanged, if no
    /// candidate has that serial.
    pub fn select_manually(&mut self, serial: &str, candidates: &CandidateSet) -> bool {
        match candidates.find(serial) {
            Some(backend) => {
                self.selected = Some(backend.clone());
                true
            }
            None => false,
        }
    }
}
