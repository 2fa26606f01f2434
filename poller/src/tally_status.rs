//! Which URLs of a poll ended in which result.

use audit_tally::TallyResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-URL results of a quorate poll. A URL is in at most one set;
/// recording it again moves it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyStatus {
    agreed: BTreeSet<String>,
    disagreed: BTreeSet<String>,
    too_close: BTreeSet<String>,
    no_quorum: BTreeSet<String>,
    errors: BTreeMap<String, String>,
}

impl TallyStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn forget(&mut self, url: &str) {
        self.agreed.remove(url);
        self.disagreed.remove(url);
        self.too_close.remove(url);
        self.no_quorum.remove(url);
    }

    /// Record the latest result for `url`. A lost poller-only block is not
    /// tracked here; it is handled by deleting the local copy.
    pub fn record(&mut self, url: &str, result: TallyResult) {
        if result == TallyResult::LostPollerOnlyBlock {
            return;
        }
        self.forget(url);
        let set = match result {
            TallyResult::Won => &mut self.agreed,
            TallyResult::Lost => &mut self.disagreed,
            TallyResult::TooClose => &mut self.too_close,
            _ => &mut self.no_quorum,
        };
        set.insert(url.to_string());
    }

    pub fn add_error(&mut self, url: &str, message: impl Into<String>) {
        self.errors.insert(url.to_string(), message.into());
    }

    pub fn agreed(&self) -> &BTreeSet<String> {
        &self.agreed
    }

    pub fn disagreed(&self) -> &BTreeSet<String> {
        &self.disagreed
    }

    pub fn too_close(&self) -> &BTreeSet<String> {
        &self.too_close
    }

    pub fn no_quorum(&self) -> &BTreeSet<String> {
        &self.no_quorum
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// URLs with a decided or undecided result.
    pub fn tallied_count(&self) -> usize {
        self.agreed.len() + self.disagreed.len() + self.too_close.len() + self.no_quorum.len()
    }

    /// Agreed URLs over agreed plus disagreed URLs.
    pub fn percent_agreement(&self) -> Option<f64> {
        let decided = self.agreed.len() + self.disagreed.len();
        (decided > 0).then(|| self.agreed.len() as f64 / decided as f64)
    }
}
