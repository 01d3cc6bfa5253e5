//! Demo unfolder: splits one parent event into several children.

use arrowflow_core::databundle::UnfoldedPayload;
use arrowflow_core::errors::EngineResult;
use arrowflow_core::event::Event;
use arrowflow_core::interfaces::Unfolder;

/// Produces `times` children per parent, each carrying the parent's
/// `upstream_tag` value (unchanged) under tag `"item"`.
pub struct RepeatUnfolder {
    pub label: String,
    pub upstream_tag: String,
    pub times: usize,
}

impl Unfolder for RepeatUnfolder {
    fn name(&self) -> &str {
        &self.label
    }

    fn unfold(&self, parent: &Event) -> EngineResult<Vec<UnfoldedPayload>> {
        let value: i64 = parent.get::<i64>(&self.upstream_tag).unwrap_or_default();
        Ok((0..self.times).map(|_| UnfoldedPayload::new("item", value)).collect())
    }
}
