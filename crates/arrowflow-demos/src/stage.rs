//! Demo stage logic: triggers the factory graph, doesn't compute directly.

use arrowflow_core::errors::EngineResult;
use arrowflow_core::event::Event;
use arrowflow_core::topology::StageLogic;

/// Forces `tag` to exist (running whatever factory chain it depends on)
/// without touching the value itself. Downstream arrows read it back out
/// with `Event::get`.
pub struct RequestTagStage {
    pub label: String,
    pub tag: String,
}

impl StageLogic for RequestTagStage {
    fn name(&self) -> &str {
        &self.label
    }

    fn process(&self, event: &mut Event) -> EngineResult<()> {
        event.get_or_create::<i64>(&self.tag)?;
        Ok(())
    }
}
