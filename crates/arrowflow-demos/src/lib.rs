//! Concrete sources, stages, sinks, and factories exercising
//! `arrowflow-core`'s scheduler and factory graph end to end.

pub mod factories;
pub mod sink;
pub mod source;
pub mod stage;
pub mod topology;
pub mod unfold;

pub use factories::{ChainFactory, FactoryCounters, FailingFactory};
pub use sink::{CallGraphInspectingSink, CollectingSink, SummingSink};
pub use source::IntSource;
pub use stage::RequestTagStage;
pub use topology::{build_broadcast_pipeline, build_pipeline, build_unfold_pipeline};
pub use unfold::RepeatUnfolder;
