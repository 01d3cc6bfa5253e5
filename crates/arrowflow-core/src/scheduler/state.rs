//! Internal scheduler bookkeeping, held behind the single scheduler mutex
//! (spec §5: "The scheduler serializes assignment decisions under a single
//! mutex; arrow execution occurs without that mutex").

use crate::topology::ArrowStatus;

pub(crate) struct ArrowRuntime {
    pub status: ArrowStatus,
    pub in_flight: usize,
}

impl ArrowRuntime {
    pub fn new() -> Self {
        ArrowRuntime { status: ArrowStatus::Uninitialized, in_flight: 0 }
    }
}
