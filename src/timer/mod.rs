mod ids;
pub(crate) mod queue;

pub use ids::{TimerId, TimerIdAllocator};
pub(crate) use queue::{TimerKind, TimerQueue};
