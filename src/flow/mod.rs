//! Flow orchestration: steps, timers, the input race and the controller that
//! ties them together.

pub mod controller;
pub mod navigation;
pub mod race;
pub mod registry;
pub mod step;
pub mod timer;

pub use controller::{FlowDeps, FlowNotice, FlowStatus, SERVER_UNREACHABLE, StepController};
pub use navigation::{ChannelNavigator, Handoff, Navigator};
pub use race::{RaceResolver, Ticket};
pub use registry::FlowRegistry;
pub use step::{SessionPhase, Step};
pub use timer::{TimerSlot, TimerStats};
