//! Everything on the radio side of the bridge.

pub mod driver;
pub mod handle;
pub mod link;
pub mod schedule;
pub mod simulated;

pub use driver::{LinkSettings, RadioDriver};
pub use handle::{Query, RadioHandle};
pub use link::{Clock, RadioLink};
pub use schedule::{FrameGate, HopSchedule};
pub use simulated::{SimulatedLight, SimulatedRadio};
