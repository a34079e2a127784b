pub mod interval;
pub mod timer;

pub use interval::{Activity, Interval, Screenshot};
pub use timer::Timer;
