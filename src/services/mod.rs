pub mod interval;
pub mod timer;

pub use interval::IntervalService;
pub use timer::TimerService;
