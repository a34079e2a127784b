mod intervals;
mod timers;
