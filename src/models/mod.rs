mod session;

pub use session::{
    format_elapsed, CycleCount, Event, Session, SessionMode, INFINITE_SENTINEL,
};
