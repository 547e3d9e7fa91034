pub mod eval;
pub mod kinds;
pub mod watch;
