//! The receiver pipeline: presentation queue, pacer and the session loop
//! that drives every stage.

pub mod queue;
pub mod session;

pub use session::{Session, SessionHandle, SessionMode};
