//! Shared data models for the update server

mod catalog;
mod download;
mod feedback;
mod session;

pub use catalog::*;
pub use download::*;
pub use feedback::*;
pub use session::*;
