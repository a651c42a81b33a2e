//! Command implementations for fwlink

pub mod check;
pub mod config;
pub mod flash;
pub mod wait;

pub use check::check;
pub use flash::flash;
pub use wait::wait;
