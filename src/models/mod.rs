pub mod action;
pub mod host;
pub mod phase;
pub mod service;

pub use action::*;
pub use host::*;
pub use phase::*;
pub use service::*;
