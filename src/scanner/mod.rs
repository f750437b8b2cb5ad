pub mod executor;
pub mod xml;

pub use executor::*;
