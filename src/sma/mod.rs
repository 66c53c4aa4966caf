pub mod engine;

pub use engine::{compute_sma, SmaError};
