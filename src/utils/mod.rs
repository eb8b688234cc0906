pub mod evaluation;
pub mod stats;
