pub mod context;
pub mod engine;
pub mod monitor;
pub mod node;
pub mod slide_range;
pub mod variables;
