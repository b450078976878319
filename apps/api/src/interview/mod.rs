pub mod checkpoint;
pub mod context;
pub mod engine;
pub mod feedback;
pub mod handlers;
pub mod judgment;
pub mod pacing;
pub mod prompts;
pub mod service;
pub mod turn_state;
