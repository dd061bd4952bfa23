//! Application layer: the per-turn processing pipeline.

mod turn_pipeline;

pub use turn_pipeline::{TurnError, TurnOutcome, TurnPipeline, TurnReply};
