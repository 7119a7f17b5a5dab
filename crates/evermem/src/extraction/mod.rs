//! Extraction worker pool (C4): drains a closed episode, invokes the LLM and
//! embedding collaborators, and assembles the three durable artifact
//! families. See [`pipeline`] for the orchestration and [`collaborators`] for
//! the external-service seam.

pub mod collaborators;
pub mod facts;
pub mod foresight;
pub mod pipeline;
pub mod profile;
pub mod summarizer;

pub use collaborators::{EmbeddingCollaborator, HttpEmbeddingCollaborator, HttpLlmCollaborator, LlmCollaborator};
pub use pipeline::{ClosedEpisode, ExtractionOutcome, ExtractionPipeline};
