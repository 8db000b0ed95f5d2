//! Lectern Pipeline
//!
//! Retrieval-augmented generation over course material:
//! - Resource context (embedder, index, model, history, cache), built once
//! - Query contextualization against conversation history
//! - Grounded answer generation with a fixed fallback policy
//! - The per-turn conversation state machine
//! - A generic retrieve-and-generate worker for structured artifacts

pub mod artifacts;
pub mod contextualizer;
pub mod generator;
pub mod orchestrator;
pub mod prompts;
pub mod resources;

#[cfg(test)]
pub(crate) mod testing;

pub use artifacts::{
    Artifact, ArtifactKind, ArtifactParameters, ArtifactReply, ArtifactRequest, ArtifactService,
    LectureRef,
};
pub use contextualizer::QueryContextualizer;
pub use generator::{AnswerGenerator, GeneratedAnswer};
pub use orchestrator::{ChatReply, ClearReply, ConversationOrchestrator, TurnState};
pub use resources::ResourceContext;
