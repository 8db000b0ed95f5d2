//! Markdown study notes for a topic

use lectern_common::config::WorkerConfig;
use lectern_common::errors::{AppError, Result};
use lectern_common::llm::ChatMessage;
use serde::{Deserialize, Serialize};

use super::worker::{Gathered, Recipe, RetrievalPlan, RetrievalStep};
use super::{Artifact, ArtifactKind, ArtifactParameters, ArtifactRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesDocument {
    pub topic: String,
    pub markdown: String,
    /// Sources the notes were grounded on, in retrieval order
    #[serde(default)]
    pub sources: Vec<String>,
}

const NOTES_FORMAT: &str = "\
Your response MUST be in Markdown format with careful attention to spacing:
- Add two blank lines before each heading and one blank line after each heading
- Use clear hierarchical headings (## for main sections, ### for subsections)
- Include a blank line after each bullet point list
- Align tables with spaces between columns, e.g.
  | Column1 | Column2 | Column3 |
  | ------- | :-----: | ------: |
  | Left    | Center  | Right   |
- Add a blank line before and after code blocks and tables
- Include code examples with proper syntax highlighting when relevant
- Write mathematical formulas in LaTeX (\\( \\) inline, \\[ \\] for display)

Keep the notes between 600-700 words. Focus on technical accuracy and clarity.";

pub(crate) struct NotesRecipe {
    config: WorkerConfig,
}

impl NotesRecipe {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    fn messages(&self, topic: &str, material: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::user(format!(
            "You are an expert machine learning educator creating concise study notes. \
             Create detailed yet concise notes on '{topic}' based on the following content.\n\n\
             {NOTES_FORMAT}\n\
             End with a brief concluding paragraph summarizing the importance of {topic} in machine learning.\n\n\
             {material}"
        ))]
    }
}

impl Recipe for NotesRecipe {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Notes
    }

    fn normalize(&self, request: ArtifactRequest) -> Result<ArtifactRequest> {
        let topic = request.topic.trim();
        if topic.is_empty() {
            return Err(AppError::MissingField {
                field: "topic".to_string(),
            });
        }
        Ok(ArtifactRequest {
            kind: ArtifactKind::Notes,
            topic: topic.to_string(),
            parameters: ArtifactParameters::default(),
        })
    }

    fn plan(&self, request: &ArtifactRequest) -> RetrievalPlan {
        let mut plan = RetrievalPlan::single(RetrievalStep::Similar {
            query: request.topic.clone(),
            k: self.config.notes_retrieve_k,
            filter: None,
        });
        plan.max_chunks = Some(self.config.notes_use_chunks);
        plan
    }

    fn no_context(&self, request: &ArtifactRequest) -> Option<AppError> {
        Some(AppError::NoContext {
            message: format!("No information found for topic '{}'", request.topic),
        })
    }

    fn prompt(&self, request: &ArtifactRequest, context: &str) -> Vec<ChatMessage> {
        self.messages(
            &request.topic,
            &format!("Content to summarize:\n{context}"),
        )
    }

    fn fallback_prompt(&self, request: &ArtifactRequest) -> Vec<ChatMessage> {
        self.messages(
            &request.topic,
            &format!(
                "Write the notes from your general knowledge of {} as taught in an introductory machine learning course.",
                request.topic
            ),
        )
    }

    fn structured(&self) -> bool {
        false
    }

    fn parse(&self, request: &ArtifactRequest, raw: &str, gathered: &Gathered) -> Result<Artifact> {
        let markdown = raw.trim();
        if markdown.is_empty() {
            return Err(AppError::Generation {
                message: "model returned empty notes".into(),
            });
        }
        Ok(Artifact::Notes(NotesDocument {
            topic: request.topic.clone(),
            markdown: markdown.to_string(),
            sources: gathered.sources(),
        }))
    }
}
