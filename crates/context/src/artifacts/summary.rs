//! Lecture and week summaries
//!
//! Summaries are built from a filter-only scan of one source document, so
//! the chunks come back in document order rather than by similarity.

use lectern_common::config::WorkerConfig;
use lectern_common::errors::{AppError, Result};
use lectern_common::llm::ChatMessage;
use lectern_search::MetadataFilter;
use serde::{Deserialize, Serialize};

use super::worker::{Gathered, Recipe, RetrievalPlan, RetrievalStep};
use super::{Artifact, ArtifactKind, ArtifactParameters, ArtifactRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryDocument {
    pub week: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lecture: Option<u32>,
    /// Source document the summary was built from
    pub source: String,
    pub markdown: String,
}

pub fn lecture_source(week: u32, lecture: u32) -> String {
    format!("Week_{week}_Lecture_{lecture}.pdf")
}

pub fn slides_source(week: u32) -> String {
    format!("MLP Week {week} Slides.pdf")
}

const LECTURE_FORMAT: &str = "\
## Formatting Guidelines:
- Use a level 2 heading (##) for the lecture title and level 3 (###) for subsections
- Add mathematical formulas in LaTeX (\\( \\) inline, \\[ \\] for display)
- Present code in language-specific code blocks
- Use tables to compare concepts, bullet points for key ideas and numbered lists for steps
- Highlight important definitions or theorems in blockquotes (> statement)

## Content Structure:
1. Begin with a level 2 heading that captures the lecture topic
2. Start the first paragraph with 'In this lecture...' or 'This lecture...'
3. Organize the body with level 3 headings for distinct subtopics
4. Finish with a short concluding paragraph

Keep the summary engaging while maintaining academic precision. \
Never mention that the content came from a PDF document.";

pub(crate) struct SummaryRecipe {
    config: WorkerConfig,
}

impl SummaryRecipe {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    fn week(request: &ArtifactRequest) -> u32 {
        request.parameters.week.unwrap_or_default()
    }

    fn source(request: &ArtifactRequest) -> String {
        let week = Self::week(request);
        match request.parameters.lecture {
            Some(lecture) => lecture_source(week, lecture),
            None => slides_source(week),
        }
    }

    fn messages(&self, request: &ArtifactRequest, material: &str) -> Vec<ChatMessage> {
        let week = Self::week(request);
        let prompt = match request.parameters.lecture {
            Some(lecture) => format!(
                "You are a video lecture summarizer specializing in academic content. \
                 Create a concise, well-structured summary (250-300 words) of Week {week}, Lecture {lecture}.\n\n\
                 {LECTURE_FORMAT}\n\n{material}"
            ),
            None => format!(
                "You are an academic summarizer for a Machine Learning Practice course. \
                 Summarize the Week {week} slides in 300-500 words. \
                 Focus on key concepts, algorithms, techniques and important code examples covered in the week. \
                 Return Markdown with a clear heading for Week {week}, subheadings for major topics, \
                 bullet points for key concepts and code blocks for any code. \
                 Start the first paragraph after the heading with 'In Week {week},' and end with a brief \
                 concluding paragraph starting with 'In conclusion, Week {week}'.\n\n{material}"
            ),
        };
        vec![ChatMessage::user(prompt)]
    }
}

impl Recipe for SummaryRecipe {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Summary
    }

    fn normalize(&self, request: ArtifactRequest) -> Result<ArtifactRequest> {
        let week = request.parameters.week.ok_or_else(|| AppError::MissingField {
            field: "week".to_string(),
        })?;
        if week == 0 {
            return Err(AppError::validation("week", "week must be a positive integer"));
        }
        let lecture = request.parameters.lecture;
        if lecture == Some(0) {
            return Err(AppError::validation("lecture", "lecture must be a positive integer"));
        }

        let topic = match lecture {
            Some(lecture) => format!("Week {week} Lecture {lecture}"),
            None => format!("Week {week}"),
        };
        Ok(ArtifactRequest {
            kind: ArtifactKind::Summary,
            topic,
            parameters: ArtifactParameters {
                week: Some(week),
                lecture,
                ..Default::default()
            },
        })
    }

    fn plan(&self, request: &ArtifactRequest) -> RetrievalPlan {
        let limit = self.config.summary_chunks;
        let by_source = RetrievalStep::Scan {
            filter: MetadataFilter::source(Self::source(request)),
            limit,
        };

        if request.parameters.lecture.is_some() {
            return RetrievalPlan::single(by_source);
        }
        RetrievalPlan::first_non_empty(vec![
            by_source,
            RetrievalStep::Scan {
                filter: MetadataFilter::week(Self::week(request)),
                limit,
            },
        ])
    }

    fn no_context(&self, request: &ArtifactRequest) -> Option<AppError> {
        let message = match request.parameters.lecture {
            Some(lecture) => format!(
                "No transcript found for Week {}, Lecture {}",
                Self::week(request),
                lecture
            ),
            None => format!("No slides content found for Week {}", Self::week(request)),
        };
        Some(AppError::NoContext { message })
    }

    fn prompt(&self, request: &ArtifactRequest, context: &str) -> Vec<ChatMessage> {
        let heading = if request.parameters.lecture.is_some() {
            "Please summarize the following lecture:"
        } else {
            "Slides content:"
        };
        self.messages(request, &format!("{heading}\n\n{context}"))
    }

    fn fallback_prompt(&self, request: &ArtifactRequest) -> Vec<ChatMessage> {
        self.messages(
            request,
            &format!(
                "Summarize what {} of an introductory machine learning course typically covers.",
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
                message: "model returned an empty summary".into(),
            });
        }

        let source = gathered
            .sources()
            .into_iter()
            .next()
            .unwrap_or_else(|| Self::source(request));
        Ok(Artifact::Summary(SummaryDocument {
            week: Self::week(request),
            lecture: request.parameters.lecture,
            source,
            markdown: markdown.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe() -> SummaryRecipe {
        SummaryRecipe::new(WorkerConfig::default())
    }

    fn request(week: Option<u32>, lecture: Option<u32>) -> ArtifactRequest {
        ArtifactRequest::new(ArtifactKind::Summary, "ignored").with_parameters(ArtifactParameters {
            week,
            lecture,
            num_questions: Some(9),
            ..Default::default()
        })
    }

    #[test]
    fn test_normalize_requires_week() {
        let err = recipe().normalize(request(None, Some(1))).unwrap_err();
        assert!(matches!(err, AppError::MissingField { .. }));
        assert!(recipe().normalize(request(Some(0), None)).is_err());

        let normalized = recipe().normalize(request(Some(3), Some(2))).unwrap();
        assert_eq!(normalized.topic, "Week 3 Lecture 2");
        assert_eq!(normalized.parameters.num_questions, None);
    }

    #[test]
    fn test_lecture_plan_scans_transcript() {
        let req = recipe().normalize(request(Some(3), Some(2))).unwrap();
        let plan = recipe().plan(&req);
        assert_eq!(
            plan.steps,
            [RetrievalStep::Scan {
                filter: MetadataFilter::source("Week_3_Lecture_2.pdf"),
                limit: 10,
            }]
        );
    }

    #[test]
    fn test_week_plan_falls_back_to_week_metadata() {
        let req = recipe().normalize(request(Some(4), None)).unwrap();
        let plan = recipe().plan(&req);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(
            plan.steps[0],
            RetrievalStep::Scan {
                filter: MetadataFilter::source("MLP Week 4 Slides.pdf"),
                limit: 10,
            }
        );
        assert_eq!(
            plan.steps[1],
            RetrievalStep::Scan {
                filter: MetadataFilter::week(4),
                limit: 10,
            }
        );
    }

    #[test]
    fn test_no_context_messages() {
        let lecture = recipe().normalize(request(Some(2), Some(9))).unwrap();
        assert_eq!(
            recipe().no_context(&lecture).unwrap().to_string(),
            "No transcript found for Week 2, Lecture 9"
        );
        let week = recipe().normalize(request(Some(12), None)).unwrap();
        assert_eq!(
            recipe().no_context(&week).unwrap().to_string(),
            "No slides content found for Week 12"
        );
    }
}
