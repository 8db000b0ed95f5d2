//! Study suggestions for questions a student answered incorrectly

use lectern_common::config::WorkerConfig;
use lectern_common::errors::{AppError, Result};
use lectern_common::llm::ChatMessage;
use serde::{Deserialize, Serialize};

use super::schema::parse_as;
use super::worker::{Gather, Gathered, Recipe, RetrievalPlan, RetrievalStep};
use super::{Artifact, ArtifactKind, ArtifactParameters, ArtifactRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSuggestion {
    pub topic: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionSet {
    pub overall_assessment: String,
    #[serde(default)]
    pub topic_suggestions: Vec<TopicSuggestion>,
    #[serde(default)]
    pub general_tips: Vec<String>,
}

impl SuggestionSet {
    /// Reply for a student with nothing to review
    pub fn all_correct() -> Self {
        Self {
            overall_assessment: "All questions were answered correctly. Great job!".to_string(),
            topic_suggestions: Vec::new(),
            general_tips: vec!["Continue practicing to maintain your knowledge.".to_string()],
        }
    }
}

const REVIEW_TOPIC: &str = "review";

const SUGGESTIONS_TASK: &str = "\
YOUR TASK:
1. Identify the specific Machine Learning concepts each missed question tests
2. Explain what the student most likely misunderstood
3. Recommend focused study actions for each concept

Focus ONLY on the concepts in these specific questions.

FORMAT AS VALID JSON:
{
  \"overall_assessment\": \"Brief analysis of the student's knowledge gaps\",
  \"topic_suggestions\": [
    {
      \"topic\": \"Concept name\",
      \"suggestions\": [\"Specific study suggestion\", \"Another suggestion\"]
    }
  ],
  \"general_tips\": [\"Study tip relevant to these concepts\"]
}";

pub(crate) struct SuggestionsRecipe {
    config: WorkerConfig,
}

impl SuggestionsRecipe {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    fn messages(&self, request: &ArtifactRequest, references: Option<&str>) -> Vec<ChatMessage> {
        let questions: String = request
            .parameters
            .wrong_questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("QUESTION {}:\n{}\n\n", i + 1, q))
            .collect();

        let mut prompt = format!(
            "You are an expert Machine Learning education advisor analyzing questions a student \
             answered incorrectly. Give targeted study suggestions.\n\n\
             QUESTIONS THE STUDENT MISSED:\n{questions}"
        );
        if let Some(references) = references {
            prompt.push_str(&format!("REFERENCE MATERIALS:\n{references}\n\n"));
        }
        prompt.push_str(SUGGESTIONS_TASK);
        vec![ChatMessage::user(prompt)]
    }
}

impl Recipe for SuggestionsRecipe {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Suggestions
    }

    fn normalize(&self, request: ArtifactRequest) -> Result<ArtifactRequest> {
        let wrong_questions = request
            .parameters
            .wrong_questions
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect();

        Ok(ArtifactRequest {
            kind: ArtifactKind::Suggestions,
            topic: REVIEW_TOPIC.to_string(),
            parameters: ArtifactParameters {
                wrong_questions,
                ..Default::default()
            },
        })
    }

    fn short_circuit(&self, request: &ArtifactRequest) -> Option<Artifact> {
        request
            .parameters
            .wrong_questions
            .is_empty()
            .then(|| Artifact::Suggestions(SuggestionSet::all_correct()))
    }

    fn plan(&self, request: &ArtifactRequest) -> RetrievalPlan {
        let steps = request
            .parameters
            .wrong_questions
            .iter()
            .map(|q| RetrievalStep::Similar {
                query: q.clone(),
                k: self.config.suggestions_k_per_question,
                filter: None,
            })
            .collect();

        RetrievalPlan {
            steps,
            gather: Gather::All,
            max_chunks: None,
            chunk_separator: "\n",
            group_separator: "\n\n---\n\n",
            max_context_chars: Some(self.config.suggestions_max_context_chars),
        }
    }

    fn prompt(&self, request: &ArtifactRequest, context: &str) -> Vec<ChatMessage> {
        let references = (!context.trim().is_empty()).then_some(context);
        self.messages(request, references)
    }

    fn fallback_prompt(&self, request: &ArtifactRequest) -> Vec<ChatMessage> {
        self.messages(request, None)
    }

    fn structured(&self) -> bool {
        true
    }

    fn parse(&self, _request: &ArtifactRequest, raw: &str, _gathered: &Gathered) -> Result<Artifact> {
        let mut set: SuggestionSet = parse_as(raw)?;
        set.overall_assessment = set.overall_assessment.trim().to_string();
        if set.overall_assessment.is_empty() {
            return Err(AppError::SchemaParse {
                message: "overall_assessment is empty".into(),
            });
        }
        set.topic_suggestions.retain(|t| !t.topic.trim().is_empty());
        Ok(Artifact::Suggestions(set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recipe() -> SuggestionsRecipe {
        SuggestionsRecipe::new(WorkerConfig::default())
    }

    fn request(questions: &[&str]) -> ArtifactRequest {
        let req = ArtifactRequest::new(ArtifactKind::Suggestions, "anything").with_parameters(
            ArtifactParameters {
                wrong_questions: questions.iter().map(|q| q.to_string()).collect(),
                week: Some(2),
                ..Default::default()
            },
        );
        recipe().normalize(req).unwrap()
    }

    #[test]
    fn test_blank_questions_short_circuit() {
        let req = request(&["  ", ""]);
        assert_eq!(req.topic, "review");
        assert_eq!(req.parameters.week, None);

        let Some(Artifact::Suggestions(set)) = recipe().short_circuit(&req) else {
            panic!("expected congratulatory suggestions");
        };
        assert_eq!(set, SuggestionSet::all_correct());
        assert!(set.topic_suggestions.is_empty());
    }

    #[test]
    fn test_plan_has_one_step_per_question() {
        let req = request(&["What is overfitting?", " Define recall "]);
        assert!(recipe().short_circuit(&req).is_none());

        let plan = recipe().plan(&req);
        assert_eq!(plan.gather, Gather::All);
        assert_eq!(plan.group_separator, "\n\n---\n\n");
        assert_eq!(plan.max_context_chars, Some(5000));
        assert_eq!(
            plan.steps[1],
            RetrievalStep::Similar {
                query: "Define recall".into(),
                k: 3,
                filter: None,
            }
        );
    }

    #[test]
    fn test_prompt_numbers_questions() {
        let req = request(&["What is overfitting?", "Define recall"]);
        let with_refs = &recipe().prompt(&req, "bias variance")[0].content;
        assert!(with_refs.contains("QUESTION 1:\nWhat is overfitting?\n\nQUESTION 2:\nDefine recall"));
        assert!(with_refs.contains("REFERENCE MATERIALS:\nbias variance"));

        let without = &recipe().fallback_prompt(&req)[0].content;
        assert!(!without.contains("REFERENCE MATERIALS"));
        assert!(without.contains("Focus ONLY on the concepts in these specific questions."));
    }

    #[test]
    fn test_parse_requires_assessment() {
        let req = request(&["What is overfitting?"]);
        let raw = json!({
            "overall_assessment": "Review regularisation.",
            "topic_suggestions": [{"topic": "Overfitting", "suggestions": ["Redo week 3 exercises"]}],
        })
        .to_string();
        let Artifact::Suggestions(set) = recipe().parse(&req, &raw, &Gathered::default()).unwrap() else {
            panic!("expected suggestions");
        };
        assert_eq!(set.topic_suggestions[0].topic, "Overfitting");
        assert!(set.general_tips.is_empty());

        let err = recipe()
            .parse(&req, r#"{"overall_assessment": " "}"#, &Gathered::default())
            .unwrap_err();
        assert!(matches!(err, AppError::SchemaParse { .. }));
    }
}
