//! Multiple-choice quizzes for a topic or an exam scope

use lectern_common::config::WorkerConfig;
use lectern_common::errors::{AppError, Result};
use lectern_common::llm::ChatMessage;
use serde::{Deserialize, Serialize};

use super::schema::parse_as;
use super::worker::{Gathered, Recipe, RetrievalPlan, RetrievalStep};
use super::{Artifact, ArtifactKind, ArtifactParameters, ArtifactRequest};

pub const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McqQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McqSet {
    /// Topic, or the week range for exam scopes
    pub topic: String,
    pub questions: Vec<McqQuestion>,
}

/// Week range covered by an exam scope name
pub fn exam_scope(topic: &str) -> Option<&'static str> {
    match topic.trim().to_ascii_lowercase().as_str() {
        "quiz1" => Some("Weeks 1-4"),
        "quiz2" => Some("Weeks 1-8"),
        "endterm" => Some("Weeks 1-10"),
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawQuestion {
    question: String,
    options: Vec<String>,
    correct_answer: String,
    explanation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawQuiz {
    Wrapped { questions: Vec<RawQuestion> },
    Bare(Vec<RawQuestion>),
}

const MCQ_INSTRUCTIONS: &str = "\
## INSTRUCTIONS:
- Create diverse questions that test deep understanding of Machine Learning concepts
- Include code snippets in question text where they help; not every question needs code
- Format code with ```python blocks and keep it realistic and error-free
- Each question must have exactly 4 options labeled A, B, C, D (include the letter in the option text)
- Exactly one option is correct; correct_answer must repeat that option's text verbatim
- Test understanding rather than memorization

## JSON SCHEMA:
{
  \"questions\": [
    {
      \"question\": \"Question text, potentially including code\",
      \"options\": [\"A. Option 1\", \"B. Option 2\", \"C. Option 3\", \"D. Option 4\"],
      \"correct_answer\": \"A. Option 1\",
      \"explanation\": \"Why the answer is correct\"
    }
  ]
}";

pub(crate) struct McqRecipe {
    config: WorkerConfig,
}

impl McqRecipe {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    fn num_questions(&self, request: &ArtifactRequest) -> usize {
        request
            .parameters
            .num_questions
            .unwrap_or(self.config.default_num_questions)
    }

    fn focus<'a>(&self, request: &'a ArtifactRequest) -> &'a str {
        exam_scope(&request.topic).unwrap_or(&request.topic)
    }

    fn topic_only(&self, request: &ArtifactRequest) -> String {
        format!(
            "Generate questions about {} in Machine Learning.",
            self.focus(request)
        )
    }

    fn messages(&self, request: &ArtifactRequest, context: &str) -> Vec<ChatMessage> {
        let system = format!(
            "You are an expert Machine Learning and Programming instructor. Generate multiple choice questions \
             based on the following context. Each question should have 4 options with only one correct answer.\n\n\
             Context: {context}\n\n\
             Topic focus: {focus}\n\
             Number of questions: {n}\n\n\
             {MCQ_INSTRUCTIONS}",
            focus = self.focus(request),
            n = self.num_questions(request),
        );
        vec![
            ChatMessage::system(system),
            ChatMessage::user(
                "Generate MCQ questions in JSON format. Include some questions with code snippets where appropriate.",
            ),
        ]
    }
}

/// Check one question; a bare letter answer is mapped to its option.
fn validate_question(index: usize, raw: RawQuestion) -> Result<McqQuestion> {
    let invalid = |reason: &str| AppError::SchemaParse {
        message: format!("question {}: {}", index + 1, reason),
    };

    let question = raw.question.trim().to_string();
    if question.is_empty() {
        return Err(invalid("empty question text"));
    }

    let options: Vec<String> = raw.options.iter().map(|o| o.trim().to_string()).collect();
    if options.len() != OPTIONS_PER_QUESTION {
        return Err(invalid(&format!(
            "expected {} options, got {}",
            OPTIONS_PER_QUESTION,
            options.len()
        )));
    }
    if options.iter().any(String::is_empty) {
        return Err(invalid("empty option"));
    }

    let answer = raw.correct_answer.trim();
    let correct_answer = if options.iter().any(|o| o == answer) {
        answer.to_string()
    } else {
        match answer.as_bytes() {
            [letter @ b'A'..=b'D'] | [letter @ b'A'..=b'D', b'.' | b')'] => {
                options[(letter - b'A') as usize].clone()
            }
            _ => return Err(invalid("correct_answer is not one of the options")),
        }
    };

    Ok(McqQuestion {
        question,
        options,
        correct_answer,
        explanation: raw
            .explanation
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty()),
    })
}

impl Recipe for McqRecipe {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Mcq
    }

    fn normalize(&self, request: ArtifactRequest) -> Result<ArtifactRequest> {
        let topic = request.topic.trim();
        if topic.is_empty() {
            return Err(AppError::MissingField {
                field: "topic".to_string(),
            });
        }

        let n = self.num_questions(&request);
        if n == 0 || n > self.config.max_num_questions {
            return Err(AppError::validation(
                "num_questions",
                format!(
                    "num_questions must be between 1 and {}",
                    self.config.max_num_questions
                ),
            ));
        }

        let topic = match exam_scope(topic) {
            Some(_) => topic.to_ascii_lowercase(),
            None => topic.to_string(),
        };
        Ok(ArtifactRequest {
            kind: ArtifactKind::Mcq,
            topic,
            parameters: ArtifactParameters {
                num_questions: Some(n),
                ..Default::default()
            },
        })
    }

    fn plan(&self, request: &ArtifactRequest) -> RetrievalPlan {
        let cap = if exam_scope(&request.topic).is_some() {
            self.config.exam_max_context_chunks
        } else {
            self.config.mcq_max_context_chunks
        };
        let k = (self.num_questions(request) * 2).min(cap).max(1);
        RetrievalPlan::single(RetrievalStep::Similar {
            query: self.focus(request).to_string(),
            k,
            filter: None,
        })
    }

    fn prompt(&self, request: &ArtifactRequest, context: &str) -> Vec<ChatMessage> {
        if context.chars().count() < self.config.min_context_chars {
            return self.fallback_prompt(request);
        }
        self.messages(request, context)
    }

    fn fallback_prompt(&self, request: &ArtifactRequest) -> Vec<ChatMessage> {
        self.messages(request, &self.topic_only(request))
    }

    fn structured(&self) -> bool {
        true
    }

    fn parse(&self, request: &ArtifactRequest, raw: &str, _gathered: &Gathered) -> Result<Artifact> {
        let raw_questions = match parse_as::<RawQuiz>(raw)? {
            RawQuiz::Wrapped { questions } | RawQuiz::Bare(questions) => questions,
        };

        let n = self.num_questions(request);
        if raw_questions.len() < n {
            return Err(AppError::SchemaParse {
                message: format!("expected {} questions, got {}", n, raw_questions.len()),
            });
        }

        let questions = raw_questions
            .into_iter()
            .take(n)
            .enumerate()
            .map(|(i, q)| validate_question(i, q))
            .collect::<Result<Vec<_>>>()?;

        Ok(Artifact::Mcq(McqSet {
            topic: self.focus(request).to_string(),
            questions,
        }))
    }
}
