//! Batched LLM-backed comment classification.
//!
//! One request per batch against a local OpenAI-compatible chat endpoint
//! (LM-Studio shape): numbered comment lines in, one `N:label` line per
//! comment out, parsed positionally. A batch that fails — connection error,
//! bad status, short or unparsable response — is retried exactly once and
//! then degraded to the task's fallback label; a bad batch never aborts the
//! run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use chanwatch_core::{Analyzer, StanceLabel, ToxicityLabel, Verdict};

use crate::error::AnalysisError;

/// Stamped into every model-backed `AnalysisRecord`.
pub const MODEL_ENGINE_VERSION: &str = "lm-chat/1";

/// Comments are truncated to this many characters in the prompt.
const MAX_PROMPT_CHARS: usize = 300;

/// The classification task submitted to the endpoint.
#[derive(Debug, Clone, Copy)]
pub enum ClassifyTask {
    Toxicity,
    Stance { fallback: StanceLabel },
}

impl ClassifyTask {
    #[must_use]
    pub fn analyzer(self) -> Analyzer {
        match self {
            ClassifyTask::Toxicity => Analyzer::Toxicity,
            ClassifyTask::Stance { .. } => Analyzer::Stance,
        }
    }

    fn header(self) -> &'static str {
        match self {
            ClassifyTask::Toxicity => "Classify the toxicity of each comment.",
            ClassifyTask::Stance { .. } => "Classify the political stance of each comment.",
        }
    }

    fn categories_block(self) -> &'static str {
        match self {
            ClassifyTask::Toxicity => {
                "- toxic (insults, profanity, threats)\n\
                 - friendly (gratitude, praise)\n\
                 - neutral (neutral)"
            }
            ClassifyTask::Stance { .. } => {
                "- pro_ukraine (supporting Ukraine, criticizing Russia)\n\
                 - pro_russia (supporting Russia, criticizing Ukraine)\n\
                 - neutral (neutral stance)"
            }
        }
    }

    fn example_block(self) -> &'static str {
        match self {
            ClassifyTask::Toxicity => "1:toxic\n2:neutral\n3:friendly",
            ClassifyTask::Stance { .. } => "1:pro_ukraine\n2:neutral\n3:pro_russia",
        }
    }

    /// Map a raw label fragment onto a verdict. Unknown words land on
    /// neutral, matching the endpoint contract's leniency for one line
    /// while the line *count* stays strict.
    fn parse_label(self, raw: &str) -> Verdict {
        let lowered = raw.trim().to_lowercase().replace('-', "_");
        match self {
            ClassifyTask::Toxicity => {
                let label = if lowered.contains("toxic") {
                    ToxicityLabel::Toxic
                } else if lowered.contains("friend") {
                    ToxicityLabel::Friendly
                } else {
                    ToxicityLabel::Neutral
                };
                Verdict::Toxicity { label }
            }
            ClassifyTask::Stance { .. } => {
                let label = if lowered.contains("ukr") {
                    StanceLabel::ProUkraine
                } else if lowered.contains("rus") {
                    StanceLabel::ProRussia
                } else {
                    StanceLabel::Neutral
                };
                Verdict::Stance { label }
            }
        }
    }

    /// Verdict assigned to every comment of a batch that failed twice.
    #[must_use]
    pub fn fallback_verdict(self) -> Verdict {
        match self {
            ClassifyTask::Toxicity => Verdict::Toxicity {
                label: ToxicityLabel::Neutral,
            },
            ClassifyTask::Stance { fallback } => Verdict::Stance { label: fallback },
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: usize,
    stop: [&'a str; 4],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    /// Reasoning models may leave `content` empty and answer here.
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Client for the local OpenAI-compatible chat endpoint.
pub struct LmClient {
    client: reqwest::Client,
    base_url: String,
}

impl LmClient {
    /// # Errors
    ///
    /// Returns [`AnalysisError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Startup preflight: the endpoint must answer `/v1/models`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Endpoint`] when the endpoint is unreachable
    /// or reports a non-success status — fatal before any work unit begins.
    pub async fn check_connection(&self) -> Result<(), AnalysisError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            AnalysisError::Endpoint(format!("cannot reach model endpoint at {url}: {e}"))
        })?;
        if !response.status().is_success() {
            return Err(AnalysisError::Endpoint(format!(
                "model endpoint returned status {} — is a model loaded?",
                response.status()
            )));
        }
        let models: ModelsResponse = response.json().await.map_err(|e| {
            AnalysisError::Endpoint(format!("model endpoint returned unexpected body: {e}"))
        })?;
        tracing::debug!(models = models.data.len(), "model endpoint reachable");
        Ok(())
    }

    /// Submit one batch and return its labels, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Endpoint`] for every failure class the
    /// retry policy covers: connection error, non-success status, and a
    /// response whose parsed line count differs from the input count.
    pub async fn classify_batch(
        &self,
        task: ClassifyTask,
        texts: &[&str],
    ) -> Result<Vec<Verdict>, AnalysisError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = build_prompt(task, texts);
        let request = ChatRequest {
            messages: [ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.1,
            max_tokens: 25 * texts.len(),
            stop: ["\n\n\n", "Comments:", "COMMENTS", "Explanation"],
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::Endpoint(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AnalysisError::Endpoint(format!(
                "endpoint returned status {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Endpoint(format!("response parse error: {e}")))?;

        let answer = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| {
                let message = choice.message;
                message
                    .content
                    .filter(|c| !c.trim().is_empty())
                    .or(message.reasoning)
            })
            .ok_or_else(|| AnalysisError::Endpoint("response carried no answer text".to_string()))?;

        parse_batch_answer(task, &answer, texts.len())
    }
}

fn build_prompt(task: ClassifyTask, texts: &[&str]) -> String {
    let comments: String = texts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}. {}\n", i + 1, truncate_chars(text, MAX_PROMPT_CHARS)))
        .collect();
    let format_lines: String = (1..=texts.len()).map(|i| format!("{i}:category\n")).collect();

    format!(
        "{header}\n\nCOMMENTS:\n{comments}\nCATEGORIES:\n{categories}\n\n\
         Response format (strict):\n{format_lines}\nExample:\n{example}\n\n\
         Your response (NO explanations):",
        header = task.header(),
        categories = task.categories_block(),
        example = task.example_block(),
    )
}

/// Parse `N:label` lines positionally. Preamble chatter is skipped; a line
/// whose left side is not a number is ignored. Anything other than exactly
/// `expected` parsed labels is a shape error for the retry policy.
fn parse_batch_answer(
    task: ClassifyTask,
    answer: &str,
    expected: usize,
) -> Result<Vec<Verdict>, AnalysisError> {
    let mut verdicts = Vec::new();
    for line in answer.lines() {
        let line = line.trim();
        let lowered = line.to_lowercase();
        if lowered.contains("here is") || lowered.contains("analysis") || lowered.contains("based on")
        {
            continue;
        }
        let Some((number, label)) = line.split_once(':') else {
            continue;
        };
        if number.trim().parse::<usize>().is_err() {
            continue;
        }
        verdicts.push(task.parse_label(label));
    }

    if verdicts.len() != expected {
        return Err(AnalysisError::Endpoint(format!(
            "expected {expected} labels, parsed {}",
            verdicts.len()
        )));
    }
    Ok(verdicts)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Outcome of one batch after the retry/fallback policy ran.
#[derive(Debug)]
pub struct BatchOutcome {
    /// (comment id, verdict) in input order.
    pub verdicts: Vec<(String, Verdict)>,
    pub fallback_applied: bool,
}

/// Drives a full work set through the endpoint in consecutive batches.
pub struct BatchClassifier<'a> {
    client: &'a LmClient,
    task: ClassifyTask,
    batch_size: usize,
}

impl<'a> BatchClassifier<'a> {
    #[must_use]
    pub fn new(client: &'a LmClient, task: ClassifyTask, batch_size: usize) -> Self {
        Self {
            client,
            task,
            batch_size: batch_size.max(1),
        }
    }

    #[must_use]
    pub fn task(&self) -> ClassifyTask {
        self.task
    }

    /// Classify one batch with the `Attempting → Retrying → Fallback-Applied`
    /// state machine. Infallible by design: the worst case is the fallback
    /// label for the whole batch.
    pub async fn classify_with_retry(&self, batch: &[(String, String)]) -> BatchOutcome {
        let texts: Vec<&str> = batch.iter().map(|(_, text)| text.as_str()).collect();

        for attempt in 0..2u8 {
            match self.client.classify_batch(self.task, &texts).await {
                Ok(verdicts) => {
                    let verdicts = batch
                        .iter()
                        .zip(verdicts)
                        .map(|((id, _), verdict)| (id.clone(), verdict))
                        .collect();
                    return BatchOutcome {
                        verdicts,
                        fallback_applied: false,
                    };
                }
                Err(e) if attempt == 0 => {
                    tracing::warn!(
                        analyzer = %self.task.analyzer(),
                        batch_len = batch.len(),
                        error = %e,
                        "batch classification failed — retrying once"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        analyzer = %self.task.analyzer(),
                        batch_len = batch.len(),
                        error = %e,
                        "batch retry failed — applying fallback label"
                    );
                }
            }
        }

        let fallback = self.task.fallback_verdict();
        BatchOutcome {
            verdicts: batch
                .iter()
                .map(|(id, _)| (id.clone(), fallback.clone()))
                .collect(),
            fallback_applied: true,
        }
    }

    /// Split the work set into consecutive batches (the last may be smaller).
    #[must_use]
    pub fn batches<'w>(&self, work: &'w [(String, String)]) -> Vec<&'w [(String, String)]> {
        work.chunks(self.batch_size).collect()
    }
}
