//! Commit messages from an OpenAI-compatible chat completions endpoint.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::changes::ChangeSet;
use crate::config::AiConfig;

const SYSTEM_PROMPT: &str = "You are a senior engineer who writes excellent Conventional Commit messages. \
Output must be ONLY the commit message in this exact structure:\n\
<type>(<scope>): <short description>\n\
<optional one extra short line>\n\n\
- <bullet 1>\n- <bullet 2>\n- <bullet 3> (up to 5)\n\
Types allowed: feat, fix, docs, style, refactor, test, chore.";

/// Errors returned by the LLM client.
#[derive(Error, Debug)]
pub enum AiError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    #[error("completion request failed with HTTP {0}")]
    Status(u16),
    #[error("completion request failed: {0}")]
    Transport(String),
    #[error("failed to read completion response: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid completion response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("model returned an empty message")]
    Empty,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the first choice's text from a chat completions response body.
fn parse_completion(body: &str) -> Result<String, AiError> {
    let response: ChatResponse = serde_json::from_str(body)?;
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(AiError::Empty);
    }
    Ok(text)
}

/// Describe the change for the model, including the heuristic draft.
fn build_prompt(changes: &ChangeSet, draft: &str) -> String {
    let mut prompt = String::from("Write a commit message for these changes.\n\n");
    let sections: [(&str, Vec<String>); 4] = [
        ("Added", changes.added.clone()),
        ("Modified", changes.modified.clone()),
        ("Deleted", changes.deleted.clone()),
        (
            "Renamed",
            changes
                .renamed
                .iter()
                .map(|(old, new)| format!("{} -> {}", old, new))
                .collect(),
        ),
    ];
    for (title, files) in sections {
        if files.is_empty() {
            continue;
        }
        prompt.push_str(title);
        prompt.push_str(":\n");
        for file in files {
            prompt.push_str("- ");
            prompt.push_str(&file);
            prompt.push('\n');
        }
    }
    prompt.push_str("\nA rule-based draft, for reference:\n");
    prompt.push_str(draft);
    prompt
}

/// Client for the configured completion endpoint.
pub struct AiClient {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    api_key: String,
}

impl AiClient {
    pub fn new(config: &AiConfig) -> Result<Self, AiError> {
        let api_key = config.api_key.clone().ok_or(AiError::MissingApiKey)?;
        let agent = ureq::builder().timeout(config.timeout).build();
        Ok(Self {
            agent,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Ask the model for a commit message describing `changes`.
    pub fn generate(&self, changes: &ChangeSet, draft: &str) -> Result<String, AiError> {
        let prompt = build_prompt(changes, draft);
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.2,
            max_tokens: 400,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
        };
        let body = serde_json::to_string(&request)?;

        let result = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Content-Type", "application/json")
            .set("User-Agent", "gitpilot")
            .send_string(&body);

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(AiError::Status(code)),
            Err(ureq::Error::Transport(e)) => return Err(AiError::Transport(e.to_string())),
        };

        parse_completion(&response.into_string()?)
    }
}
