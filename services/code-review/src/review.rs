//! Code review and optimization operations
//!
//! Both operations validate the input, build a language-specific prompt, and
//! run it through the credential-rotating executor. Review returns the model's
//! markdown verbatim; optimize strips a surrounding code fence if the model
//! added one anyway.

use std::sync::Arc;

use key_pool::{Executor, Operation};
use serde::Serialize;
use transport::GenerateRequest;

use crate::error::{Error, Result};

/// A language the prompts know how to talk about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Language {
    pub value: &'static str,
    pub label: &'static str,
}

pub const DEFAULT_LANGUAGE: &str = "javascript";

pub const SUPPORTED_LANGUAGES: &[Language] = &[
    Language { value: "javascript", label: "JavaScript" },
    Language { value: "python", label: "Python" },
    Language { value: "typescript", label: "TypeScript" },
    Language { value: "java", label: "Java" },
    Language { value: "csharp", label: "C#" },
    Language { value: "go", label: "Go" },
    Language { value: "ruby", label: "Ruby" },
    Language { value: "php", label: "PHP" },
    Language { value: "swift", label: "Swift" },
    Language { value: "kotlin", label: "Kotlin" },
    Language { value: "rust", label: "Rust" },
    Language { value: "cpp", label: "C++" },
    Language { value: "html", label: "HTML" },
    Language { value: "css", label: "CSS" },
    Language { value: "sql", label: "SQL" },
    Language { value: "shell", label: "Shell Script" },
];

const REVIEW_TEMPERATURE: f32 = 0.5;
const OPTIMIZE_TEMPERATURE: f32 = 0.3;

/// Look up a language by its identifier, case-insensitively.
pub fn find_language(value: &str) -> Option<&'static Language> {
    let value = value.trim();
    SUPPORTED_LANGUAGES
        .iter()
        .find(|l| l.value.eq_ignore_ascii_case(value))
}

/// Resolve an optional request language, falling back to the default.
pub fn resolve_language(value: Option<&str>) -> Result<&'static Language> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => find_language(DEFAULT_LANGUAGE)
            .ok_or_else(|| Error::UnsupportedLanguage(DEFAULT_LANGUAGE.to_string())),
        Some(v) => find_language(v).ok_or_else(|| Error::UnsupportedLanguage(v.to_string())),
    }
}

fn review_instruction(language: &Language) -> String {
    format!(
        "You are an expert code reviewer. Your goal is to give comprehensive, constructive and \
actionable feedback that helps developers improve their {label} code.

Cover the following areas where they apply:
1. Code quality and readability: naming, structure, comments, consistency.
2. Potential bugs and edge cases: logic errors, unhandled inputs, off-by-one mistakes.
3. Performance: inefficient algorithms, unnecessary work, resource usage.
4. Security: injection, unsafe input handling, leaked secrets.
5. Idiomatic {label}: language conventions and standard library usage.
6. Refactoring suggestions: concrete improvements with short examples.

Format the response as markdown using:
- Headings (for example `## Potential bugs`) for each category of feedback.
- Bullet points for individual findings.
- Fenced code blocks (```{value} ... ```) for examples or references to the submitted code.

If the code is already good, say so and mention any minor improvements.",
        label = language.label,
        value = language.value,
    )
}

fn review_prompt(code: &str, language: &Language) -> String {
    format!(
        "Please review the following {label} code and give detailed feedback following the \
guidelines you were given:\n\n```{value}\n{code}\n```\n",
        label = language.label,
        value = language.value,
    )
}

fn optimize_instruction(language: &Language) -> String {
    format!(
        "You are an expert code optimization AI. Refactor the provided code to improve \
performance, readability and maintainability. Apply clean code principles and {label} best \
practices. If the code is markup (like HTML), also make sure its structure is well-formed and \
semantic.
Return ONLY the optimized code itself. Do not include explanatory text, markdown formatting \
(like ```{value} ... ```), or anything else outside the optimized code. The output must be \
usable directly as source code. Comments inside the code are welcome where they clarify complex \
parts. The optimized {label} code must be fully functional and syntactically correct.",
        label = language.label,
        value = language.value,
    )
}

fn optimize_prompt(code: &str, language: &Language) -> String {
    format!(
        "Please optimize the following {label} code. Follow the system instruction strictly and \
return only the raw optimized code:\n\n```{value}\n{code}\n```",
        label = language.label,
        value = language.value,
    )
}

/// Remove a markdown fence wrapping the whole reply.
///
/// The opening fence may carry a word tag (```rust). Replies that are not a
/// single fenced block are returned trimmed but otherwise untouched.
pub fn strip_code_fence(reply: &str) -> String {
    let trimmed = reply.trim();
    let inner = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"));

    match inner {
        Some(inner) => {
            let body = inner.trim_start_matches(|c: char| c.is_alphanumeric() || c == '_');
            body.trim().to_string()
        }
        None => trimmed.to_string(),
    }
}

/// Runs review and optimize requests through the shared executor.
pub struct Reviewer {
    executor: Arc<Executor>,
    model: String,
}

impl Reviewer {
    pub fn new(executor: Arc<Executor>, model: impl Into<String>) -> Self {
        Self {
            executor,
            model: model.into(),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Review `code` and return markdown feedback.
    pub async fn review_code(
        &self,
        code: &str,
        language: Option<&str>,
        user_key: Option<&str>,
    ) -> Result<String> {
        let (code, language) = validate(code, language)?;
        let request = GenerateRequest::new(&self.model, review_prompt(code, language))
            .with_system_instruction(review_instruction(language))
            .with_temperature(REVIEW_TEMPERATURE);

        self.run(Operation::Review, user_key, request).await
    }

    /// Return an optimized version of `code` with any wrapping fence removed.
    pub async fn optimize_code(
        &self,
        code: &str,
        language: Option<&str>,
        user_key: Option<&str>,
    ) -> Result<String> {
        let (code, language) = validate(code, language)?;
        let request = GenerateRequest::new(&self.model, optimize_prompt(code, language))
            .with_system_instruction(optimize_instruction(language))
            .with_temperature(OPTIMIZE_TEMPERATURE);

        let reply = self.run(Operation::Optimization, user_key, request).await?;
        Ok(strip_code_fence(&reply))
    }

    async fn run(
        &self,
        operation: Operation,
        user_key: Option<&str>,
        request: GenerateRequest,
    ) -> Result<String> {
        let reply = self
            .executor
            .execute(operation, user_key, |bound| {
                let request = request.clone();
                async move { bound.generate(&request).await }
            })
            .await?;
        Ok(reply)
    }
}

fn validate<'a>(code: &'a str, language: Option<&str>) -> Result<(&'a str, &'static Language)> {
    if code.trim().is_empty() {
        return Err(Error::EmptyCode);
    }
    Ok((code, resolve_language(language)?))
}
