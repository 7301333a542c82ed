//! Inference backends.
//!
//! The evaluator never talks to a model directly. It hands a rendered prompt
//! to an [`InferenceBackend`] together with the generation parameters chosen
//! for the variant category. The bundled [`CommandBackend`] is OFFLINE-FIRST:
//! it shells out to a locally installed CLI (llama.cpp, ollama, ...) and never
//! makes network calls itself.

use crate::config::BackendConfig;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that can occur while generating a completion
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("CLI tool not found: {0}")]
    ToolNotFound(String),

    #[error("CLI execution failed: {0}")]
    ExecutionFailed(String),

    #[error("CLI timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid argument template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid response from CLI: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Parameters for one completion
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f64,
}

/// Text produced by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Completion tokens as reported by the backend, if it reports usage
    pub tokens_used: Option<usize>,
}

impl Completion {
    /// Completion without usage information
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_used: None,
        }
    }
}

/// A model that turns prompts into text.
///
/// Calls are assumed non-reentrant, hence `&mut self`.
pub trait InferenceBackend {
    /// Human readable backend name
    fn name(&self) -> &str;

    /// Generate a completion
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot produce a completion.
    fn generate(&mut self, request: &GenerationRequest) -> Result<Completion, BackendError>;
}

/// Backend that runs a local CLI once per prompt
#[derive(Debug, Clone)]
pub struct CommandBackend {
    config: BackendConfig,
    timeout: Duration,
}

impl CommandBackend {
    /// Create a backend with a custom configuration
    #[must_use]
    pub const fn with_config(config: BackendConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    /// Backend for a local ollama model
    #[must_use]
    pub fn ollama(model: &str) -> Self {
        Self {
            config: BackendConfig::ollama(model),
            timeout: Duration::from_secs(300),
        }
    }

    /// Backend for llama.cpp's `llama-cli` with a GGUF model
    #[must_use]
    pub fn llama_cpp(model_path: &str) -> Self {
        Self {
            config: BackendConfig::llama_cpp(model_path),
            timeout: Duration::from_secs(300),
        }
    }

    /// Check if the CLI tool is available
    #[must_use]
    pub fn is_available(&self) -> bool {
        Command::new("which")
            .arg(&self.config.command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    /// Configured timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Expand the argument template for one request.
    ///
    /// The template is split into words before substitution, so the prompt
    /// lands verbatim in a single argument whatever characters it contains.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::InvalidTemplate` if the template cannot be split
    /// into shell words.
    #[allow(clippy::literal_string_with_formatting_args)]
    pub fn build_args(&self, request: &GenerationRequest) -> Result<Vec<String>, BackendError> {
        let words = shell_words::split(&self.config.args_template)
            .map_err(|e| BackendError::InvalidTemplate(e.to_string()))?;
        let max_tokens = request.max_tokens.to_string();
        let temperature = format!("{:.2}", request.temperature);

        Ok(words
            .into_iter()
            .map(|word| {
                word.replace("{max_tokens}", &max_tokens)
                    .replace("{temperature}", &temperature)
                    .replace("{prompt}", &request.prompt)
            })
            .collect())
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Drain a pipe on its own thread so a chatty stream cannot block the child
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Wait for `child` until `deadline`; kill it once the deadline passes
fn wait_until(
    child: &mut Child,
    deadline: Instant,
    timeout: Duration,
) -> Result<std::process::ExitStatus, BackendError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            child.kill().ok();
            child.wait().ok();
            return Err(BackendError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl InferenceBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn generate(&mut self, request: &GenerationRequest) -> Result<Completion, BackendError> {
        if !self.is_available() {
            return Err(BackendError::ToolNotFound(self.config.command.clone()));
        }

        let mut cmd = Command::new(&self.config.command);
        cmd.args(self.build_args(request)?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let deadline = Instant::now() + self.timeout;
        let mut child = cmd.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match wait_until(&mut child, deadline, self.timeout) {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    command = %self.config.command,
                    timeout = ?self.timeout,
                    "Inference command killed"
                );
                return Err(e);
            }
        };

        let response = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            let detail = stderr.lines().last().unwrap_or("non-zero exit status");
            return Err(BackendError::ExecutionFailed(format!(
                "{} ({status}): {detail}",
                self.config.command
            )));
        }

        let text = response.trim().to_string();
        if text.is_empty() {
            return Err(BackendError::InvalidResponse("empty output".to_string()));
        }

        Ok(Completion::text(text))
    }
}

/// Check which local inference CLIs are installed
#[must_use]
pub fn available_backends() -> Vec<String> {
    let mut available = Vec::new();

    if CommandBackend::llama_cpp("model.gguf").is_available() {
        available.push("llama-cli".to_string());
    }

    if CommandBackend::ollama("").is_available() {
        for model in list_ollama_models() {
            available.push(format!("ollama:{model}"));
        }
    }

    available
}

/// List available ollama models
#[must_use]
pub fn list_ollama_models() -> Vec<String> {
    let output = Command::new("ollama").arg("list").output();

    match output {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            stdout
                .lines()
                .skip(1) // header
                .filter_map(|line| line.split_whitespace().next())
                .map(String::from)
                .collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            max_tokens: 64,
            temperature: 0.0,
        }
    }

    fn custom(command: &str, args_template: &str) -> CommandBackend {
        CommandBackend::with_config(
            BackendConfig {
                name: "custom".to_string(),
                command: command.to_string(),
                args_template: args_template.to_string(),
            },
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_ollama_backend_creation() {
        let backend = CommandBackend::ollama("qwen2:0.5b");
        assert_eq!(backend.name(), "ollama:qwen2:0.5b");
        assert_eq!(backend.timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_build_args_expands_all_placeholders() {
        let backend = custom("llm", "-n {max_tokens} --temp {temperature} -p \"{prompt}\"");
        let args = backend.build_args(&request("Book: Tue 3pm")).unwrap();
        assert_eq!(args, vec!["-n", "64", "--temp", "0.00", "-p", "Book: Tue 3pm"]);
    }

    #[test]
    fn test_build_args_keeps_quotes_in_prompt() {
        let backend = custom("llm", "-p \"{prompt}\"");
        let args = backend.build_args(&request("say \"hi\"")).unwrap();
        assert_eq!(args.last().map(String::as_str), Some("say \"hi\""));
    }

    #[test]
    fn test_build_args_rejects_unbalanced_template() {
        let backend = custom("llm", "-p \"{prompt}");
        assert!(matches!(
            backend.build_args(&request("x")),
            Err(BackendError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_build_args_passes_prompt_verbatim() {
        let prompt = "line1\nit's a \\path with \"quotes\"\n";
        for template in ["-p \"{prompt}\"", "-p '{prompt}'", "-p {prompt}"] {
            let backend = custom("llm", template);
            let args = backend.build_args(&request(prompt)).unwrap();
            assert_eq!(args, vec!["-p", prompt], "template {template}");
        }
    }

    #[test]
    fn test_build_args_substitutes_inside_words() {
        let backend = custom("llm", "--opts=n:{max_tokens},t:{temperature}");
        let args = backend.build_args(&request("x")).unwrap();
        assert_eq!(args, vec!["--opts=n:64,t:0.00"]);
    }

    #[test]
    fn test_generate_tool_not_found() {
        let mut backend = custom("this-tool-definitely-does-not-exist-12345", "{prompt}");
        assert!(!backend.is_available());
        let err = backend.generate(&request("test")).unwrap_err();
        assert!(matches!(err, BackendError::ToolNotFound(_)));
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::ToolNotFound("llama-cli".to_string());
        assert!(err.to_string().contains("llama-cli"));

        let err = BackendError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_completion_text_has_no_usage() {
        let completion = Completion::text("ok");
        assert_eq!(completion.text, "ok");
        assert!(completion.tokens_used.is_none());
    }

    #[test]
    fn test_available_backends_does_not_panic() {
        for backend in available_backends() {
            assert!(!backend.is_empty());
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_generate_kills_command_at_deadline() {
        let mut backend = CommandBackend::with_config(
            BackendConfig {
                name: "sleep".to_string(),
                command: "sleep".to_string(),
                args_template: "4".to_string(),
            },
            Duration::from_secs(1),
        );
        let start = Instant::now();
        let err = backend.generate(&request("ignored")).unwrap_err();
        assert!(matches!(err, BackendError::Timeout(t) if t == Duration::from_secs(1)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    #[cfg(unix)]
    fn test_generate_survives_large_stderr() {
        let mut backend = custom(
            "sh",
            "-c \"yes x | head -c 200000 >&2; echo {prompt}\"",
        );
        let completion = backend.generate(&request("done")).unwrap();
        assert_eq!(completion.text, "done");
    }

    #[test]
    #[cfg(unix)]
    fn test_echo_backend_round_trip() {
        let mut backend = custom("echo", "\"{prompt}\"");
        let completion = backend.generate(&request("Booked Tue 3pm")).unwrap();
        assert_eq!(completion.text, "Booked Tue 3pm");
    }
}
