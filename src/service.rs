use crate::config::AppConfig;
use crate::error::RelayError;
use crate::protocol::canonical::{
    AggregateResult, ChatMessage, GeneratedImage, GenerationRequest, ImageRequest,
};
use crate::provider::{InferenceProvider, WorkersAiProvider};
use crate::stream::ProgressSink;

pub const DEFAULT_SERVICE: &str = "cloudflare";

const IMAGE_DIMENSION_RANGE: std::ops::RangeInclusive<u32> = 256..=2048;
const IMAGE_STEPS_RANGE: std::ops::RangeInclusive<u32> = 1..=20;
const DEFAULT_IMAGE_DIMENSION: u32 = 2048;

/// Prompt as received from the command layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptInput {
    /// A bare user prompt; sent after an empty system turn.
    Text(String),
    /// A full conversation, first turn treated as the system slot.
    Messages(Vec<ChatMessage>),
}

impl From<&str> for PromptInput {
    fn from(prompt: &str) -> Self {
        PromptInput::Text(prompt.to_string())
    }
}

impl From<String> for PromptInput {
    fn from(prompt: String) -> Self {
        PromptInput::Text(prompt)
    }
}

impl From<Vec<ChatMessage>> for PromptInput {
    fn from(messages: Vec<ChatMessage>) -> Self {
        PromptInput::Messages(messages)
    }
}

#[derive(Debug, Clone)]
pub struct TextGenerationArgs {
    pub prompt: PromptInput,
    pub model: Option<String>,
    pub service: Option<String>,
}

impl TextGenerationArgs {
    #[must_use]
    pub fn new(prompt: impl Into<PromptInput>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            service: None,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageGenerationArgs {
    pub prompt: String,
    pub model: Option<String>,
    pub service: Option<String>,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub num_steps: Option<u32>,
}

/// Entry point used by the chat command layer.
///
/// Resolves the service selector and model defaults, shapes the request and
/// hands it to the configured provider.
pub struct GenerationService<P = WorkersAiProvider> {
    provider: P,
    provider_name: String,
    default_text_model: String,
    default_image_model: String,
    max_tokens: u32,
}

impl GenerationService<WorkersAiProvider> {
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self, RelayError> {
        Ok(Self::new(WorkersAiProvider::from_config(config)?, config))
    }
}

impl<P: InferenceProvider> GenerationService<P> {
    #[must_use]
    pub fn new(provider: P, config: &AppConfig) -> Self {
        Self {
            provider,
            provider_name: config.provider.name.clone(),
            default_text_model: config.provider.default_text_model.clone(),
            default_image_model: config.provider.default_image_model.clone(),
            max_tokens: config.generation.max_tokens,
        }
    }

    /// Stream a text generation, reporting progress to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] for an unknown service or an
    /// empty prompt, otherwise whatever the provider returns.
    pub async fn generate_text<S: ProgressSink>(
        &self,
        args: TextGenerationArgs,
        sink: S,
    ) -> Result<AggregateResult, RelayError> {
        self.check_service(args.service.as_deref())?;
        let messages = match args.prompt {
            PromptInput::Text(prompt) => {
                if prompt.trim().is_empty() {
                    return Err(RelayError::InvalidRequest("prompt is empty".to_string()));
                }
                vec![ChatMessage::system(""), ChatMessage::user(prompt)]
            }
            PromptInput::Messages(messages) => {
                if messages.is_empty() {
                    return Err(RelayError::InvalidRequest(
                        "message list is empty".to_string(),
                    ));
                }
                messages
            }
        };
        let model = resolve_model(args.model, &self.default_text_model);
        let request = GenerationRequest::new(messages, model, self.max_tokens);
        self.provider.generate_text(request, sink).await
    }

    /// Render an image from a prompt.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] for an unknown service, an
    /// empty prompt or out-of-range options, otherwise whatever the provider
    /// returns.
    pub async fn generate_image(
        &self,
        args: ImageGenerationArgs,
    ) -> Result<GeneratedImage, RelayError> {
        self.check_service(args.service.as_deref())?;
        if args.prompt.trim().is_empty() {
            return Err(RelayError::InvalidRequest("prompt is empty".to_string()));
        }
        let height = check_range("height", args.height, &IMAGE_DIMENSION_RANGE)?
            .unwrap_or(DEFAULT_IMAGE_DIMENSION);
        let width = check_range("width", args.width, &IMAGE_DIMENSION_RANGE)?
            .unwrap_or(DEFAULT_IMAGE_DIMENSION);
        let num_steps = check_range("num_steps", args.num_steps, &IMAGE_STEPS_RANGE)?;

        let request = ImageRequest {
            prompt: args.prompt,
            model: resolve_model(args.model, &self.default_image_model),
            height,
            width,
            num_steps,
        };
        self.provider.generate_image(&request).await
    }

    fn check_service(&self, service: Option<&str>) -> Result<(), RelayError> {
        let service = service
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SERVICE);
        if service.eq_ignore_ascii_case(&self.provider_name) {
            Ok(())
        } else {
            Err(RelayError::InvalidRequest(format!(
                "unknown service '{service}'"
            )))
        }
    }
}

fn resolve_model(model: Option<String>, default: &str) -> String {
    model
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn check_range(
    name: &str,
    value: Option<u32>,
    range: &std::ops::RangeInclusive<u32>,
) -> Result<Option<u32>, RelayError> {
    match value {
        Some(v) if !range.contains(&v) => Err(RelayError::InvalidRequest(format!(
            "{name} must be between {} and {}, got {v}",
            range.start(),
            range.end()
        ))),
        other => Ok(other),
    }
}
