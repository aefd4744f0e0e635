//! Session configuration

use murmur_ai::{EstimatingTokenCounter, Model, TokenCounter, models};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::render::{IdentityPreprocessor, MarkdownRenderer, QueryPreprocessor, Renderer};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(100);

/// A configuration value that is either fixed or computed at each use.
///
/// Suppliers are called every time the value is needed, so a setting backed
/// by, say, a UI control picks up changes between queries.
pub enum Setting<T> {
    Value(T),
    Supplier(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T: Clone> Setting<T> {
    /// Wrap a zero-argument supplier
    pub fn supplier(f: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Setting::Supplier(Arc::new(f))
    }

    /// Current value
    pub fn get(&self) -> T {
        match self {
            Setting::Value(v) => v.clone(),
            Setting::Supplier(f) => f(),
        }
    }
}

impl<T> From<T> for Setting<T> {
    fn from(value: T) -> Self {
        Setting::Value(value)
    }
}

impl From<&str> for Setting<String> {
    fn from(value: &str) -> Self {
        Setting::Value(value.to_string())
    }
}

impl<T: Clone> Clone for Setting<T> {
    fn clone(&self) -> Self {
        match self {
            Setting::Value(v) => Setting::Value(v.clone()),
            Setting::Supplier(f) => Setting::Supplier(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Setting<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Setting::Supplier(_) => f.write_str("Supplier(..)"),
        }
    }
}

/// Which text a user message's rendered form is produced from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderSource {
    /// The query as typed
    #[default]
    Raw,
    /// The query after preprocessing
    Preprocessed,
}

/// Chat session configuration
#[derive(Clone)]
pub struct ChatConfig {
    /// Model to query
    pub model: Setting<Model>,
    /// System prompt prepended to every request
    pub system_prompt: Setting<String>,
    /// Sampling temperature
    pub temperature: Setting<f32>,
    /// Minimum interval between published stream batches
    pub throttle: Setting<Duration>,
    pub query_preprocessor: Arc<dyn QueryPreprocessor>,
    /// Renders user messages
    pub input_renderer: Arc<dyn Renderer>,
    /// Renders finalized assistant messages
    pub output_renderer: Arc<dyn Renderer>,
    /// Renders the in-flight partial answer
    pub streaming_output_renderer: Arc<dyn Renderer>,
    pub token_counter: Arc<dyn TokenCounter>,
    pub user_render_source: RenderSource,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: Setting::Value(models::default_model()),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            temperature: DEFAULT_TEMPERATURE.into(),
            throttle: DEFAULT_THROTTLE.into(),
            query_preprocessor: Arc::new(IdentityPreprocessor),
            input_renderer: Arc::new(MarkdownRenderer),
            output_renderer: Arc::new(MarkdownRenderer),
            streaming_output_renderer: Arc::new(MarkdownRenderer),
            token_counter: Arc::new(EstimatingTokenCounter),
            user_render_source: RenderSource::Raw,
        }
    }
}

impl ChatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<Setting<Model>>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<Setting<String>>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: impl Into<Setting<f32>>) -> Self {
        self.temperature = temperature.into();
        self
    }

    pub fn with_throttle(mut self, throttle: impl Into<Setting<Duration>>) -> Self {
        self.throttle = throttle.into();
        self
    }

    pub fn with_query_preprocessor(mut self, p: impl QueryPreprocessor + 'static) -> Self {
        self.query_preprocessor = Arc::new(p);
        self
    }

    pub fn with_input_renderer(mut self, r: impl Renderer + 'static) -> Self {
        self.input_renderer = Arc::new(r);
        self
    }

    pub fn with_output_renderer(mut self, r: impl Renderer + 'static) -> Self {
        self.output_renderer = Arc::new(r);
        self
    }

    pub fn with_streaming_output_renderer(mut self, r: impl Renderer + 'static) -> Self {
        self.streaming_output_renderer = Arc::new(r);
        self
    }

    /// Use the same renderer for user, assistant and streaming text
    pub fn with_renderer(self, r: impl Renderer + 'static) -> Self {
        let r: Arc<dyn Renderer> = Arc::new(r);
        Self {
            input_renderer: Arc::clone(&r),
            output_renderer: Arc::clone(&r),
            streaming_output_renderer: r,
            ..self
        }
    }

    pub fn with_token_counter(mut self, counter: impl TokenCounter + 'static) -> Self {
        self.token_counter = Arc::new(counter);
        self
    }

    pub fn with_user_render_source(mut self, source: RenderSource) -> Self {
        self.user_render_source = source;
        self
    }
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt)
            .field("temperature", &self.temperature)
            .field("throttle", &self.throttle)
            .field("user_render_source", &self.user_render_source)
            .finish_non_exhaustive()
    }
}
