//! Known chat model identifiers.

use crate::Model;

/// Model used when nothing else is configured
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Chat models the default endpoint is known to serve.
pub const KNOWN_MODELS: &[&str] = &[
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-0301",
    "gpt-4",
    "gpt-4-0314",
    "gpt-4-32k",
    "gpt-4-32k-0314",
];

/// Whether `id` is one of [`KNOWN_MODELS`].
pub fn is_known_model(id: &str) -> bool {
    KNOWN_MODELS.contains(&id)
}

/// The default model on the default endpoint.
pub fn default_model() -> Model {
    Model::openai(DEFAULT_MODEL)
}

/// Look up a known model by ID.
pub fn get_model(id: &str) -> Option<Model> {
    is_known_model(id).then(|| Model::openai(id))
}

/// Resolve a model ID, falling back to a custom model on `base_url` for
/// identifiers outside the known list.
pub fn resolve_model(id: &str, base_url: Option<&str>) -> Model {
    let model = get_model(id).unwrap_or_else(|| {
        tracing::debug!("Unknown model '{}', treating as custom", id);
        Model::openai(id)
    });
    match base_url {
        Some(url) => model.with_base_url(url),
        None => model,
    }
}
