//! Provider traits the agent loop is built against

use async_trait::async_trait;
use std::path::Path;

use crate::{
    error::Result,
    types::{Context, Turn},
};

/// A chat-completion capability: full history plus tool schemas in, one
/// completed model turn out. The returned turn carries either tool calls or
/// final content, and usage counts when the provider reports them.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, context: &Context) -> Result<Turn>;
}

/// A vision capability: a question about one or more images, answered as text.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn explain(
        &self,
        question: &str,
        image_paths: &[&Path],
        system_prompt: &str,
    ) -> Result<String>;
}
