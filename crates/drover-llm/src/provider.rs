use crate::error::LlmError;

/// Text-generation collaborator consumed by the hybrid enrichment path.
///
/// Treated as unreliable and slow: callers must degrade gracefully when
/// `generate` fails rather than failing their own operation.
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt`, optionally guided by a system
    /// prompt, bounded by `max_tokens`.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider cannot be reached or produces an
    /// invalid response.
    fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: u32,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;

    fn name(&self) -> &'static str;
}
