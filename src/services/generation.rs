use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::extraction::{extract_typed, Extracted};
use super::llm_provider::{GenerativeProvider, LLMError};
use super::retry::{InvokeError, RetryingInvoker};
use super::ServiceError;

/// A generative call wrapped in retry, followed by structured extraction.
#[derive(Clone)]
pub struct StructuredGenerator {
    llm: Arc<dyn GenerativeProvider>,
    invoker: RetryingInvoker,
}

impl StructuredGenerator {
    pub fn new(llm: Arc<dyn GenerativeProvider>, invoker: RetryingInvoker) -> Self {
        Self { llm, invoker }
    }

    pub fn invoker(&self) -> &RetryingInvoker {
        &self.invoker
    }

    pub async fn generate_text(
        &self,
        label: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ServiceError> {
        let llm = Arc::clone(&self.llm);
        self.invoker
            .invoke_with_cancel(label, cancel, || llm.generate(prompt))
            .await
            .map_err(ServiceError::from)
    }

    /// Quota exhaustion and provider failures are fatal; malformed output is
    /// not, it degrades to `placeholder`.
    pub async fn generate<T, P>(
        &self,
        label: &str,
        prompt: &str,
        required_keys: &[&str],
        placeholder: P,
        cancel: &CancellationToken,
    ) -> Result<Extracted<T>, ServiceError>
    where
        T: DeserializeOwned,
        P: FnOnce() -> T,
    {
        let raw = self.generate_text(label, prompt, cancel).await?;
        let extracted = extract_typed(&raw, required_keys, placeholder);
        if extracted.is_placeholder {
            tracing::warn!(label, "generation produced no usable structure, serving placeholder");
        }
        Ok(extracted)
    }
}

impl From<InvokeError<LLMError>> for ServiceError {
    fn from(err: InvokeError<LLMError>) -> Self {
        match err {
            InvokeError::Exhausted { attempts, .. } => ServiceError::QuotaExhausted { attempts },
            InvokeError::Failed(e) => ServiceError::Generation(e.to_string()),
            InvokeError::Cancelled => ServiceError::Cancelled,
            InvokeError::TimedOut(limit) => ServiceError::TimedOut(limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm_provider::ScriptedProvider;
    use crate::services::retry::RetryConfig;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        question: String,
    }

    fn generator(provider: Arc<ScriptedProvider>, attempts: u32) -> StructuredGenerator {
        StructuredGenerator::new(provider, RetryingInvoker::new(RetryConfig::immediate(attempts)))
    }

    #[tokio::test]
    async fn quota_is_retried_then_extracted() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_err(LLMError::QuotaExhausted("429".into()));
        provider.push_ok(r#"{"question": "Why?"}"#);
        let result = generator(Arc::clone(&provider), 5)
            .generate("q", "prompt", &["question"], || Reply { question: "x".into() }, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.value.question, "Why?");
        assert!(!result.is_placeholder);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_quota_is_fatal() {
        let provider = Arc::new(ScriptedProvider::new());
        for _ in 0..3 {
            provider.push_err(LLMError::QuotaExhausted("429".into()));
        }
        let err = generator(provider, 3)
            .generate("q", "prompt", &["question"], || Reply { question: "x".into() }, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::QuotaExhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn malformed_output_is_not_fatal() {
        let provider = Arc::new(ScriptedProvider::with_responses(["no json here"]));
        let result = generator(provider, 1)
            .generate("q", "prompt", &["question"], || Reply { question: "fallback".into() }, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_placeholder);
        assert_eq!(result.value.question, "fallback");
    }
}
