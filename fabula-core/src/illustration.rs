//! Illustration generation with an always-succeeding fallback chain.
//!
//! Strategies are tried in order; each failure is logged and the next
//! strategy runs. When every strategy has failed the chain answers with a
//! placeholder image URL, which cannot fail. There is no retry within a
//! strategy.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::error::IllustrationError;

// ---------------------------------------------------------------------------
// Image types
// ---------------------------------------------------------------------------

/// Where an image can be loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    /// Image bytes returned inline by a model.
    Inline {
        mime_type: String,
        #[serde(with = "crate::types::base64_bytes")]
        data: Vec<u8>,
    },
    /// An image to fetch from a URL.
    Remote { url: String },
}

impl ImageRef {
    /// Render as something an `<img src>` or a browser accepts.
    pub fn to_data_url(&self) -> String {
        match self {
            ImageRef::Inline { mime_type, data } => {
                format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
            }
            ImageRef::Remote { url } => url.clone(),
        }
    }

    /// File extension matching an inline image's mime type.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            ImageRef::Inline { mime_type, .. } => Some(match mime_type.as_str() {
                "image/jpeg" | "image/jpg" => "jpg",
                "image/webp" => "webp",
                "image/gif" => "gif",
                _ => "png",
            }),
            ImageRef::Remote { .. } => None,
        }
    }
}

/// Which link of the chain produced an illustration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IllustrationSource {
    Generated { strategy: String },
    Placeholder,
}

/// The chain's result, attached to a narrator turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Illustration {
    pub image: ImageRef,
    pub source: IllustrationSource,
}

impl Illustration {
    pub fn is_placeholder(&self) -> bool {
        self.source == IllustrationSource::Placeholder
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// One fallible way of turning a prompt into an image.
#[async_trait]
pub trait ImageStrategy: Send + Sync {
    /// Strategy name for logging.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<ImageRef, IllustrationError>;
}

/// The terminal link: a placeholder image service URL with a freshness token.
#[derive(Debug, Clone)]
pub struct PlaceholderSource {
    base_url: String,
}

impl PlaceholderSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Placeholder for the given instant.
    pub fn image_at(&self, now: DateTime<Utc>) -> ImageRef {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        ImageRef::Remote {
            url: format!(
                "{}{}random={}",
                self.base_url,
                separator,
                now.timestamp_millis()
            ),
        }
    }

    pub fn image(&self) -> ImageRef {
        self.image_at(Utc::now())
    }
}

impl Default for PlaceholderSource {
    fn default() -> Self {
        Self::new("https://picsum.photos/800/600")
    }
}

// ---------------------------------------------------------------------------
// FallbackChain
// ---------------------------------------------------------------------------

/// Tries image strategies in order and falls back to a placeholder.
pub struct FallbackChain {
    strategies: Vec<Arc<dyn ImageStrategy>>,
    terminal: PlaceholderSource,
}

impl FallbackChain {
    /// Strategies are tried in the order given.
    pub fn new(strategies: Vec<Arc<dyn ImageStrategy>>, terminal: PlaceholderSource) -> Self {
        Self {
            strategies,
            terminal,
        }
    }

    /// A chain with no generators: always the placeholder.
    pub fn placeholder_only(terminal: PlaceholderSource) -> Self {
        Self::new(Vec::new(), terminal)
    }

    /// Number of fallible strategies ahead of the placeholder.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Produce an illustration for `prompt`. Never fails.
    pub async fn generate(&self, prompt: &str) -> Illustration {
        for (i, strategy) in self.strategies.iter().enumerate() {
            debug!(strategy_index = i, strategy = strategy.name(), "Trying image strategy");
            match strategy.generate(prompt).await {
                Ok(image) => {
                    return Illustration {
                        image,
                        source: IllustrationSource::Generated {
                            strategy: strategy.name().to_string(),
                        },
                    };
                }
                Err(e) => {
                    warn!(
                        strategy_index = i,
                        strategy = strategy.name(),
                        error = %e,
                        "Image strategy failed, trying next"
                    );
                }
            }
        }

        Illustration {
            image: self.terminal.image(),
            source: IllustrationSource::Placeholder,
        }
    }
}

// ---------------------------------------------------------------------------
// Mock
// ---------------------------------------------------------------------------

/// A mock image strategy that either returns a tiny PNG or fails.
pub struct MockImageStrategy {
    name: String,
    succeed: bool,
    call_count: AtomicUsize,
}

impl MockImageStrategy {
    /// A strategy that returns an inline image.
    pub fn succeeding(name: &str) -> Self {
        Self {
            name: name.to_string(),
            succeed: true,
            call_count: AtomicUsize::new(0),
        }
    }

    /// A strategy that always fails.
    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            succeed: false,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Number of times `generate` was called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// The eight-byte PNG signature; enough to stand in for an image.
    pub fn sample_image() -> ImageRef {
        ImageRef::Inline {
            mime_type: "image/png".to_string(),
            data: vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
        }
    }
}

#[async_trait]
impl ImageStrategy for MockImageStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _prompt: &str) -> Result<ImageRef, IllustrationError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if self.succeed {
            Ok(Self::sample_image())
        } else {
            Err(IllustrationError::GenerationFailed {
                strategy: self.name.clone(),
                message: "mock image failure".into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_primary_success_skips_the_rest() {
        let primary = Arc::new(MockImageStrategy::succeeding("primary"));
        let secondary = Arc::new(MockImageStrategy::succeeding("secondary"));
        let chain = FallbackChain::new(
            vec![primary.clone(), secondary.clone()],
            PlaceholderSource::default(),
        );

        let illustration = chain.generate("a fox").await;
        assert_eq!(
            illustration.source,
            IllustrationSource::Generated {
                strategy: "primary".into()
            }
        );
        assert_eq!(primary.call_count(), 1);
        assert_eq!(secondary.call_count(), 0);
    }

    #[tokio::test]
    async fn test_falls_through_to_secondary() {
        let primary = Arc::new(MockImageStrategy::failing("primary"));
        let secondary = Arc::new(MockImageStrategy::succeeding("secondary"));
        let chain = FallbackChain::new(
            vec![primary.clone(), secondary.clone()],
            PlaceholderSource::default(),
        );

        let illustration = chain.generate("a fox").await;
        assert_eq!(
            illustration.source,
            IllustrationSource::Generated {
                strategy: "secondary".into()
            }
        );
        assert_eq!(illustration.image, MockImageStrategy::sample_image());
        assert_eq!(primary.call_count(), 1);
        assert_eq!(secondary.call_count(), 1);
    }

    #[tokio::test]
    async fn test_all_fail_yields_placeholder() {
        let primary = Arc::new(MockImageStrategy::failing("primary"));
        let secondary = Arc::new(MockImageStrategy::failing("secondary"));
        let chain = FallbackChain::new(
            vec![primary.clone(), secondary.clone()],
            PlaceholderSource::new("https://img.test/800/600"),
        );

        let illustration = chain.generate("a fox").await;
        assert!(illustration.is_placeholder());
        match illustration.image {
            ImageRef::Remote { url } => assert!(url.starts_with("https://img.test/800/600?random=")),
            other => panic!("Expected remote placeholder, got {:?}", other),
        }
        // One attempt each, no retries.
        assert_eq!(primary.call_count(), 1);
        assert_eq!(secondary.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_chain_is_placeholder() {
        let chain = FallbackChain::placeholder_only(PlaceholderSource::default());
        assert!(chain.is_empty());
        assert!(chain.generate("anything").await.is_placeholder());
    }

    #[test]
    fn test_placeholder_freshness_token() {
        let source = PlaceholderSource::new("https://picsum.photos/800/600");
        let t = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(
            source.image_at(t),
            ImageRef::Remote {
                url: "https://picsum.photos/800/600?random=1700000000123".into()
            }
        );

        let with_query = PlaceholderSource::new("https://img.test/x?grayscale");
        match with_query.image_at(t) {
            ImageRef::Remote { url } => assert!(url.ends_with("?grayscale&random=1700000000123")),
            other => panic!("Expected remote placeholder, got {:?}", other),
        }
    }

    #[test]
    fn test_inline_data_url() {
        let image = ImageRef::Inline {
            mime_type: "image/png".into(),
            data: vec![1, 2, 3],
        };
        assert_eq!(image.to_data_url(), "data:image/png;base64,AQID");
        assert_eq!(image.extension(), Some("png"));

        let jpeg = ImageRef::Inline {
            mime_type: "image/jpeg".into(),
            data: vec![],
        };
        assert_eq!(jpeg.extension(), Some("jpg"));
    }

    #[test]
    fn test_illustration_serde() {
        let illustration = Illustration {
            image: MockImageStrategy::sample_image(),
            source: IllustrationSource::Generated {
                strategy: "imagen".into(),
            },
        };
        let json = serde_json::to_value(&illustration).unwrap();
        assert_eq!(json["image"]["kind"], "inline");
        assert_eq!(json["source"]["strategy"], "imagen");
        let back: Illustration = serde_json::from_value(json).unwrap();
        assert_eq!(back, illustration);
    }
}
