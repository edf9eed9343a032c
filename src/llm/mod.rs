//! Language-model collaborator.
//!
//! - [`litellm`]: the chat-completion client and the [`LlmProvider`] seam
//! - [`rate_limit`]: per-model request limiting, one instance per service
//! - [`review`]: commit review with a deterministic fallback

pub mod litellm;
pub mod rate_limit;
pub mod review;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_MODEL,
};
pub use rate_limit::RateLimiter;
pub use review::{
    build_review_prompt, heuristic_review, ChangeComplexity, CommitReviewer, ReviewConfig,
    ReviewFeedback,
};
