pub mod models;
pub mod orchestrator;
pub mod service;

pub use models::{FeedbackEvent, FeedbackStats, RawFeedback, UserProfile};
pub use service::{FeedbackService, SubmitOutcome, calculate_feedback_stats};
