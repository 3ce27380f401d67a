pub mod classifier;
pub mod fetcher;
pub mod formatter;
pub mod retry;
pub mod scheduler;
pub mod session;

pub use classifier::{classify_quantities, CycleClassifier, Transition};
pub use fetcher::ItemFetcher;
pub use formatter::{Message, NotificationFormatter};
pub use retry::{RetryFailure, RetryPolicy};
pub use scheduler::{CycleReport, PollScheduler, SchedulerState};
pub use session::SessionManager;
