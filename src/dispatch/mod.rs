pub mod delivery;
pub mod queue;

pub use delivery::{DeliveryLoop, DeliveryStats};
pub use queue::{dispatch_queue, Dequeued, JobReceiver, JobSender, NotificationJob};
