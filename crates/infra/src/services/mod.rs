//! Application services: the operations behind the command handlers.

pub mod bulk;
pub mod pending_calls;
pub mod run_driver;
pub mod scheduling;
pub mod sender;

pub use bulk::{BulkEnrollmentReport, BulkScheduler, EnrollmentResult, EnrollmentStatus};
pub use pending_calls::PendingCallTracker;
pub use run_driver::{AutomatedRunDriver, SweepReport};
pub use scheduling::ContactSchedulingService;
pub use sender::{DeliveryAttempt, NotificationSenderService};
