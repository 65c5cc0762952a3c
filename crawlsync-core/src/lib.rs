pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod queue;
pub mod refresh;
pub mod resync;
pub mod sink;

pub use dispatcher::{CrawlDispatcher, DispatchStats, Ingest, JsonLinesIngest};
pub use driver::{Driver, DriverState};
pub use error::{DriverError, EREMOTEIO};
pub use queue::EventQueue;
pub use refresh::{RefreshHandler, RefreshOutcome};
pub use resync::{ResyncReport, ResyncWalker};
pub use sink::NotificationSink;
