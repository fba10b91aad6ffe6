pub mod config;
mod delivery;
mod error;
pub mod logging;
mod message;
mod phase;
mod progress;
mod reporter;
mod scheduler;
mod transport;

pub const APP_NAME: &str = "jobwatch";

pub use delivery::DeliveryPolicy;
pub use error::{Error, Result};
pub use message::StatusMessage;
pub use phase::{JobKind, Phase, STATUS_NONE};
pub use progress::{
    ChangeCounts, ChangeSummary, Counts, ProgressCounters, ProgressSnapshot, ProgressSource,
    Totals,
};
pub use reporter::{JobContext, Reporter, ReporterOptions};
pub use scheduler::Ticker;
pub use transport::{HttpTransport, InMemoryTransport, Transport};
