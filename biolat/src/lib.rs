//! Block I/O latency histograms.
//!
//! Two handlers correlate request submission and completion and fold the
//! elapsed time into a 64-slot log2 histogram; an [`Aggregator`] drains,
//! prints and resets that histogram every interval. The handlers run in the
//! kernel ([`KernelProbe`]) or in process ([`MonitorSession`]) over the same
//! slot layout from `biolat-common`.

pub mod aggregator;
pub mod config;
pub mod epoch;
pub mod error;
pub mod histogram;
pub mod metrics;
pub mod probe;
pub mod report;
pub mod session;
pub mod table;

pub use aggregator::{Aggregator, HistogramSource, Shutdown};
pub use biolat_common::{bucket_lower_us, bucket_upper_us, compute_bucket, LATENCY_SLOTS};
pub use config::{Cli, OutputFormat};
pub use epoch::{CounterBank, EpochHistogram};
pub use error::SetupError;
pub use histogram::Histogram;
pub use probe::KernelProbe;
pub use report::{BucketRow, Report};
pub use session::{Clock, CompleteOutcome, ManualClock, MonitorSession, RequestHooks};
pub use table::{InFlightTable, RequestId, TrackOutcome};
