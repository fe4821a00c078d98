pub mod dedup;
pub mod fetch;
pub mod poller;

pub use dedup::{DedupVerdict, DeduplicationGate};
pub use fetch::{ContentFetcher, FetchOutcome, SourceFetcher};
pub use poller::{PollSummary, SourcePoller};
