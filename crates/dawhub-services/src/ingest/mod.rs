mod coordinator;
mod state;

pub use coordinator::{IngestReceipt, IngestRequest, IngestionCoordinator};
pub use state::IngestState;
