pub mod backfill;

pub use backfill::{BackfillSettings, BackfillWorker};
