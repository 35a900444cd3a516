pub mod drain;
pub mod pending;
pub mod trigger;
pub mod watcher;

pub use drain::{contains_csv, csv_files, is_csv, DrainDetector, DrainState};
pub use pending::PendingWork;
pub use trigger::{
    run_command, spawn_aggregation_worker, AggregationJob, AggregationTrigger, TriggerError,
};
pub use watcher::{account_for, spawn_dropzone_watcher, Dropzone, Ingest};
