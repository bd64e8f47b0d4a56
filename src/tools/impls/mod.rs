mod dry_run;

pub use dry_run::{dry_run_registry, DryRunTool};
