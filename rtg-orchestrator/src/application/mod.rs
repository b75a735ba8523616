//! Report generation use cases

pub mod batch;
pub mod prompt;
pub mod report_runner;
pub mod scheduler;

pub use batch::{BatchGenerator, generate_batch_id, is_valid_target_id, validate_targets};
pub use prompt::{BuiltPrompt, PromptSettings, build_prompt};
pub use report_runner::{BackendChoice, ReportRunner};
pub use scheduler::{ReportScheduler, ScheduleView, SchedulerStats, UpcomingRun};
