pub mod cron_expression;
pub mod error;
pub mod events;
pub mod export;
pub mod handler;
pub mod periodical;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod task_list;
pub mod trigger;
pub mod worker;

pub use cron_expression::CronExpression;
pub use error::{JobError, JobResult};
pub use events::{ChannelSubscriber, EventDispatcher, FnSubscriber, LoggingSubscriber, WorkerEvent, WorkerSubscriber};
pub use export::{CronExport, CronExporter, JsonExporter, DEFAULT_COMMAND_PREFIX};
pub use handler::{FnHandler, MessageHandler, ProcessHandler};
pub use periodical::{Period, PeriodicalExpression};
pub use registry::{Registrable, Registry, SchedulerRegistry, WorkerRegistry};
pub use scheduler::Scheduler;
pub use store::{FailureRecord, JsonFileTaskStore, MemoryTaskStore, StoreSnapshot, TaskRuntime, TaskStore};
pub use task::{FailedTask, Task, TaskState};
pub use task_list::TaskList;
pub use trigger::{Trigger, TriggerCallback, TriggerError, TriggerKind};
pub use worker::{TaskRun, Worker, WorkerOptions, WorkerState};
