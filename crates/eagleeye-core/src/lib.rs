pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod interpreter;
pub mod reconciler;
pub mod session;
pub mod supervisor;
pub mod task_log;
pub mod wire;

pub use builder::*;
pub use config::*;
pub use dispatcher::*;
pub use error::*;
pub use extractor::*;
pub use interpreter::*;
pub use reconciler::*;
pub use session::*;
pub use supervisor::*;
pub use task_log::*;
pub use wire::*;

pub type TaskOutcome = eagleeye_types::TaskOutcome<TaskError>;
