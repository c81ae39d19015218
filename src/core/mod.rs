//! 核心编排层：错误、时钟、阶段报告、装配、主控循环与优雅关闭

pub mod builder;
pub mod clock;
pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod state;

pub use builder::WorkflowBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, CycleError, InteractionError, StoreError, TransitionError};
pub use orchestrator::WorkflowOrchestrator;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{CycleReport, Halt, Phase, PhaseReport};
