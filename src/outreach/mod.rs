//! 外联生命周期：状态机与个性化文本

pub mod state_machine;
pub mod template;

pub use state_machine::{MessageGate, OutreachStateMachine, RequestGate, TargetState};
pub use template::{Personalizer, DEFAULT_MESSAGE, DEFAULT_NOTE};
