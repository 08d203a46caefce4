//! 指令系统：注册、解析、会话与调度

pub mod argfilter;
pub mod dispatch;
pub mod group;
pub mod parser;
pub mod registry;
pub mod session;

pub use argfilter::{ArgFilter, FilterResult, Rejection, ValidateError, handle_cancellation};
pub use dispatch::{CommandOutcome, SessionStore, call_command, handle_command, kill_current_session};
pub use group::CommandGroup;
pub use parser::parse_command;
pub use registry::{Command, CommandBuilder, CommandName, CommandRegistry, Timeout};
pub use session::{CommandResult, CommandSession, DEFAULT_ARGUMENT_KEY, Flow};
