// lib.rs
//
// ================================================================================
// Huihua - 会话式指令机器人框架
//
// 架构：OneBot 事件 | 指令会话状态机 | 自然语言意图 | 通知与请求 | 插件化注册 | 原子配置
// ================================================================================

pub mod log;

pub mod bot;
pub mod command;
pub mod config;
pub mod event;
pub mod expression;
pub mod message;
pub mod natural_language;
pub mod notice_request;
pub mod permission;
pub mod transport;

// ============================================================================
// 错误类型
// ============================================================================

/// 框架通用错误类型
pub type BotError = Box<dyn std::error::Error + Send + Sync>;

pub type BotResult<T> = Result<T, BotError>;

pub use bot::{Bot, BotBuilder, Plugin, Registrar};

// ============================================================================
// 预导入
// ============================================================================

pub mod prelude {
    //! 编写插件时常用的类型
    //!
    //! ```ignore
    //! use huihua::prelude::*;
    //! ```

    pub use super::{Bot, BotBuilder, BotError, BotResult, Plugin, Registrar};

    pub use super::command::{
        ArgFilter, Command, CommandGroup, CommandName, CommandOutcome, CommandResult,
        CommandSession, Flow, Rejection, Timeout, ValidateError, handle_cancellation,
    };
    pub use super::config::{AppConfig, ConfigManager, CoreConfig, CoreSettings};
    pub use super::event::{Event, MessageType, PostType};
    pub use super::expression::{Expression, RenderArgs, render};
    pub use super::message::{MessageContext, MessagePreprocessor, PreprocessResult};
    pub use super::natural_language::{IntentCommand, NlProcessor, NlpSession};
    pub use super::notice_request::{EventHandler, EventRegistry, NoticeSession, RequestSession};
    pub use super::permission::{Permission, SenderRoles};
    pub use super::transport::{SendOptions, Transport, TransportError};

    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
}
