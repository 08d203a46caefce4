use crate::event::{Event, MessageType};
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    Disconnected,
    #[error("api call `{action}` failed with retcode {retcode}")]
    Api { action: String, retcode: i64 },
    #[error("action `{0}` is not supported by this transport")]
    Unsupported(String),
    #[error("transport failure: {0}")]
    Other(String),
}

/// 发送选项
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    /// 是否 @ 发送者，对私聊不起作用
    pub at_sender: bool,
    /// 群聊 / 讨论组中改为私聊发送者
    pub ensure_private: bool,
    /// 发送失败时忽略错误
    pub ignore_failure: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            at_sender: false,
            ensure_private: false,
            ignore_failure: true,
        }
    }
}

impl SendOptions {
    pub fn strict() -> Self {
        Self {
            ignore_failure: false,
            ..Self::default()
        }
    }
}

/// 消息发送通道
///
/// 由协议适配器实现，框架只通过它向事件所在的上下文回复消息。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        event: &Event,
        message: &str,
        options: &SendOptions,
    ) -> Result<Value, TransportError>;

    /// 调用 OneBot API，如 `.handle_quick_operation_async`
    async fn call_action(&self, action: &str, _params: Value) -> Result<Value, TransportError> {
        Err(TransportError::Unsupported(action.to_string()))
    }
}

/// 只把消息写进日志的发送通道，未配置适配器时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(
        &self,
        event: &Event,
        message: &str,
        _options: &SendOptions,
    ) -> Result<Value, TransportError> {
        crate::info!(target: "transport", "-> {}: {}", event.source_label(), message);
        Ok(Value::Null)
    }

    async fn call_action(&self, action: &str, params: Value) -> Result<Value, TransportError> {
        crate::info!(target: "transport", "调用 {}: {}", action, params);
        Ok(Value::Null)
    }
}

/// 发送消息到事件所在的上下文
///
/// `ignore_failure` 为真时吞掉发送错误并返回 `Ok(None)`。
pub async fn send(
    transport: &dyn Transport,
    event: &Event,
    message: &str,
    options: &SendOptions,
) -> Result<Option<Value>, TransportError> {
    let result = if options.ensure_private && event.message_type != MessageType::Private {
        let mut private = event.clone();
        private.message_type = MessageType::Private;
        private.group_id = None;
        private.discuss_id = None;
        transport.send(&private, message, options).await
    } else {
        transport.send(event, message, options).await
    };

    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if options.ignore_failure => {
            crate::warn!(target: "transport", "发送消息失败（已忽略）: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
