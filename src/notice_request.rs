//! 通知与请求事件
//!
//! 处理器按事件名订阅，如 `notice`、`notice.group_increase`、`request.friend`。
//! 订阅上级事件名的处理器会收到所有子事件。

use crate::BotResult;
use crate::bot::Bot;
use crate::event::{Event, MessageType, PostType};
use crate::transport::TransportError;
use futures_util::future::{BoxFuture, join_all};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

const QUICK_OPERATION: &str = ".handle_quick_operation_async";

/// 群内的通知与请求回复到群里
fn reply_target(mut event: Event) -> Event {
    if event.group_id.is_some() {
        event.message_type = MessageType::Group;
    }
    event
}

/// 通知事件的会话
#[derive(Clone)]
pub struct NoticeSession {
    bot: Bot,
    event: Event,
}

impl NoticeSession {
    pub fn new(bot: Bot, event: Event) -> Self {
        Self {
            bot,
            event: reply_target(event),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub async fn send(&self, message: &str) -> Result<Option<Value>, TransportError> {
        self.bot.send(&self.event, message).await
    }
}

/// 请求事件的会话，可以同意或拒绝请求
#[derive(Clone)]
pub struct RequestSession {
    bot: Bot,
    event: Event,
}

impl RequestSession {
    pub fn new(bot: Bot, event: Event) -> Self {
        Self {
            bot,
            event: reply_target(event),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub async fn send(&self, message: &str) -> Result<Option<Value>, TransportError> {
        self.bot.send(&self.event, message).await
    }

    /// 同意请求，`remark` 只对好友请求有效
    pub async fn approve(&self, remark: &str) {
        self.operate(json!({ "approve": true, "remark": remark })).await;
    }

    /// 拒绝请求，`reason` 只对加群请求有效
    pub async fn reject(&self, reason: &str) {
        self.operate(json!({ "approve": false, "reason": reason })).await;
    }

    /// 调用失败只记日志
    async fn operate(&self, operation: Value) {
        let params = json!({
            "self_id": self.event.self_id,
            "context": self.event,
            "operation": operation,
        });
        if let Err(e) = self.bot.transport().call_action(QUICK_OPERATION, params).await {
            crate::warn!(target: "request", "处理请求 {} 失败: {}", self.event.name(), e);
        }
    }
}

pub type NoticeHandler =
    Arc<dyn Fn(NoticeSession) -> BoxFuture<'static, BotResult<()>> + Send + Sync>;
pub type RequestHandler =
    Arc<dyn Fn(RequestSession) -> BoxFuture<'static, BotResult<()>> + Send + Sync>;

#[derive(Clone)]
enum HandlerFn {
    Notice(NoticeHandler),
    Request(RequestHandler),
}

/// 通知或请求处理器
pub struct EventHandler {
    pub name: String,
    /// 订阅的事件名
    pub events: Vec<String>,
    func: HandlerFn,
}

impl EventHandler {
    /// 处理通知，默认订阅所有通知
    pub fn on_notice<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(NoticeSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BotResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            events: vec!["notice".to_string()],
            func: HandlerFn::Notice(Arc::new(move |session| Box::pin(handler(session)))),
        }
    }

    /// 处理请求，默认订阅所有请求
    pub fn on_request<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RequestSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BotResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            events: vec!["request".to_string()],
            func: HandlerFn::Request(Arc::new(move |session| Box::pin(handler(session)))),
        }
    }

    /// 只订阅指定类型，如 `group_increase`、`friend`
    pub fn types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let post = match self.func {
            HandlerFn::Notice(_) => "notice",
            HandlerFn::Request(_) => "request",
        };
        let events: Vec<String> = types
            .into_iter()
            .map(|t| format!("{}.{}", post, t.as_ref()))
            .collect();
        if !events.is_empty() {
            self.events = events;
        }
        self
    }

    fn subscribes(&self, event_name: &str) -> bool {
        self.events.iter().any(|e| {
            event_name == e
                || event_name
                    .strip_prefix(e.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }
}

/// 通知与请求处理器注册表
#[derive(Clone, Default)]
pub struct EventRegistry {
    handlers: Vec<Arc<EventHandler>>,
    switches: HashMap<String, bool>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: EventHandler) -> bool {
        if self.handlers.iter().any(|h| h.name == handler.name) {
            crate::warn!(target: "event", "事件处理器 {} 已存在", handler.name);
            return false;
        }
        self.switches.insert(handler.name.clone(), true);
        self.handlers.push(Arc::new(handler));
        true
    }

    pub fn remove_handler(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.name != name);
        self.switches.remove(name);
        self.handlers.len() != before
    }

    /// 开关处理器。`state` 为 `None` 时取反。
    pub fn switch_handler(&mut self, name: &str, state: Option<bool>) {
        if let Some(current) = self.switches.get_mut(name) {
            *current = state.unwrap_or(!*current);
        }
    }

    /// 订阅了该事件名且已启用的处理器
    pub fn subscribers(&self, event_name: &str) -> Vec<Arc<EventHandler>> {
        self.handlers
            .iter()
            .filter(|h| self.switches.get(&h.name).copied().unwrap_or(true))
            .filter(|h| h.subscribes(event_name))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// 把通知或请求交给订阅它的处理器，返回运行了的处理器数量
///
/// 所有处理器并发运行，单个处理器出错不影响其他处理器。
pub async fn handle_notice_or_request(bot: &Bot, event: Event, registry: &EventRegistry) -> usize {
    let name = event.name();
    match event.post_type {
        PostType::Notice => {
            crate::info!(target: "notice", "通知 {} 来自 {}", name, event.source_label())
        }
        PostType::Request => crate::info!(
            target: "request",
            "请求 {} 来自 {}: {}",
            name,
            event.source_label(),
            event.comment.as_deref().unwrap_or_default()
        ),
        PostType::Message => {
            crate::warn!(target: "event", "消息事件 {} 不由通知/请求处理器处理", name);
            return 0;
        }
    }

    let handlers = registry.subscribers(&name);
    crate::debug!(target: "event", "分发事件 {} 给 {} 个处理器", name, handlers.len());

    let name = name.as_str();
    let runs = handlers.iter().map(|h| {
        let result: BoxFuture<'static, BotResult<()>> = match (&h.func, event.post_type) {
            (HandlerFn::Notice(f), PostType::Notice) => {
                f(NoticeSession::new(bot.clone(), event.clone()))
            }
            (HandlerFn::Request(f), PostType::Request) => {
                f(RequestSession::new(bot.clone(), event.clone()))
            }
            _ => Box::pin(async { Ok(()) }),
        };
        async move {
            if let Err(e) = result.await {
                crate::error!(target: "event", "事件处理器 {} 处理 {} 时出错: {}", h.name, name, e);
            }
        }
    });
    let count = handlers.len();
    join_all(runs).await;
    count
}
