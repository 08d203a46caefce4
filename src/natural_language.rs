use crate::BotResult;
use crate::bot::Bot;
use crate::command::{CommandName, CommandOutcome, call_command};
use crate::event::Event;
use crate::permission::{Permission, check_permission};
use crate::transport::TransportError;
use futures_util::future::{BoxFuture, join_all};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// 自然语言处理器的会话
#[derive(Clone)]
pub struct NlpSession {
    bot: Bot,
    event: Event,
    msg: String,
}

impl NlpSession {
    pub fn new(bot: Bot, event: Event) -> Self {
        let msg = event.message.clone();
        Self { bot, event, msg }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// 消息内容，已去掉机器人的称呼
    pub fn msg(&self) -> &str {
        &self.msg
    }

    /// 去掉两端空白的消息文本
    pub fn msg_text(&self) -> &str {
        self.msg.trim()
    }

    pub async fn send(&self, message: &str) -> Result<Option<Value>, TransportError> {
        self.bot.send(&self.event, message).await
    }
}

/// 自然语言处理器识别出的意图
#[derive(Debug, Clone, PartialEq)]
pub struct IntentCommand {
    pub confidence: f64,
    pub name: CommandName,
    pub args: Option<Map<String, Value>>,
    pub current_arg: String,
}

impl IntentCommand {
    pub fn new(confidence: f64, name: impl Into<CommandName>) -> Self {
        Self {
            confidence,
            name: name.into(),
            args: None,
            current_arg: String::new(),
        }
    }

    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_current_arg(mut self, current_arg: impl Into<String>) -> Self {
        self.current_arg = current_arg.into();
        self
    }
}

pub type NlpHandler =
    Arc<dyn Fn(NlpSession) -> BoxFuture<'static, BotResult<Option<IntentCommand>>> + Send + Sync>;

/// 自然语言处理器
pub struct NlProcessor {
    pub name: String,
    handler: NlpHandler,
    pub keywords: Vec<String>,
    pub only_to_me: bool,
    pub only_short_message: bool,
    pub allow_empty_message: bool,
    pub permission: Option<Permission>,
}

impl NlProcessor {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(NlpSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BotResult<Option<IntentCommand>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |session| Box::pin(handler(session))),
            keywords: Vec::new(),
            only_to_me: true,
            only_short_message: true,
            allow_empty_message: false,
            permission: None,
        }
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn only_to_me(mut self, v: bool) -> Self {
        self.only_to_me = v;
        self
    }

    pub fn only_short_message(mut self, v: bool) -> Self {
        self.only_short_message = v;
        self
    }

    pub fn allow_empty_message(mut self, v: bool) -> Self {
        self.allow_empty_message = v;
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    /// 判断处理器是否应该处理这条消息
    async fn test(&self, session: &NlpSession) -> bool {
        let settings = session.bot.settings();
        let text = session.msg_text();
        if !self.allow_empty_message && session.msg.is_empty() {
            return false;
        }
        if self.only_short_message && text.chars().count() > settings.short_message_max_length {
            return false;
        }
        if self.only_to_me && !session.event.to_me {
            return false;
        }
        if !self.keywords.is_empty() && !self.keywords.iter().any(|kw| text.contains(kw.as_str())) {
            return false;
        }
        let policy = self
            .permission
            .as_ref()
            .unwrap_or(&settings.default_nlp_permission);
        check_permission(settings, &session.event, policy).await
    }
}

/// 自然语言处理器注册表，与指令注册表一样按消息克隆
#[derive(Clone, Default)]
pub struct NlpRegistry {
    processors: Vec<Arc<NlProcessor>>,
    switches: HashMap<String, bool>,
}

impl NlpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_processor(&mut self, processor: NlProcessor) -> bool {
        if self.processors.iter().any(|p| p.name == processor.name) {
            crate::warn!(target: "nlp", "自然语言处理器 {} 已存在", processor.name);
            return false;
        }
        self.switches.insert(processor.name.clone(), true);
        self.processors.push(Arc::new(processor));
        true
    }

    pub fn remove_processor(&mut self, name: &str) -> bool {
        let before = self.processors.len();
        self.processors.retain(|p| p.name != name);
        self.switches.remove(name);
        self.processors.len() != before
    }

    /// 开关处理器。`state` 为 `None` 时取反。
    pub fn switch_processor(&mut self, name: &str, state: Option<bool>) {
        if let Some(current) = self.switches.get_mut(name) {
            *current = state.unwrap_or(!*current);
        }
    }

    fn enabled(&self) -> impl Iterator<Item = &Arc<NlProcessor>> {
        self.processors
            .iter()
            .filter(|p| self.switches.get(&p.name).copied().unwrap_or(true))
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

/// 把消息交给自然语言处理器，选出置信度最高的意图并调用对应指令
pub async fn handle_natural_language(bot: &Bot, event: &Event, nlp: &NlpRegistry) -> CommandOutcome {
    let session = NlpSession::new(bot.clone(), event.clone());

    let runs = nlp.enabled().map(|p| {
        let session = session.clone();
        async move {
            if !p.test(&session).await {
                return None;
            }
            match (p.handler)(session).await {
                Ok(intent) => intent,
                Err(e) => {
                    crate::error!(target: "nlp", "自然语言处理器 {} 出错: {}", p.name, e);
                    None
                }
            }
        }
    });
    let mut intents: Vec<IntentCommand> = join_all(runs).await.into_iter().flatten().collect();

    // 置信度相同时保持注册顺序
    intents.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    crate::debug!(target: "nlp", "意图: {:?}", intents);

    let threshold = bot.settings().nlp_confidence_threshold;
    let Some(chosen) = intents.into_iter().next().filter(|i| i.confidence >= threshold) else {
        crate::debug!(target: "nlp", "没有置信度足够的意图");
        return CommandOutcome::Done(false);
    };
    crate::debug!(target: "nlp", "选中意图: {} ({})", chosen.name, chosen.confidence);

    call_command(
        bot,
        event,
        &chosen.name,
        &chosen.current_arg,
        chosen.args,
        false,
        false,
    )
    .await
}
