use crate::command::{
    Command, CommandName, CommandOutcome, CommandRegistry, SessionStore, call_command,
    kill_current_session,
};
use crate::config::{AppConfig, ConfigError, CoreSettings};
use crate::event::{Event, PostType};
use crate::message::{MessagePreprocessor, handle_message};
use crate::natural_language::{NlProcessor, NlpRegistry};
use crate::notice_request::{EventHandler, EventRegistry, handle_notice_or_request};
use crate::transport::{self, LogTransport, SendOptions, Transport, TransportError};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// 插件
// ============================================================================

/// 插件接口
///
/// 插件在构建机器人时把自己的指令、自然语言处理器、预处理器和通知/请求处理器注册进来。
pub trait Plugin: Send + Sync {
    /// 插件唯一标识，同时是配置文件中插件配置的表名
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// 插件优先级（数字越小越先注册）
    fn priority(&self) -> i32 {
        100
    }

    fn register(&self, registrar: &mut Registrar<'_>);
}

/// 插件注册时可用的注册表
pub struct Registrar<'a> {
    plugin_id: &'a str,
    config: &'a AppConfig,
    commands: &'a mut CommandRegistry,
    nlp: &'a mut NlpRegistry,
    preprocessors: &'a mut Vec<Arc<dyn MessagePreprocessor>>,
    events: &'a mut EventRegistry,
}

impl Registrar<'_> {
    /// 读取本插件的配置
    pub fn config<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        self.config.get_plugin_config(self.plugin_id)
    }

    pub fn command(&mut self, command: Command) -> &mut Self {
        self.commands.add_command(command);
        self
    }

    pub fn nl_processor(&mut self, processor: NlProcessor) -> &mut Self {
        self.nlp.add_processor(processor);
        self
    }

    pub fn preprocessor<M: MessagePreprocessor + 'static>(&mut self, preprocessor: M) -> &mut Self {
        self.preprocessors.push(Arc::new(preprocessor));
        self
    }

    pub fn event_handler(&mut self, handler: EventHandler) -> &mut Self {
        self.events.add_handler(handler);
        self
    }
}

// ============================================================================
// 机器人
// ============================================================================

struct BotInner {
    settings: CoreSettings,
    commands: RwLock<CommandRegistry>,
    nlp: RwLock<NlpRegistry>,
    events: RwLock<EventRegistry>,
    preprocessors: Vec<Arc<dyn MessagePreprocessor>>,
    plugins: Vec<Arc<dyn Plugin>>,
    sessions: SessionStore,
    transport: Arc<dyn Transport>,
}

/// 机器人实例，克隆开销很小
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

impl Bot {
    pub fn builder() -> BotBuilder {
        BotBuilder::new()
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.inner.settings
    }

    /// 全局指令注册表的快照
    pub fn commands(&self) -> CommandRegistry {
        self.inner.commands.read().clone()
    }

    /// 修改全局指令注册表，对之后的所有消息生效
    pub fn commands_mut<R>(&self, f: impl FnOnce(&mut CommandRegistry) -> R) -> R {
        f(&mut self.inner.commands.write())
    }

    pub fn switch_command_global(&self, name: &CommandName, state: Option<bool>) {
        self.commands_mut(|reg| reg.switch_command(name, state));
    }

    pub fn nlp(&self) -> NlpRegistry {
        self.inner.nlp.read().clone()
    }

    pub fn nlp_mut<R>(&self, f: impl FnOnce(&mut NlpRegistry) -> R) -> R {
        f(&mut self.inner.nlp.write())
    }

    /// 通知/请求处理器注册表的快照
    pub fn events(&self) -> EventRegistry {
        self.inner.events.read().clone()
    }

    pub fn events_mut<R>(&self, f: impl FnOnce(&mut EventRegistry) -> R) -> R {
        f(&mut self.inner.events.write())
    }

    pub fn switch_event_handler_global(&self, name: &str, state: Option<bool>) {
        self.events_mut(|reg| reg.switch_handler(name, state));
    }

    pub fn preprocessors(&self) -> &[Arc<dyn MessagePreprocessor>] {
        &self.inner.preprocessors
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.inner.plugins
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub async fn send(&self, event: &Event, message: &str) -> Result<Option<Value>, TransportError> {
        self.send_with(event, message, SendOptions::default()).await
    }

    pub async fn send_with(
        &self,
        event: &Event,
        message: &str,
        options: SendOptions,
    ) -> Result<Option<Value>, TransportError> {
        transport::send(self.inner.transport.as_ref(), event, message, &options).await
    }

    /// 处理一条消息，返回是否被处理
    pub async fn handle_message(&self, event: Event) -> bool {
        handle_message(self, event).await
    }

    /// 处理一个通知或请求，返回运行了的处理器数量
    pub async fn handle_notice_or_request(&self, event: Event) -> usize {
        let registry = self.events();
        handle_notice_or_request(self, event, &registry).await
    }

    /// 按上报类型分发任意事件，返回是否有处理器处理了它
    pub async fn handle_event(&self, event: Event) -> bool {
        match event.post_type {
            PostType::Message => self.handle_message(event).await,
            PostType::Notice | PostType::Request => self.handle_notice_or_request(event).await > 0,
        }
    }

    pub async fn call_command(
        &self,
        event: &Event,
        name: &CommandName,
        current_arg: &str,
        args: Option<Map<String, Value>>,
        check_perm: bool,
        disable_interaction: bool,
    ) -> CommandOutcome {
        call_command(self, event, name, current_arg, args, check_perm, disable_interaction).await
    }

    pub fn kill_current_session(&self, event: &Event) {
        kill_current_session(self, event);
    }

    /// 事件主循环：每个事件在独立任务中处理，通道关闭后返回
    pub async fn run(&self, mut events: mpsc::Receiver<Event>) {
        crate::info!("机器人已启动，共 {} 个插件", self.inner.plugins.len());
        while let Some(event) = events.recv().await {
            let bot = self.clone();
            tokio::spawn(async move {
                bot.handle_event(event).await;
            });
        }
        crate::info!("事件通道已关闭，停止处理");
    }
}

// ============================================================================
// 构建器
// ============================================================================

pub struct BotBuilder {
    settings: CoreSettings,
    config: AppConfig,
    transport: Option<Arc<dyn Transport>>,
    plugins: Vec<Box<dyn Plugin>>,
    commands: CommandRegistry,
    nlp: NlpRegistry,
    events: EventRegistry,
    preprocessors: Vec<Arc<dyn MessagePreprocessor>>,
}

impl BotBuilder {
    pub fn new() -> Self {
        Self {
            settings: CoreSettings::default(),
            config: AppConfig::default(),
            transport: None,
            plugins: Vec::new(),
            commands: CommandRegistry::new(),
            nlp: NlpRegistry::new(),
            events: EventRegistry::new(),
            preprocessors: Vec::new(),
        }
    }

    /// 使用配置文件内容，同时决定是否输出调试日志
    pub fn config(mut self, config: AppConfig) -> Result<Self, ConfigError> {
        self.settings = CoreSettings::from_config(&config.core)?;
        crate::log::set_debug(config.core.debug);
        self.config = config;
        Ok(self)
    }

    pub fn settings(mut self, settings: CoreSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn plugin<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn command(mut self, command: Command) -> Self {
        self.commands.add_command(command);
        self
    }

    pub fn nl_processor(mut self, processor: NlProcessor) -> Self {
        self.nlp.add_processor(processor);
        self
    }

    pub fn preprocessor<M: MessagePreprocessor + 'static>(mut self, preprocessor: M) -> Self {
        self.preprocessors.push(Arc::new(preprocessor));
        self
    }

    pub fn event_handler(mut self, handler: EventHandler) -> Self {
        self.events.add_handler(handler);
        self
    }

    pub fn build(self) -> Bot {
        let BotBuilder {
            settings,
            config,
            transport,
            plugins,
            mut commands,
            mut nlp,
            mut events,
            mut preprocessors,
        } = self;

        let mut plugins: Vec<Arc<dyn Plugin>> = plugins.into_iter().map(Arc::from).collect();
        plugins.sort_by_key(|p| p.priority());

        for plugin in &plugins {
            let mut registrar = Registrar {
                plugin_id: plugin.id(),
                config: &config,
                commands: &mut commands,
                nlp: &mut nlp,
                preprocessors: &mut preprocessors,
                events: &mut events,
            };
            plugin.register(&mut registrar);
            crate::info!("已加载插件: {} ({})", plugin.name(), plugin.id());
        }

        preprocessors.sort_by_key(|m| m.priority());

        Bot {
            inner: Arc::new(BotInner {
                settings,
                commands: RwLock::new(commands),
                nlp: RwLock::new(nlp),
                events: RwLock::new(events),
                preprocessors,
                plugins,
                sessions: SessionStore::new(),
                transport: transport.unwrap_or_else(|| Arc::new(LogTransport)),
            }),
        }
    }
}

impl Default for BotBuilder {
    fn default() -> Self {
        Self::new()
    }
}
