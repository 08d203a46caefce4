use super::argfilter::{ArgFilter, Rejection};
use super::registry::Command;
use crate::BotError;
use crate::bot::Bot;
use crate::event::{ContextMode, Event, context_id};
use crate::expression::{RenderArgs, render};
use crate::permission::check_permission;
use crate::transport::{SendOptions, TransportError};
use parking_lot::{Mutex, MutexGuard};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// `aget` 未指定键时使用的键
pub const DEFAULT_ARGUMENT_KEY: &str = "__default_argument";
const VALIDATION_FAILURE_KEY: &str = "__validation_failure_num";

// ============================================================================
// 控制流
// ============================================================================

/// 指令处理器的控制流
///
/// 处理器通过 `Err(Flow::..)` 提前结束本轮执行，调度器据此决定会话去留。
#[derive(Debug)]
pub enum Flow {
    /// 暂停，等待用户下一条消息
    Pause,
    /// 结束会话，参数表示消息是否已被处理
    Finish(bool),
    /// 结束会话，并把新的消息内容重新交给消息处理流程
    Switch(String),
    /// 处理器出错，会话结束，消息视为已处理
    Fail(BotError),
}

impl Flow {
    pub fn fail(e: impl Into<BotError>) -> Self {
        Flow::Fail(e.into())
    }

    /// 复制一份用于投递给挂起中的处理器；错误无法复制，以结束代替
    fn echo(&self) -> Flow {
        match self {
            Flow::Pause => Flow::Pause,
            Flow::Finish(r) => Flow::Finish(*r),
            Flow::Switch(m) => Flow::Switch(m.clone()),
            Flow::Fail(_) => Flow::Finish(true),
        }
    }
}

impl<E> From<E> for Flow
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(e: E) -> Self {
        Flow::Fail(Box::new(e))
    }
}

pub type CommandResult<T = ()> = Result<T, Flow>;

/// 处理器任务向调度器报告的结果
pub(crate) enum PassOutcome {
    /// 处理器在 `aget` / `apause` 处挂起
    Yielded,
    Done(CommandResult),
}

/// 一次运行的结果
#[derive(Debug)]
pub(crate) enum RunOutcome {
    Denied,
    Paused,
    Yielded,
    Finished(bool),
    Switched(String),
}

impl RunOutcome {
    fn from_flow(flow: Flow, command: &Command) -> Self {
        match flow {
            Flow::Pause => RunOutcome::Paused,
            Flow::Finish(r) => RunOutcome::Finished(r),
            Flow::Switch(m) => RunOutcome::Switched(m),
            Flow::Fail(e) => {
                crate::error!(target: "command", "指令 {} 执行出错: {}", command.name, e);
                RunOutcome::Finished(true)
            }
        }
    }
}

// ============================================================================
// 会话
// ============================================================================

struct SessionState {
    event: Event,
    values: Map<String, Value>,
    current_key: Option<String>,
    current_arg_filters: Option<Vec<ArgFilter>>,
    current_send_options: SendOptions,
    current_arg: String,
    running: bool,
    closed: bool,
    last_interaction: Option<Instant>,
    /// 挂起中的处理器等待的恢复信号
    waiter: Option<oneshot::Sender<CommandResult>>,
    /// 当前这一轮调度在等待的结果
    reporter: Option<oneshot::Sender<PassOutcome>>,
}

impl SessionState {
    fn set_running(&mut self, running: bool) {
        if self.running && !running {
            self.last_interaction = Some(Instant::now());
        }
        self.running = running;
    }

    fn waiting(&self) -> bool {
        self.waiter.as_ref().is_some_and(|w| !w.is_closed())
    }
}

struct SessionInner {
    bot: Bot,
    command: Arc<Command>,
    state: Mutex<SessionState>,
}

/// 指令会话
///
/// 一个上下文同时最多存在一个会话。会话跨越多条消息存活，处理器可以通过
/// [`get`](Self::get) / [`aget`](Self::aget) 向用户索要参数。克隆开销很小，
/// 所有克隆共享同一份状态。
#[derive(Clone)]
pub struct CommandSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for CommandSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("CommandSession")
            .field("command", &self.inner.command.name)
            .field("running", &st.running)
            .field("current_key", &st.current_key)
            .finish_non_exhaustive()
    }
}

impl CommandSession {
    pub(crate) fn new(
        bot: Bot,
        event: Event,
        command: Arc<Command>,
        current_arg: String,
        args: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                bot,
                command,
                state: Mutex::new(SessionState {
                    event,
                    values: args.unwrap_or_default(),
                    current_key: None,
                    current_arg_filters: None,
                    current_send_options: SendOptions::default(),
                    current_arg,
                    running: false,
                    closed: false,
                    last_interaction: None,
                    waiter: None,
                    reporter: None,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock()
    }

    pub(crate) fn same_as(&self, other: &CommandSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn bot(&self) -> &Bot {
        &self.inner.bot
    }

    pub fn command(&self) -> &Arc<Command> {
        &self.inner.command
    }

    /// 最近一条消息事件
    pub fn event(&self) -> Event {
        self.lock().event.clone()
    }

    pub fn ctx_id(&self) -> String {
        context_id(&self.lock().event, ContextMode::Default, false)
    }

    pub fn current_key(&self) -> Option<String> {
        self.lock().current_key.clone()
    }

    /// 本轮的参数原文
    pub fn current_arg(&self) -> String {
        self.lock().current_arg.clone()
    }

    /// 去掉两端空白的参数文本
    pub fn current_arg_text(&self) -> String {
        self.lock().current_arg.trim().to_string()
    }

    /// `shell_like` 解析出的参数列表
    pub fn argv(&self) -> Vec<String> {
        match self.lock().values.get("argv") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// 状态表快照
    pub fn state(&self) -> Map<String, Value> {
        self.lock().values.clone()
    }

    pub fn state_get(&self, key: &str) -> Option<Value> {
        self.lock().values.get(key).cloned()
    }

    pub fn state_set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.lock().values.insert(key.into(), value.into());
    }

    pub fn state_remove(&self, key: &str) -> Option<Value> {
        self.lock().values.remove(key)
    }

    pub fn running(&self) -> bool {
        self.lock().running
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.lock().set_running(running);
    }

    /// 会话是否第一次运行，即还没有暂停过
    pub fn is_first_run(&self) -> bool {
        self.lock().last_interaction.is_none()
    }

    /// 是否有处理器挂起在 `aget` / `apause` 上
    pub fn waiting(&self) -> bool {
        self.lock().waiting()
    }

    pub fn expire_timeout(&self) -> Option<Duration> {
        self.inner
            .command
            .expire_timeout
            .resolve(self.inner.bot.settings().session_expire_timeout)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.inner
            .command
            .run_timeout
            .resolve(self.inner.bot.settings().session_run_timeout)
    }

    /// 会话是否仍然有效（未关闭且未过期）
    pub fn is_valid(&self) -> bool {
        let expire = self.expire_timeout();
        let st = self.lock();
        if st.closed {
            return false;
        }
        match (expire, st.last_interaction) {
            (Some(timeout), Some(last)) => Instant::now().duration_since(last) <= timeout,
            _ => true,
        }
    }

    /// 后续提示消息使用的发送选项
    pub fn set_send_options(&self, options: SendOptions) {
        self.lock().current_send_options = options;
    }

    pub async fn send(&self, message: &str) -> Result<Option<Value>, TransportError> {
        self.send_with(message, SendOptions::default()).await
    }

    pub async fn send_with(
        &self,
        message: &str,
        options: SendOptions,
    ) -> Result<Option<Value>, TransportError> {
        let event = self.event();
        self.inner.bot.send_with(&event, message, options).await
    }

    /// 发送提示，失败只记日志
    async fn say(&self, message: Option<&str>) {
        let Some(message) = message.filter(|m| !m.is_empty()) else {
            return;
        };
        let options = self.lock().current_send_options;
        if let Err(e) = self.send_with(message, options).await {
            crate::warn!(target: "session", "发送提示失败: {}", e);
        }
    }

    // ------------------------------------------------------------------------
    // 处理器使用的控制流
    // ------------------------------------------------------------------------

    /// 从状态表取参数；不存在时发送提示并暂停会话，用户下次输入后处理器从头重新运行
    pub async fn get(
        &self,
        key: &str,
        prompt: Option<&str>,
        filters: Option<Vec<ArgFilter>>,
    ) -> CommandResult<Value> {
        {
            let mut st = self.lock();
            if let Some(v) = st.values.get(key) {
                return Ok(v.clone());
            }
            st.current_key = Some(key.to_string());
            st.current_arg_filters = filters;
        }
        self.say(prompt).await;
        Err(Flow::Pause)
    }

    /// 从状态表取参数；不存在时发送提示并在此处挂起，用户下次输入后从这里继续
    ///
    /// `key` 为 `None` 时使用默认键并强制获取新的输入。
    pub async fn aget(
        &self,
        key: Option<&str>,
        prompt: Option<&str>,
        filters: Option<Vec<ArgFilter>>,
        force_update: bool,
    ) -> CommandResult<Value> {
        let (key, force_update) = match key {
            Some(k) => (k.to_string(), force_update),
            None => (DEFAULT_ARGUMENT_KEY.to_string(), true),
        };
        {
            let mut st = self.lock();
            if force_update {
                st.values.remove(&key);
            } else if let Some(v) = st.values.get(&key) {
                return Ok(v.clone());
            }
            st.current_key = Some(key.clone());
            st.current_arg_filters = filters;
        }

        self.apause(prompt).await?;

        let st = self.lock();
        Ok(st
            .values
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Value::String(st.current_arg.clone())))
    }

    /// 发送消息并暂停会话，用户下次输入后处理器从头重新运行
    pub async fn pause(&self, message: Option<&str>) -> CommandResult {
        self.say(message).await;
        Err(Flow::Pause)
    }

    /// 发送消息并在此处挂起，直到用户下一条消息到来或会话过期
    pub async fn apause(&self, message: Option<&str>) -> CommandResult {
        // 已结束的会话（被移除或运行超时后被放弃）不再与用户交互
        if self.lock().closed {
            return Err(Flow::Finish(true));
        }
        self.say(message).await;
        let expire = self.expire_timeout();

        loop {
            let (tx, rx) = oneshot::channel();
            let reporter = {
                let mut st = self.lock();
                if st.closed {
                    return Err(Flow::Finish(true));
                }
                st.waiter = Some(tx);
                st.set_running(false);
                st.reporter.take()
            };
            if let Some(reporter) = reporter {
                let _ = reporter.send(PassOutcome::Yielded);
            }

            let signal = match expire {
                Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                    Ok(signal) => signal,
                    Err(_) => {
                        let mut st = self.lock();
                        st.waiter = None;
                        st.closed = true;
                        crate::debug!(target: "session", "指令 {} 等待输入超时", self.inner.command.name);
                        return Err(Flow::Finish(true));
                    }
                },
                None => rx.await,
            };

            match signal {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(Flow::Pause)) => continue,
                Ok(Err(flow)) => return Err(flow),
                // 会话已被丢弃
                Err(_) => return Err(Flow::Finish(true)),
            }
        }
    }

    /// 发送消息并结束会话
    pub async fn finish(&self, message: Option<&str>) -> CommandResult {
        self.say(message).await;
        Err(Flow::Finish(true))
    }

    /// 结束会话，并把 `new_message` 作为新的消息重新处理
    ///
    /// 首次运行时调用等同于 `Finish(false)`，消息交给后续流程（如自然语言处理）。
    pub fn switch(&self, new_message: impl Into<String>) -> CommandResult {
        if self.is_first_run() {
            return Err(Flow::Finish(false));
        }
        Err(Flow::Switch(new_message.into()))
    }

    // ------------------------------------------------------------------------
    // 调度器使用
    // ------------------------------------------------------------------------

    /// 若会话空闲则占用它，返回是否成功
    pub(crate) fn try_claim(&self) -> bool {
        let mut st = self.lock();
        if st.running {
            return false;
        }
        st.set_running(true);
        true
    }

    /// 用新消息刷新会话
    pub(crate) fn refresh(&self, event: Event, current_arg: String) {
        let mut st = self.lock();
        st.event = event;
        st.current_arg = current_arg;
    }

    /// 标记会话结束，挂起中的处理器会收到 `flow`
    ///
    /// 仍在等待本轮结果的调度器会收到同样的结束信号。
    pub(crate) fn close(&self, flow: Option<Flow>) {
        let (waiter, reporter) = {
            let mut st = self.lock();
            st.closed = true;
            st.set_running(false);
            (st.waiter.take(), st.reporter.take())
        };
        let Some(flow) = flow else {
            return;
        };
        if let Some(reporter) = reporter {
            let _ = reporter.send(PassOutcome::Done(Err(flow.echo())));
        }
        if let Some(waiter) = waiter {
            let _ = waiter.send(Err(flow));
        }
    }

    /// 运行一轮：检查权限，处理参数，然后启动或恢复处理器，等待它结束或挂起
    pub(crate) async fn execute(&self, check_perm: bool) -> RunOutcome {
        let command = self.inner.command.clone();

        if check_perm {
            let event = self.event();
            let policy = command.permission_or_default(self.inner.bot.settings());
            if !check_permission(self.inner.bot.settings(), &event, policy).await {
                crate::debug!(target: "command", "{} 没有指令 {} 的权限", event.source_label(), command.name);
                return RunOutcome::Denied;
            }
        }

        if let Err(flow) = self.process_argument().await {
            let echo = flow.echo();
            let outcome = RunOutcome::from_flow(flow, &command);
            // 暂停时处理器继续挂着；其他情况要让挂起的处理器退出
            if !matches!(outcome, RunOutcome::Paused) {
                let waiter = self.lock().waiter.take();
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(echo));
                }
            }
            return outcome;
        }

        let (tx, rx) = oneshot::channel();
        let resume = {
            let mut st = self.lock();
            match st.waiter.take() {
                Some(waiter) if !waiter.is_closed() => {
                    st.reporter = Some(tx);
                    Some(waiter)
                }
                Some(_) => {
                    // 处理器已经因超时退出
                    return RunOutcome::Finished(true);
                }
                None => {
                    st.reporter = Some(tx);
                    None
                }
            }
        };

        match resume {
            Some(waiter) => {
                crate::debug!(target: "command", "恢复指令 {}", command.name);
                if waiter.send(Ok(())).is_err() {
                    self.lock().reporter = None;
                    return RunOutcome::Finished(true);
                }
            }
            None => {
                let session = self.clone();
                let handler = command.handler.clone();
                tokio::spawn(async move {
                    let result = handler(session.clone()).await;
                    session.report(result);
                });
            }
        }

        match rx.await {
            Ok(PassOutcome::Yielded) => RunOutcome::Yielded,
            Ok(PassOutcome::Done(Ok(()))) => RunOutcome::Finished(true),
            Ok(PassOutcome::Done(Err(flow))) => RunOutcome::from_flow(flow, &command),
            Err(_) => {
                crate::error!(target: "command", "指令 {} 的处理器异常退出", command.name);
                RunOutcome::Finished(true)
            }
        }
    }

    /// 处理器任务结束时调用
    fn report(&self, result: CommandResult) {
        let reporter = self.lock().reporter.take();
        match reporter {
            Some(reporter) => {
                let _ = reporter.send(PassOutcome::Done(result));
            }
            None => {
                if let Err(Flow::Fail(e)) = result {
                    crate::error!(target: "command", "指令 {} 执行出错: {}", self.inner.command.name, e);
                }
            }
        }
    }

    /// 把本轮输入交给参数过滤器或参数解析器，结果写入状态表
    async fn process_argument(&self) -> CommandResult {
        let (key, filters, current_arg) = {
            let st = self.lock();
            (
                st.current_key.clone(),
                st.current_arg_filters.clone(),
                st.current_arg.clone(),
            )
        };

        if let (Some(key), Some(filters)) = (&key, filters) {
            let mut arg = Value::String(current_arg);
            for filter in &filters {
                match filter.apply(arg, self.clone()).await {
                    Ok(v) => arg = v,
                    Err(Rejection::Invalid(e)) => return self.reject(e.message).await,
                    Err(Rejection::Control(flow)) => return Err(flow),
                }
            }
            let mut st = self.lock();
            st.values.insert(key.clone(), arg);
            return Ok(());
        }

        if let Some(parser) = self.inner.command.args_parser.clone() {
            parser(self.clone()).await?;
        }
        if let Some(key) = key {
            let mut st = self.lock();
            if !st.values.contains_key(&key) {
                let arg = Value::String(st.current_arg.clone());
                st.values.insert(key, arg);
            }
        }
        Ok(())
    }

    /// 记录一次校验失败，超过上限则结束会话，否则要求重新输入
    async fn reject(&self, message: Option<String>) -> CommandResult {
        let settings = self.inner.bot.settings();
        let max = settings.max_validation_failures;
        if max > 0 {
            let failures = {
                let mut st = self.lock();
                let n = st
                    .values
                    .get(VALIDATION_FAILURE_KEY)
                    .and_then(Value::as_u64)
                    .unwrap_or(0)
                    + 1;
                st.values.insert(VALIDATION_FAILURE_KEY.to_string(), Value::from(n));
                n
            };
            if failures >= u64::from(max) {
                let text = render(
                    &settings.too_many_validation_failures_expression,
                    &RenderArgs::new().named("failures", failures),
                );
                return self.finish(Some(&text)).await;
            }
        }
        let text = match message {
            Some(m) => m,
            None => render(
                &settings.default_validation_failure_expression,
                &RenderArgs::new(),
            ),
        };
        self.pause(Some(&text)).await
    }
}
