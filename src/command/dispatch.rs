use super::parser::parse_command;
use super::registry::{CommandName, CommandRegistry};
use super::session::{CommandSession, Flow, RunOutcome};
use crate::bot::Bot;
use crate::event::{ContextMode, Event, context_id};
use crate::expression::{RenderArgs, render};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;

// ============================================================================
// 会话存储
// ============================================================================

/// 上下文 ID -> 会话，每个上下文最多一个会话
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, CommandSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ctx_id: &str) -> Option<CommandSession> {
        self.sessions.lock().get(ctx_id).cloned()
    }

    pub(crate) fn insert(&self, ctx_id: &str, session: CommandSession) {
        self.sessions.lock().insert(ctx_id.to_string(), session);
    }

    pub fn remove(&self, ctx_id: &str) -> Option<CommandSession> {
        self.sessions.lock().remove(ctx_id)
    }

    /// 仅当存储的仍是同一个会话时才移除
    pub(crate) fn remove_if_same(&self, ctx_id: &str, session: &CommandSession) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.get(ctx_id).is_some_and(|s| s.same_as(session)) {
            sessions.remove(ctx_id);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

// ============================================================================
// 调度
// ============================================================================

/// 指令处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// 参数表示消息是否已被处理
    Done(bool),
    /// 会话要求用新的消息内容重新处理
    Switched(String),
}

impl CommandOutcome {
    pub fn handled(&self) -> bool {
        matches!(self, CommandOutcome::Done(true) | CommandOutcome::Switched(_))
    }
}

/// 把消息当作指令处理
///
/// 优先交给当前上下文里已存在的会话；否则解析指令名并创建新会话。
/// 被已有会话接管时 `event.to_me` 会被置为真。
pub async fn handle_command(
    bot: &Bot,
    event: &mut Event,
    commands: &CommandRegistry,
) -> CommandOutcome {
    let settings = bot.settings();
    let parsed = parse_command(settings, commands, event.message.trim_start());
    let privileged = parsed
        .as_ref()
        .is_some_and(|(cmd, _)| cmd.privileged && (!cmd.only_to_me || event.to_me));
    let ctx_id = context_id(event, ContextMode::Default, false);

    let mut resumed = None;
    if !privileged {
        let mut retries = settings.session_busy_retries;
        while retries > 0 && bot.sessions().get(&ctx_id).is_some_and(|s| s.running()) {
            retries -= 1;
            tokio::time::sleep(settings.session_busy_retry_interval).await;
        }

        if let Some(session) = bot.sessions().get(&ctx_id) {
            if !session.running() && !session.is_valid() {
                crate::debug!(target: "command", "{} 的会话已过期", ctx_id);
                bot.sessions().remove_if_same(&ctx_id, &session);
                session.close(Some(Flow::Finish(true)));
            } else if session.try_claim() {
                event.to_me = true;
                session.refresh(event.clone(), event.message.clone());
                resumed = Some(session);
            } else {
                crate::warn!(target: "command", "{} 的会话正在运行，拒绝新消息", ctx_id);
                let notice = render(&settings.session_running_expression, &RenderArgs::new());
                let _ = bot.send(event, &notice).await;
                return CommandOutcome::Done(true);
            }
        }
    }

    let (session, check_perm) = match resumed {
        Some(session) => (session, false),
        None => {
            let Some((cmd, current_arg)) = parsed else {
                return CommandOutcome::Done(false);
            };
            if cmd.only_to_me && !event.to_me {
                return CommandOutcome::Done(false);
            }
            crate::debug!(target: "command", "找到指令 {}", cmd.name);
            let session = CommandSession::new(bot.clone(), event.clone(), cmd, current_arg, None);
            session.set_running(true);
            (session, true)
        }
    };

    run_session(bot, &ctx_id, session, check_perm, privileged).await
}

/// 直接调用指令，绕过解析
///
/// `disable_interaction` 为真时不会保存会话，需要进一步交互的指令视为失败。
pub async fn call_command(
    bot: &Bot,
    event: &Event,
    name: &CommandName,
    current_arg: &str,
    args: Option<Map<String, Value>>,
    check_perm: bool,
    disable_interaction: bool,
) -> CommandOutcome {
    let Some(cmd) = bot.commands().find_command(name) else {
        crate::warn!(target: "command", "指令 {} 不存在", name);
        return CommandOutcome::Done(false);
    };
    let session = CommandSession::new(
        bot.clone(),
        event.clone(),
        cmd,
        current_arg.to_string(),
        args,
    );
    session.set_running(true);
    let ctx_id = context_id(event, ContextMode::Default, false);
    run_session(bot, &ctx_id, session, check_perm, disable_interaction).await
}

/// 强制移除当前上下文的会话，即使它正在运行
pub fn kill_current_session(bot: &Bot, event: &Event) {
    let ctx_id = context_id(event, ContextMode::Default, false);
    if let Some(session) = bot.sessions().remove(&ctx_id) {
        crate::info!(target: "command", "已移除 {} 的会话 ({})", ctx_id, session.command().name);
        session.close(Some(Flow::Finish(true)));
    }
}

async fn run_session(
    bot: &Bot,
    ctx_id: &str,
    session: CommandSession,
    check_perm: bool,
    disable_interaction: bool,
) -> CommandOutcome {
    if !disable_interaction {
        bot.sessions().insert(ctx_id, session.clone());
    }
    let name = session.command().name.clone();
    crate::debug!(target: "command", "运行指令 {}", name);

    let run = session.execute(check_perm);
    let outcome = match session.run_timeout() {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                crate::warn!(target: "command", "指令 {} 运行超时", name);
                RunOutcome::Finished(true)
            }
        },
        None => run.await,
    };

    match outcome {
        RunOutcome::Paused => {
            session.set_running(false);
            park_session(&session, &name, disable_interaction)
        }
        // 挂起的处理器在 apause 中已经释放了会话，此时可能已被下一条消息占用
        RunOutcome::Yielded => park_session(&session, &name, disable_interaction),
        RunOutcome::Denied => {
            end_session(bot, ctx_id, &session);
            CommandOutcome::Done(false)
        }
        RunOutcome::Finished(handled) => {
            end_session(bot, ctx_id, &session);
            crate::debug!(target: "command", "指令 {} 的会话结束", name);
            CommandOutcome::Done(handled)
        }
        RunOutcome::Switched(message) => {
            end_session(bot, ctx_id, &session);
            crate::debug!(target: "command", "指令 {} 的会话切换到新消息: {}", name, message);
            CommandOutcome::Switched(message)
        }
    }
}

/// 会话等待进一步交互；不允许交互时视为失败
fn park_session(
    session: &CommandSession,
    name: &CommandName,
    disable_interaction: bool,
) -> CommandOutcome {
    if disable_interaction {
        session.close(Some(Flow::Finish(false)));
        return CommandOutcome::Done(false);
    }
    crate::debug!(target: "command", "指令 {} 等待进一步交互", name);
    CommandOutcome::Done(true)
}

fn end_session(bot: &Bot, ctx_id: &str, session: &CommandSession) {
    session.close(Some(Flow::Finish(true)));
    bot.sessions().remove_if_same(ctx_id, session);
}
