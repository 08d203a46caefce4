use super::session::{CommandResult, CommandSession, Flow};
use crate::config::CoreSettings;
use crate::permission::Permission;
use futures_util::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 指令处理函数
pub type CommandHandler =
    Arc<dyn Fn(CommandSession) -> BoxFuture<'static, CommandResult> + Send + Sync>;

fn boxed_handler<F, Fut>(f: F) -> CommandHandler
where
    F: Fn(CommandSession) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CommandResult> + Send + 'static,
{
    Arc::new(move |session| Box::pin(f(session)))
}

// ============================================================================
// 指令名
// ============================================================================

/// 指令名，由若干段组成，如 `note.add` 对应 `["note", "add"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandName(Vec<String>);

impl CommandName {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 拼接子指令名
    pub fn join(&self, sub: &CommandName) -> CommandName {
        let mut segments = self.0.clone();
        segments.extend(sub.0.iter().cloned());
        CommandName(segments)
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for CommandName {
    fn from(s: &str) -> Self {
        CommandName(vec![s.to_string()])
    }
}

impl From<String> for CommandName {
    fn from(s: String) -> Self {
        CommandName(vec![s])
    }
}

impl From<Vec<String>> for CommandName {
    fn from(v: Vec<String>) -> Self {
        CommandName(v)
    }
}

impl<const N: usize> From<[&str; N]> for CommandName {
    fn from(v: [&str; N]) -> Self {
        CommandName::new(v)
    }
}

// ============================================================================
// 指令
// ============================================================================

/// 超时设置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// 使用全局配置
    #[default]
    Inherit,
    /// 不超时
    Disabled,
    After(Duration),
}

impl Timeout {
    pub fn resolve(self, default: Option<Duration>) -> Option<Duration> {
        match self {
            Timeout::Inherit => default,
            Timeout::Disabled => None,
            Timeout::After(d) => Some(d),
        }
    }
}

/// 指令描述，注册后不可变
pub struct Command {
    pub name: CommandName,
    pub(crate) handler: CommandHandler,
    pub aliases: Vec<String>,
    pub patterns: Vec<Regex>,
    pub only_to_me: bool,
    pub privileged: bool,
    /// `None` 表示使用全局默认权限
    pub permission: Option<Permission>,
    pub expire_timeout: Timeout,
    pub run_timeout: Timeout,
    pub(crate) args_parser: Option<CommandHandler>,
}

impl Command {
    pub fn builder<N, F, Fut>(name: N, handler: F) -> CommandBuilder
    where
        N: Into<CommandName>,
        F: Fn(CommandSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        CommandBuilder::new(name.into(), boxed_handler(handler))
    }

    pub fn permission_or_default<'a>(&'a self, settings: &'a CoreSettings) -> &'a Permission {
        self.permission
            .as_ref()
            .unwrap_or(&settings.default_command_permission)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("only_to_me", &self.only_to_me)
            .field("privileged", &self.privileged)
            .finish_non_exhaustive()
    }
}

pub struct CommandBuilder {
    name: CommandName,
    handler: CommandHandler,
    aliases: Vec<String>,
    patterns: Vec<String>,
    only_to_me: bool,
    privileged: bool,
    permission: Option<Permission>,
    expire_timeout: Timeout,
    run_timeout: Timeout,
    args_parser: Option<CommandHandler>,
}

impl CommandBuilder {
    fn new(name: CommandName, handler: CommandHandler) -> Self {
        Self {
            name,
            handler,
            aliases: Vec::new(),
            patterns: Vec::new(),
            only_to_me: true,
            privileged: false,
            permission: None,
            expire_timeout: Timeout::Inherit,
            run_timeout: Timeout::Inherit,
            args_parser: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    /// 正则触发，匹配时 `current_arg` 为去掉起始符后的完整文本
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn only_to_me(mut self, only_to_me: bool) -> Self {
        self.only_to_me = only_to_me;
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn expire_timeout(mut self, timeout: Timeout) -> Self {
        self.expire_timeout = timeout;
        self
    }

    pub fn run_timeout(mut self, timeout: Timeout) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn args_parser<F, Fut>(mut self, parser: F) -> Self
    where
        F: Fn(CommandSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        self.args_parser = Some(boxed_handler(parser));
        self
    }

    /// 按 shell 规则切分参数，结果放入 `state["argv"]`
    ///
    /// 引号不配对时处理器不会运行，会话以出错结束。
    pub fn shell_like(self) -> Self {
        self.args_parser(|session: CommandSession| async move {
            let text = session.current_arg_text();
            let Some(argv) = shlex::split(&text) else {
                return Err(Flow::fail(format!("无法按 shell 规则切分参数: {}", text)));
            };
            let argv: Vec<Value> = argv.into_iter().map(Value::String).collect();
            session.state_set("argv", Value::Array(argv));
            Ok(())
        })
    }

    pub fn build(self) -> Command {
        let patterns = self
            .patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    crate::warn!(target: "command", "指令 {} 的正则 `{}` 无效，已忽略: {}", self.name, p, e);
                    None
                }
            })
            .collect();

        Command {
            name: self.name,
            handler: self.handler,
            aliases: self.aliases,
            patterns,
            only_to_me: self.only_to_me,
            privileged: self.privileged,
            permission: self.permission,
            expire_timeout: self.expire_timeout,
            run_timeout: self.run_timeout,
            args_parser: self.args_parser,
        }
    }
}

// ============================================================================
// 指令注册表
// ============================================================================

/// 指令注册表
///
/// 全局实例由 [`crate::Bot`] 持有；处理每条消息时会克隆一份，消息预处理器可以在
/// 副本上开关指令而不影响全局状态。
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<CommandName, Arc<Command>>,
    aliases: HashMap<String, CommandName>,
    patterns: Vec<(Regex, CommandName)>,
    switches: HashMap<CommandName, bool>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册指令（连同其别名与正则）。重名时忽略并返回 false。
    pub fn add_command(&mut self, command: Command) -> bool {
        let name = command.name.clone();
        if name.is_empty() {
            crate::warn!(target: "command", "指令名不能为空，已忽略");
            return false;
        }
        if self.commands.contains_key(&name) {
            crate::warn!(target: "command", "指令 {} 已存在", name);
            return false;
        }

        let aliases = command.aliases.clone();
        let patterns = command.patterns.clone();
        self.commands.insert(name.clone(), Arc::new(command));
        self.switches.insert(name.clone(), true);
        self.add_aliases(aliases, &name);
        self.add_patterns(patterns, &name);
        true
    }

    /// 替换已存在的指令，别名与正则保持指向同名指令
    pub fn reload_command(&mut self, command: Command) -> bool {
        let name = command.name.clone();
        if !self.commands.contains_key(&name) {
            crate::warn!(target: "command", "指令 {} 不存在，请使用 add_command", name);
            return false;
        }
        self.commands.insert(name.clone(), Arc::new(command));
        self.switches.insert(name, true);
        true
    }

    pub fn remove_command(&mut self, name: &CommandName) -> bool {
        if self.commands.remove(name).is_none() {
            return false;
        }
        self.aliases.retain(|_, target| target != name);
        self.patterns.retain(|(_, target)| target != name);
        self.switches.remove(name);
        true
    }

    /// 开关指令。`state` 为 `None` 时取反。
    pub fn switch_command(&mut self, name: &CommandName, state: Option<bool>) {
        if let Some(current) = self.switches.get_mut(name) {
            *current = state.unwrap_or(!*current);
        }
    }

    pub fn add_aliases<I, S>(&mut self, aliases: I, target: &CommandName)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for alias in aliases {
            let alias = alias.into();
            if self.aliases.contains_key(&alias) {
                crate::warn!(target: "command", "别名 {} 已存在", alias);
                continue;
            }
            self.aliases.insert(alias, target.clone());
        }
    }

    pub fn add_patterns<I>(&mut self, patterns: I, target: &CommandName)
    where
        I: IntoIterator<Item = Regex>,
    {
        for pattern in patterns {
            if self
                .patterns
                .iter()
                .any(|(p, _)| p.as_str() == pattern.as_str())
            {
                crate::warn!(target: "command", "正则 {} 已存在", pattern);
                continue;
            }
            self.patterns.push((pattern, target.clone()));
        }
    }

    pub fn is_enabled(&self, name: &CommandName) -> bool {
        self.switches.get(name).copied().unwrap_or(true)
    }

    /// 按指令名查找已启用的指令
    pub fn find_command(&self, name: &CommandName) -> Option<Arc<Command>> {
        if name.is_empty() || !self.is_enabled(name) {
            return None;
        }
        self.commands.get(name).cloned()
    }

    pub(crate) fn find_alias(&self, alias: &str) -> Option<Arc<Command>> {
        self.aliases
            .get(alias)
            .and_then(|name| self.find_command(name))
    }

    /// 依注册顺序查找第一个能在 `text` 中搜索到的正则
    pub(crate) fn find_pattern(&self, text: &str) -> Option<Arc<Command>> {
        self.patterns
            .iter()
            .filter(|(_, name)| self.is_enabled(name))
            .find(|(re, _)| re.is_match(text))
            .and_then(|(re, name)| {
                crate::debug!(target: "command", "指令 {} 的正则 {} 匹配成功", name, re);
                self.find_command(name)
            })
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
