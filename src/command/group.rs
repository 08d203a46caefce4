use super::registry::{Command, CommandBuilder, CommandName};
use super::session::{CommandResult, CommandSession};
use crate::permission::Permission;
use std::future::Future;

/// 共享名称前缀和默认选项的一组指令
///
/// ```ignore
/// let note = CommandGroup::new("note").only_to_me(false);
/// registry.add_command(note.command("add", add_note).alias("记").build());
/// registry.add_command(note.command("list", list_notes).build());
/// ```
#[derive(Debug, Clone)]
pub struct CommandGroup {
    basename: CommandName,
    permission: Option<Permission>,
    only_to_me: Option<bool>,
    privileged: Option<bool>,
    shell_like: bool,
}

impl CommandGroup {
    pub fn new(name: impl Into<CommandName>) -> Self {
        Self {
            basename: name.into(),
            permission: None,
            only_to_me: None,
            privileged: None,
            shell_like: false,
        }
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn only_to_me(mut self, only_to_me: bool) -> Self {
        self.only_to_me = Some(only_to_me);
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = Some(privileged);
        self
    }

    pub fn shell_like(mut self, shell_like: bool) -> Self {
        self.shell_like = shell_like;
        self
    }

    pub fn basename(&self) -> &CommandName {
        &self.basename
    }

    /// 创建子指令，组的默认选项已经应用，之后的设置会覆盖它们
    pub fn command<N, F, Fut>(&self, name: N, handler: F) -> CommandBuilder
    where
        N: Into<CommandName>,
        F: Fn(CommandSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        let mut builder = Command::builder(self.basename.join(&name.into()), handler);
        if let Some(p) = &self.permission {
            builder = builder.permission(p.clone());
        }
        if let Some(v) = self.only_to_me {
            builder = builder.only_to_me(v);
        }
        if let Some(v) = self.privileged {
            builder = builder.privileged(v);
        }
        if self.shell_like {
            builder = builder.shell_like();
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_prefixes_names_and_applies_defaults() {
        let group = CommandGroup::new("note").only_to_me(false).privileged(true);
        let add = group
            .command("add", |_s: CommandSession| async { Ok(()) })
            .build();
        assert_eq!(add.name, CommandName::from(["note", "add"]));
        assert!(!add.only_to_me);
        assert!(add.privileged);

        let list = group
            .command("list", |_s: CommandSession| async { Ok(()) })
            .only_to_me(true)
            .build();
        assert!(list.only_to_me);
    }
}
