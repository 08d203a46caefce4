use huihua::prelude::*;

pub struct AdminPlugin;

impl Plugin for AdminPlugin {
    fn id(&self) -> &str {
        "admin"
    }

    fn name(&self) -> &str {
        "管理指令"
    }

    fn register(&self, registrar: &mut Registrar<'_>) {
        let superuser = Permission::from_fn(|roles| roles.is_superuser);

        // 特权指令：会话忙时也能执行，用来清掉卡住的会话
        registrar.command(
            Command::builder("kill", |session: CommandSession| async move {
                let event = session.event();
                session.bot().kill_current_session(&event);
                session.send("已结束当前会话").await?;
                Ok(())
            })
            .privileged(true)
            .permission(superuser.clone())
            .build(),
        );

        registrar.command(
            Command::builder("switch", |session: CommandSession| async move {
                let argv = session.argv();
                let Some(target) = argv.first() else {
                    return session.finish(Some("用法: /switch <指令名> [on|off]")).await;
                };
                let state = match argv.get(1).map(String::as_str) {
                    Some("on") => Some(true),
                    Some("off") => Some(false),
                    _ => None,
                };
                let name = CommandName::new(target.split('.'));
                session.bot().switch_command_global(&name, state);
                let enabled = session.bot().commands().is_enabled(&name);
                session
                    .send(&format!("指令 {} 已{}", name, if enabled { "开启" } else { "关闭" }))
                    .await?;
                Ok(())
            })
            .shell_like()
            .permission(superuser)
            .build(),
        );
    }
}
