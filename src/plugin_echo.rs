use huihua::prelude::*;

pub struct EchoPlugin;

impl Plugin for EchoPlugin {
    fn id(&self) -> &str {
        "echo"
    }
    fn name(&self) -> &str {
        "Echo Plugin"
    }
    fn description(&self) -> &str {
        "Repeats what you say"
    }

    fn register(&self, registrar: &mut Registrar<'_>) {
        registrar
            .command(
                Command::builder("ping", |session: CommandSession| async move {
                    session.send("pong!").await?;
                    Ok(())
                })
                .only_to_me(false)
                .build(),
            )
            .command(
                Command::builder("echo", |session: CommandSession| async move {
                    let mut text = session.current_arg_text();
                    if text.is_empty() {
                        let reply = session.aget(None, Some("要复读什么呢？"), None, true).await?;
                        text = reply.as_str().unwrap_or_default().trim().to_string();
                    }
                    session.send(&text).await?;
                    Ok(())
                })
                .alias("复读")
                .build(),
            );
    }
}
