// plugin_blacklist.rs

use huihua::prelude::*;
use serde::Deserialize;

/// 对应配置文件中的 `[blacklist]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlacklistConfig {
    #[serde(default)]
    pub users: Vec<i64>,
    #[serde(default)]
    pub groups: Vec<i64>,
}

struct BlacklistFilter {
    config: BlacklistConfig,
}

#[async_trait]
impl MessagePreprocessor for BlacklistFilter {
    fn name(&self) -> &str {
        "blacklist"
    }

    fn priority(&self) -> i32 {
        -100
    }

    async fn process(
        &self,
        _ctx: &mut MessageContext,
        event: &mut Event,
    ) -> BotResult<PreprocessResult> {
        if self.config.users.contains(&event.user_id) {
            return Ok(PreprocessResult::Cancel(format!(
                "黑名单用户 {}",
                event.user_id
            )));
        }
        if let Some(group_id) = event.group_id
            && self.config.groups.contains(&group_id)
        {
            return Ok(PreprocessResult::Cancel(format!("黑名单群组 {}", group_id)));
        }
        Ok(PreprocessResult::Continue)
    }
}

pub struct BlacklistPlugin;

impl Plugin for BlacklistPlugin {
    fn id(&self) -> &str {
        "blacklist"
    }

    fn name(&self) -> &str {
        "Blacklist System"
    }

    fn description(&self) -> &str {
        "忽略黑名单用户和群组的消息，拒绝他们的好友和加群请求"
    }

    fn priority(&self) -> i32 {
        -100
    }

    fn register(&self, registrar: &mut Registrar<'_>) {
        let config: BlacklistConfig = registrar.config().unwrap_or_default();
        registrar.event_handler(
            EventHandler::on_request("blacklist-requests", {
                let config = config.clone();
                move |session: RequestSession| {
                    let blocked = config.users.contains(&session.event().user_id);
                    async move {
                        if blocked {
                            session.reject("").await;
                        }
                        Ok(())
                    }
                }
            })
            .types(["friend", "group"]),
        );
        registrar.preprocessor(BlacklistFilter { config });
    }
}
