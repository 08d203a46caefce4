use crate::BotResult;
use crate::bot::Bot;
use crate::command::{CommandOutcome, CommandRegistry, handle_command};
use crate::event::Event;
use crate::natural_language::{NlpRegistry, handle_natural_language};
use async_trait::async_trait;

// ============================================================================
// 消息预处理器
// ============================================================================

/// 预处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreprocessResult {
    /// 继续执行后续预处理器和消息处理
    Continue,
    /// 忽略这条消息
    Cancel(String),
}

/// 单条消息的处理上下文
///
/// 注册表是全局注册表的副本，在这里开关指令只对当前消息生效。
pub struct MessageContext {
    pub bot: Bot,
    pub commands: CommandRegistry,
    pub nlp: NlpRegistry,
}

/// 消息预处理器接口
#[async_trait]
pub trait MessagePreprocessor: Send + Sync {
    fn name(&self) -> &str;

    /// 优先级（数字越小越先执行）
    fn priority(&self) -> i32 {
        100
    }

    async fn process(
        &self,
        ctx: &mut MessageContext,
        event: &mut Event,
    ) -> BotResult<PreprocessResult>;
}

// ============================================================================
// 消息处理流程
// ============================================================================

/// 识别消息开头的机器人称呼，识别到则去掉称呼并视为在和机器人说话
fn check_calling_me_nickname(bot: &Bot, event: &mut Event) {
    let Some(re) = &bot.settings().nickname_regex else {
        return;
    };
    let Some(m) = re.find(&event.message) else {
        return;
    };
    crate::debug!(target: "message", "用户称呼了机器人: {}", m.as_str().trim_end());
    event.to_me = true;
    event.message = event.message[m.end()..].to_string();
}

fn log_message(event: &Event) {
    crate::info!(
        target: "message",
        "收到消息 {} 来自 {}: {}",
        event.message_id,
        event.source_label(),
        event.message
    );
}

/// 处理一条消息：预处理、指令、自然语言依次尝试
///
/// 返回消息最终是否被处理。
pub async fn handle_message(bot: &Bot, mut event: Event) -> bool {
    log_message(&event);

    if event.is_private() {
        event.to_me = true;
    }
    check_calling_me_nickname(bot, &mut event);

    let mut ctx = MessageContext {
        bot: bot.clone(),
        commands: bot.commands(),
        nlp: bot.nlp(),
    };

    for preprocessor in bot.preprocessors() {
        match preprocessor.process(&mut ctx, &mut event).await {
            Ok(PreprocessResult::Continue) => {}
            Ok(PreprocessResult::Cancel(reason)) => {
                crate::info!(target: "message", "消息 {} 被忽略: {}", event.message_id, reason);
                return false;
            }
            Err(e) => {
                crate::error!(target: "message", "预处理器 {} 出错: {}", preprocessor.name(), e);
            }
        }
    }

    loop {
        match handle_command(bot, &mut event, &ctx.commands).await {
            CommandOutcome::Switched(message) => {
                event.message = message;
                event.to_me = true;
                continue;
            }
            CommandOutcome::Done(true) => {
                crate::info!(target: "message", "消息 {} 作为指令处理", event.message_id);
                return true;
            }
            CommandOutcome::Done(false) => {}
        }

        match handle_natural_language(bot, &event, &ctx.nlp).await {
            CommandOutcome::Switched(message) => {
                event.message = message;
                event.to_me = true;
            }
            CommandOutcome::Done(true) => {
                crate::info!(target: "message", "消息 {} 作为自然语言处理", event.message_id);
                return true;
            }
            CommandOutcome::Done(false) => {
                crate::debug!(target: "message", "消息 {} 未被处理", event.message_id);
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoreConfig, CoreSettings};

    #[test]
    fn nickname_prefix_is_stripped() {
        let cfg = CoreConfig {
            nickname: vec!["小明".into(), "Bot".into()],
            ..Default::default()
        };
        let bot = Bot::builder()
            .settings(CoreSettings::from_config(&cfg).unwrap())
            .build();

        let mut e = Event::group(1, 2, "bot， 天气怎么样");
        check_calling_me_nickname(&bot, &mut e);
        assert!(e.to_me);
        assert_eq!(e.message, "天气怎么样");

        let mut e = Event::group(1, 2, "小明");
        check_calling_me_nickname(&bot, &mut e);
        assert!(e.to_me);
        assert_eq!(e.message, "");

        let mut e = Event::group(1, 2, "叫小明来");
        check_calling_me_nickname(&bot, &mut e);
        assert!(!e.to_me);
    }
}
