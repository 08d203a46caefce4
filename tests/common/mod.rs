//! 集成测试公共设施：记录发送内容的 Transport 与构建机器人的辅助函数

use async_trait::async_trait;
use huihua::Bot;
use huihua::command::{Command, CommandSession};
use huihua::config::{CoreConfig, CoreSettings, MarkerSpec};
use huihua::event::Event;
use huihua::transport::{SendOptions, Transport, TransportError};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// 记录所有发出的消息和 API 调用
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(Event, String)>>,
    actions: Mutex<Vec<(String, Value)>>,
}

#[allow(dead_code)]
impl RecordingTransport {
    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn last(&self) -> Option<String> {
        self.sent.lock().last().map(|(_, m)| m.clone())
    }

    pub fn targets(&self) -> Vec<Event> {
        self.sent.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    pub fn actions(&self) -> Vec<(String, Value)> {
        self.actions.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
        self.actions.lock().clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        event: &Event,
        message: &str,
        _options: &SendOptions,
    ) -> Result<Value, TransportError> {
        self.sent.lock().push((event.clone(), message.to_string()));
        Ok(Value::Null)
    }

    async fn call_action(&self, action: &str, params: Value) -> Result<Value, TransportError> {
        self.actions.lock().push((action.to_string(), params));
        Ok(Value::Null)
    }
}

/// 测试用核心配置：忙等待很短，其余保持默认
#[allow(dead_code)]
pub fn core_config() -> CoreConfig {
    CoreConfig {
        superusers: vec![1],
        session_busy_retries: 2,
        session_busy_retry_interval_ms: 10,
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn settings() -> CoreSettings {
    CoreSettings::from_config(&core_config()).expect("test config compiles")
}

/// 允许不带起始符的指令
#[allow(dead_code)]
pub fn optional_start_settings() -> CoreSettings {
    let cfg = CoreConfig {
        command_start: vec![MarkerSpec::from(""), MarkerSpec::from("/")],
        ..core_config()
    };
    CoreSettings::from_config(&cfg).expect("test config compiles")
}

#[allow(dead_code)]
pub fn bot_with(settings: CoreSettings, commands: Vec<Command>) -> (Bot, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let mut builder = Bot::builder()
        .settings(settings)
        .shared_transport(transport.clone());
    for command in commands {
        builder = builder.command(command);
    }
    (builder.build(), transport)
}

#[allow(dead_code)]
pub fn bot(commands: Vec<Command>) -> (Bot, Arc<RecordingTransport>) {
    bot_with(settings(), commands)
}

/// `/ping` -> `pong!`
#[allow(dead_code)]
pub fn ping() -> Command {
    Command::builder("ping", |s: CommandSession| async move {
        s.send("pong!").await?;
        Ok(())
    })
    .build()
}

/// 运行 `secs` 秒后回复 `done`
#[allow(dead_code)]
pub fn slow(secs: u64) -> Command {
    Command::builder("slow", move |s: CommandSession| async move {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        s.send("done").await?;
        Ok(())
    })
    .build()
}

/// 让出执行权直到 `cond` 成立
#[allow(dead_code)]
pub async fn until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
