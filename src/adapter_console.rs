use huihua::prelude::*;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// 控制台适配器：标准输入的每一行视为一条私聊消息，回复打印到标准输出
pub struct ConsoleAdapter {
    user_id: i64,
    msg_seq: AtomicI64,
}

impl ConsoleAdapter {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            msg_seq: AtomicI64::new(0),
        }
    }

    /// 开始读取标准输入，输入 `/exit` 或遇到 EOF 时关闭事件通道
    pub fn start(self: std::sync::Arc<Self>, event_tx: mpsc::Sender<Event>) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(text)) => {
                        let content = text.trim().to_string();
                        if content.is_empty() {
                            continue;
                        }
                        if content == "/exit" {
                            break;
                        }

                        let msg_id = self.msg_seq.fetch_add(1, Ordering::Relaxed) + 1;
                        let event = Event::private(self.user_id, content).with_message_id(msg_id);
                        if let Err(e) = event_tx.send(event).await {
                            huihua::error!(target: "console", "发送事件失败: {}", e);
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        huihua::error!(target: "console", "读取输入错误: {}", e);
                        break;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Transport for ConsoleAdapter {
    async fn send(
        &self,
        event: &Event,
        message: &str,
        options: &SendOptions,
    ) -> Result<Value, TransportError> {
        let seq = self.msg_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let prefix = if options.at_sender && !event.is_private() {
            format!("@{} ", event.user_id)
        } else {
            String::new()
        };
        println!("\x1b[35m[Bot]\x1b[0m {}{}", prefix, message);
        Ok(json!({ "message_id": seq }))
    }

    async fn call_action(&self, action: &str, params: Value) -> Result<Value, TransportError> {
        println!("\x1b[35m[Bot]\x1b[0m 调用 {}: {}", action, params);
        Ok(Value::Null)
    }
}
