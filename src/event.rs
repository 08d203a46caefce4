use serde::{Deserialize, Serialize};

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Private,
    Group,
    Discuss,
}

/// 上报类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    #[default]
    Message,
    Notice,
    Request,
}

/// OneBot 事件
///
/// 字段命名与 OneBot v11 上报格式保持一致，可直接由上报 JSON 反序列化。
/// 消息、通知、请求共用同一结构，不相关的字段为空。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Event {
    #[serde(default)]
    pub post_type: PostType,
    #[serde(default)]
    pub self_id: i64,
    #[serde(default)]
    pub message_id: i64,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    /// 请求的标识，处理请求时原样带回
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    /// 请求附带的验证信息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discuss_id: Option<i64>,
    /// 消息内容
    #[serde(default)]
    pub message: String,
    /// 是否在和机器人说话
    #[serde(default)]
    pub to_me: bool,
}

impl Event {
    pub fn private(user_id: i64, message: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Private,
            user_id,
            message: message.into(),
            to_me: true,
            ..Default::default()
        }
    }

    pub fn group(group_id: i64, user_id: i64, message: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Group,
            user_id,
            group_id: Some(group_id),
            message: message.into(),
            ..Default::default()
        }
    }

    /// 通知事件，如 `group_increase`
    pub fn notice(notice_type: impl Into<String>, user_id: i64) -> Self {
        Self {
            post_type: PostType::Notice,
            notice_type: Some(notice_type.into()),
            user_id,
            ..Default::default()
        }
    }

    /// 请求事件，如 `friend`、`group`
    pub fn request(request_type: impl Into<String>, user_id: i64, flag: impl Into<String>) -> Self {
        Self {
            post_type: PostType::Request,
            request_type: Some(request_type.into()),
            user_id,
            flag: Some(flag.into()),
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group_id: i64) -> Self {
        self.group_id = Some(group_id);
        if self.post_type != PostType::Message {
            self.message_type = MessageType::Group;
        }
        self
    }

    pub fn with_sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_to_me(mut self, to_me: bool) -> Self {
        self.to_me = to_me;
        self
    }

    pub fn is_private(&self) -> bool {
        self.message_type == MessageType::Private
    }

    /// 事件名，如 `message.group`、`notice.group_increase.approve`
    ///
    /// 订阅某个事件名的处理器也会收到它的所有子事件。
    pub fn name(&self) -> String {
        let (post, detail) = match self.post_type {
            PostType::Message => (
                "message",
                Some(
                    match self.message_type {
                        MessageType::Private => "private",
                        MessageType::Group => "group",
                        MessageType::Discuss => "discuss",
                    }
                    .to_string(),
                ),
            ),
            PostType::Notice => ("notice", self.notice_type.clone()),
            PostType::Request => ("request", self.request_type.clone()),
        };
        let mut name = post.to_string();
        for part in [detail, self.sub_type.clone()].into_iter().flatten() {
            if part.is_empty() {
                break;
            }
            name.push('.');
            name.push_str(&part);
        }
        name
    }

    /// 日志用的来源描述，如 `10000@[群:123]`
    pub fn source_label(&self) -> String {
        let mut from = self.user_id.to_string();
        match self.message_type {
            MessageType::Group => {
                if let Some(g) = self.group_id {
                    from.push_str(&format!("@[群:{}]", g));
                }
            }
            MessageType::Discuss => {
                if let Some(d) = self.discuss_id {
                    from.push_str(&format!("@[讨论组:{}]", d));
                }
            }
            MessageType::Private => {}
        }
        from
    }
}

/// 上下文 ID 的计算模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextMode {
    /// 每个 (群/讨论组, 用户) 组合各自独立
    #[default]
    Default,
    /// 同一个群或讨论组共享
    Group,
    /// 同一个用户跨群共享
    User,
}

/// 计算事件所属会话的唯一 ID，作为会话存储的键
pub fn context_id(event: &Event, mode: ContextMode, use_hash: bool) -> String {
    let mut ctx_id = String::new();
    match mode {
        ContextMode::Default => {
            if let Some(g) = event.group_id.filter(|g| *g != 0) {
                ctx_id = format!("/group/{}", g);
            } else if let Some(d) = event.discuss_id.filter(|d| *d != 0) {
                ctx_id = format!("/discuss/{}", d);
            }
            if event.user_id != 0 {
                ctx_id.push_str(&format!("/user/{}", event.user_id));
            }
        }
        ContextMode::Group => {
            if let Some(g) = event.group_id.filter(|g| *g != 0) {
                ctx_id = format!("/group/{}", g);
            } else if let Some(d) = event.discuss_id.filter(|d| *d != 0) {
                ctx_id = format!("/discuss/{}", d);
            } else if event.user_id != 0 {
                ctx_id = format!("/user/{}", event.user_id);
            }
        }
        ContextMode::User => {
            if event.user_id != 0 {
                ctx_id = format!("/user/{}", event.user_id);
            }
        }
    }

    if use_hash && !ctx_id.is_empty() {
        ctx_id = format!("{:x}", md5::compute(ctx_id.as_bytes()));
    }
    ctx_id
}
