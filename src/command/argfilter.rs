use super::session::{CommandSession, Flow};
use crate::expression::{RenderArgs, render};
use futures_util::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, OnceLock};

/// 参数校验失败
#[derive(Debug, Clone, Default, thiserror::Error)]
#[error("{}", .message.as_deref().unwrap_or("validation failed"))]
pub struct ValidateError {
    /// 提示给用户的消息，为空时使用全局默认提示
    pub message: Option<String>,
}

impl ValidateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

/// 过滤器拒绝当前输入的方式
#[derive(Debug)]
pub enum Rejection {
    /// 输入不合法，计入失败次数并要求重新输入
    Invalid(ValidateError),
    /// 控制器直接改变会话流程，如取消
    Control(Flow),
}

impl From<ValidateError> for Rejection {
    fn from(e: ValidateError) -> Self {
        Rejection::Invalid(e)
    }
}

impl From<Flow> for Rejection {
    fn from(flow: Flow) -> Self {
        Rejection::Control(flow)
    }
}

pub type FilterResult = Result<Value, Rejection>;

type FilterFn = Arc<dyn Fn(Value, CommandSession) -> BoxFuture<'static, FilterResult> + Send + Sync>;

/// 参数过滤器
///
/// 按顺序作用在用户的输入上，前一个的输出是后一个的输入。
#[derive(Clone)]
pub struct ArgFilter(FilterFn);

impl ArgFilter {
    /// 同步过滤器
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value) -> FilterResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        ArgFilter(Arc::new(move |value, _session| {
            let f = f.clone();
            Box::pin(async move { f(value) })
        }))
    }

    /// 可以访问会话的异步过滤器
    pub fn new_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, CommandSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FilterResult> + Send + 'static,
    {
        ArgFilter(Arc::new(move |value, session| Box::pin(f(value, session))))
    }

    pub async fn apply(&self, value: Value, session: CommandSession) -> FilterResult {
        (self.0)(value, session).await
    }
}

impl std::fmt::Debug for ArgFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ArgFilter")
    }
}

// ============================================================================
// 控制器
// ============================================================================

static CANCEL_SHORT: OnceLock<Regex> = OnceLock::new();
static CANCEL_EXPLICIT: OnceLock<Regex> = OnceLock::new();

/// 判断一句话是否是取消指令，如「算了」「不用了」「帮我取消吧」
pub fn is_cancellation(sentence: &str) -> bool {
    let has_keyword = ["算", "别", "不", "停", "取消"]
        .iter()
        .any(|kw| sentence.contains(kw));
    if !has_keyword {
        return false;
    }
    let short = CANCEL_SHORT
        .get_or_init(|| Regex::new(r"^那?[算别不停]\w{0,3}了?吧?$").expect("Invalid Regex"));
    let explicit = CANCEL_EXPLICIT
        .get_or_init(|| Regex::new(r"^那?(?:[给帮]我)?取消了?吧?$").expect("Invalid Regex"));
    short.is_match(sentence) || explicit.is_match(sentence)
}

/// 用户要求取消时发送取消提示并结束会话，否则原样放行
pub fn handle_cancellation() -> ArgFilter {
    ArgFilter::new_async(|value: Value, session: CommandSession| async move {
        let cancelled = value.as_str().is_some_and(is_cancellation);
        if !cancelled {
            return Ok(value);
        }
        let text = render(
            &session.bot().settings().session_cancel_expression,
            &RenderArgs::new(),
        );
        match session.finish(Some(&text)).await {
            Ok(()) => Ok(value),
            Err(flow) => Err(Rejection::Control(flow)),
        }
    })
}

/// 去掉两端空白
pub fn strip() -> ArgFilter {
    ArgFilter::new(|value| match value {
        Value::String(s) => Ok(Value::String(s.trim().to_string())),
        other => Ok(other),
    })
}

/// 要求输入非空
pub fn not_empty(message: Option<&str>) -> ArgFilter {
    let message = message.map(str::to_string);
    ArgFilter::new(move |value| {
        let empty = match &value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            _ => false,
        };
        if empty {
            Err(ValidateError {
                message: message.clone(),
            }
            .into())
        } else {
            Ok(value)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_cancellation_phrases() {
        for s in ["算了", "算了吧", "不用了", "别", "停", "取消", "帮我取消吧", "那算了"] {
            assert!(is_cancellation(s), "{s} should cancel");
        }
        for s in ["合肥", "不是这个城市而是上海啊啊", "打算去北京", "取消订单号123"] {
            assert!(!is_cancellation(s), "{s} should not cancel");
        }
    }

    #[test]
    fn validate_error_display() {
        assert_eq!(ValidateError::new("格式不对").to_string(), "格式不对");
        assert_eq!(ValidateError::default().to_string(), "validation failed");
    }
}
