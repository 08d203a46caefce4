//! 文案表达式
//!
//! 配置中的提示语既可以是一句固定文本，也可以是若干候选（随机选一条），
//! 或者由代码动态生成。三者都通过 [`render`] 得到最终字符串。

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 动态文案生成函数，入参为渲染参数
pub type ComputeFn = Arc<dyn Fn(&RenderArgs) -> String + Send + Sync>;

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expression {
    Literal(String),
    OneOf(Vec<String>),
    #[serde(skip)]
    Computed(ComputeFn),
}

impl Expression {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&RenderArgs) -> String + Send + Sync + 'static,
    {
        Expression::Computed(Arc::new(f))
    }

    pub fn render(&self, args: &RenderArgs) -> String {
        render(self, args)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Expression::OneOf(v) => f.debug_tuple("OneOf").field(v).finish(),
            Expression::Computed(_) => f.write_str("Computed(<fn>)"),
        }
    }
}

impl From<&str> for Expression {
    fn from(s: &str) -> Self {
        Expression::Literal(s.to_string())
    }
}

impl From<String> for Expression {
    fn from(s: String) -> Self {
        Expression::Literal(s)
    }
}

impl From<Vec<String>> for Expression {
    fn from(v: Vec<String>) -> Self {
        Expression::OneOf(v)
    }
}

/// 渲染参数：位置参数对应 `{}`，命名参数对应 `{name}`
#[derive(Debug, Clone, Default)]
pub struct RenderArgs {
    positional: Vec<String>,
    named: Vec<(String, String)>,
}

impl RenderArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl ToString) -> Self {
        self.positional.push(value.to_string());
        self
    }

    pub fn named(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.named.push((key.into(), value.to_string()));
        self
    }

    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.named
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// 渲染表达式
///
/// `OneOf` 为空时渲染为空字符串。未知的占位符原样保留，`{{` / `}}` 转义为花括号。
pub fn render(expr: &Expression, args: &RenderArgs) -> String {
    let template = match expr {
        Expression::Literal(s) => s.clone(),
        Expression::OneOf(candidates) => candidates
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or_default(),
        Expression::Computed(f) => f(args),
    };
    format_template(&template, args)
}

fn format_template(template: &str, args: &RenderArgs) -> String {
    let mut out = String::with_capacity(template.len());
    let mut next_positional = 0usize;
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '{' => {
                if let Some(&(_, '{')) = chars.peek() {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let rest = &template[i + 1..];
                let Some(end) = rest.find('}') else {
                    out.push_str(&template[i..]);
                    break;
                };
                let key = &rest[..end];
                let replacement = if key.is_empty() {
                    let v = args.positional.get(next_positional).cloned();
                    next_positional += 1;
                    v
                } else if let Ok(idx) = key.parse::<usize>() {
                    args.positional.get(idx).cloned()
                } else {
                    args.get(key).map(String::from)
                };
                match replacement {
                    Some(v) => out.push_str(&v),
                    None => out.push_str(&template[i..i + end + 2]),
                }
                // 跳过占位符内容及右括号
                while let Some(&(j, _)) = chars.peek() {
                    if j > i + end + 1 {
                        break;
                    }
                    chars.next();
                }
            }
            '}' => {
                if let Some(&(_, '}')) = chars.peek() {
                    chars.next();
                }
                out.push('}');
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_with_positional_and_named() {
        let expr = Expression::from("你所查询的城市是{}，{name}");
        let args = RenderArgs::new().arg("合肥").named("name", "小明");
        assert_eq!(render(&expr, &args), "你所查询的城市是合肥，小明");
    }

    #[test]
    fn one_of_picks_a_candidate() {
        let candidates = vec!["你好，{u}！".to_string(), "欢迎，{u}～".to_string()];
        let expr = Expression::from(candidates);
        let out = render(&expr, &RenderArgs::new().named("u", "甲"));
        assert!(out == "你好，甲！" || out == "欢迎，甲～");
    }

    #[test]
    fn computed_receives_args() {
        let expr = Expression::computed(|a| format!("共 {} 项", a.positional().len()));
        assert_eq!(render(&expr, &RenderArgs::new().arg(1).arg(2)), "共 2 项");
    }

    #[test]
    fn unknown_placeholders_and_escapes_survive() {
        let expr = Expression::from("{{raw}} {missing} {0}");
        assert_eq!(render(&expr, &RenderArgs::new().arg("x")), "{raw} {missing} x");
    }

    #[test]
    fn deserializes_from_toml_shapes() {
        #[derive(Deserialize)]
        struct Holder {
            a: Expression,
            b: Expression,
        }
        let h: Holder = toml::from_str("a = \"好的\"\nb = [\"x\", \"y\"]").unwrap();
        assert!(matches!(h.a, Expression::Literal(ref s) if s == "好的"));
        assert!(matches!(h.b, Expression::OneOf(ref v) if v.len() == 2));
    }
}
