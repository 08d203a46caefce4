use huihua::command::argfilter::{self, ValidateError};
use huihua::prelude::*;

pub struct SurveyPlugin;

fn score_filter() -> ArgFilter {
    ArgFilter::new(|value| {
        let score = value
            .as_str()
            .and_then(|s| s.trim().parse::<u8>().ok())
            .filter(|n| (1..=10).contains(n))
            .ok_or_else(|| ValidateError::new("请输入 1 到 10 之间的整数"))?;
        Ok(Value::from(score))
    })
}

async fn survey(session: CommandSession) -> CommandResult {
    let name = session
        .aget(
            Some("name"),
            Some("你好！欢迎参加体验调查。请问你的名字是？"),
            Some(vec![
                argfilter::handle_cancellation(),
                argfilter::strip(),
                argfilter::not_empty(Some("名字不能为空哦")),
            ]),
            false,
        )
        .await?;
    let name = name.as_str().unwrap_or_default().to_string();

    let score = session
        .aget(
            Some("score"),
            Some(&format!("好的 {}，请问你给这个框架打几分 (1-10)？", name)),
            Some(vec![argfilter::handle_cancellation(), score_filter()]),
            false,
        )
        .await?;

    session
        .finish(Some(&format!(
            "调查完成！感谢反馈。\n姓名: {}\n评分: {}",
            name, score
        )))
        .await
}

impl Plugin for SurveyPlugin {
    fn id(&self) -> &str {
        "survey"
    }
    fn name(&self) -> &str {
        "Survey Demo"
    }
    fn description(&self) -> &str {
        "Demonstrates multi-turn conversation"
    }

    fn register(&self, registrar: &mut Registrar<'_>) {
        registrar.command(Command::builder("survey", survey).alias("调查").build());
    }
}
