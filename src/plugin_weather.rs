use huihua::command::argfilter;
use huihua::prelude::*;
use rand::seq::IndexedRandom;
use serde::Deserialize;

/// 插件配置，对应配置文件中的 `[weather]`
#[derive(Debug, Clone, Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "default_reports")]
    pub reports: Vec<String>,
}

fn default_reports() -> Vec<String> {
    vec!["晴".to_string(), "多云".to_string(), "小雨".to_string()]
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            reports: default_reports(),
        }
    }
}

pub struct WeatherPlugin;

impl Plugin for WeatherPlugin {
    fn id(&self) -> &str {
        "weather"
    }
    fn name(&self) -> &str {
        "天气查询"
    }

    fn register(&self, registrar: &mut Registrar<'_>) {
        let config: WeatherConfig = registrar.config().unwrap_or_default();
        let reports = config.reports;

        let weather = Command::builder("weather", move |session: CommandSession| {
            let reports = reports.clone();
            async move {
                let city = session
                    .get(
                        "city",
                        Some("你想查询哪个城市的天气呢？"),
                        Some(vec![
                            argfilter::handle_cancellation(),
                            argfilter::strip(),
                            argfilter::not_empty(Some("要查询的城市名称不能为空呢，请重新输入")),
                        ]),
                    )
                    .await?;
                let report = reports
                    .choose(&mut rand::rng())
                    .cloned()
                    .unwrap_or_else(|| "晴".to_string());
                session
                    .send(&format!("{}的天气是……{}", city.as_str().unwrap_or_default(), report))
                    .await?;
                Ok(())
            }
        })
        .alias("天气")
        .args_parser(|session: CommandSession| async move {
            let text = session.current_arg_text();
            if session.is_first_run() && !text.is_empty() {
                session.state_set("city", text);
            }
            Ok(())
        })
        .build();

        let intent = NlProcessor::new("weather-intent", |session: NlpSession| async move {
            let text = session.msg_text().to_string();
            let city = text
                .split("天气")
                .next()
                .map(|s| s.trim_end_matches(['的', ' ']).trim())
                .filter(|s| !s.is_empty() && !s.contains("今天"));
            let mut intent = IntentCommand::new(64.0, "weather");
            if let Some(city) = city {
                let mut args = serde_json::Map::new();
                args.insert("city".to_string(), Value::from(city));
                intent = intent.with_args(args);
            }
            Ok(Some(intent))
        })
        .keywords(["天气"]);

        registrar.command(weather).nl_processor(intent);
    }
}
