mod adapter_console;

mod plugin_admin;
mod plugin_blacklist;
mod plugin_echo;
mod plugin_survey;
mod plugin_weather;

use huihua::Bot;
use huihua::config::ConfigManager;
use std::sync::Arc;
use tokio::sync::mpsc;

use adapter_console::ConsoleAdapter;

use plugin_admin::AdminPlugin;
use plugin_blacklist::BlacklistPlugin;
use plugin_echo::EchoPlugin;
use plugin_survey::SurveyPlugin;
use plugin_weather::WeatherPlugin;

/// 控制台里的用户 ID
const CONSOLE_USER: i64 = 10000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("╔═══════════════════════════════════════════════════╗");
    println!("║     Huihua - 会话式指令机器人                     ║");
    println!("╚═══════════════════════════════════════════════════╝");
    println!();

    let config = ConfigManager::new("config.toml")
        .load()
        .await
        .map_err(|e| anyhow::anyhow!("加载配置失败: {}", e))?;

    let console = Arc::new(ConsoleAdapter::new(CONSOLE_USER));

    let bot = Bot::builder()
        .config(config)?
        .shared_transport(console.clone())
        .plugin(BlacklistPlugin)
        .plugin(AdminPlugin)
        .plugin(EchoPlugin)
        .plugin(SurveyPlugin)
        .plugin(WeatherPlugin)
        .build();

    let (event_tx, event_rx) = mpsc::channel(1000);
    console.start(event_tx);

    huihua::info!("输入消息与机器人对话，输入 /exit 退出");
    bot.run(event_rx).await;
    Ok(())
}
