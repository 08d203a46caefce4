mod common;

use common::{bot, bot_with, optional_start_settings, ping, settings, slow, until};
use huihua::command::{
    ArgFilter, Command, CommandName, CommandOutcome, CommandSession, Flow, Timeout, ValidateError,
    handle_cancellation,
};
use huihua::event::Event;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const BUSY: &str = "您有命令正在执行，请稍后再试";

fn weather_aget() -> Command {
    Command::builder("weather", |s: CommandSession| async move {
        let location = s
            .aget(Some("location"), Some("你想查询哪个城市的天气呢？"), None, false)
            .await?;
        s.send(&format!("{}的天气是晴", location.as_str().unwrap_or_default()))
            .await?;
        Ok(())
    })
    .build()
}

fn weather_get(runs: Arc<AtomicUsize>) -> Command {
    Command::builder("weather", move |s: CommandSession| {
        let runs = runs.clone();
        async move {
            let city = s.get("city", Some("城市？"), None).await?;
            runs.fetch_add(1, Ordering::SeqCst);
            s.send(&format!("{}：晴", city.as_str().unwrap_or_default()))
                .await?;
            Ok(())
        }
    })
    .args_parser(|s: CommandSession| async move {
        let arg = s.current_arg_text();
        if !s.is_first_run()
            && let Some(rest) = arg.strip_prefix("算了，")
        {
            return s.switch(rest);
        }
        Ok(())
    })
    .build()
}

#[tokio::test]
async fn ping_replies_and_leaves_no_session() {
    let (bot, sent) = bot(vec![ping()]);
    assert!(bot.handle_message(Event::private(2, "/ping")).await);
    assert_eq!(sent.messages(), ["pong!"]);
    assert!(bot.sessions().is_empty());
}

#[tokio::test]
async fn unknown_text_is_not_handled() {
    let (bot, sent) = bot(vec![ping()]);
    assert!(!bot.handle_message(Event::private(2, "hello")).await);
    assert!(!bot.handle_message(Event::private(2, "/pong")).await);
    assert!(sent.messages().is_empty());
}

#[tokio::test]
async fn aget_resumes_the_same_handler() {
    let (bot, sent) = bot(vec![weather_aget()]);

    assert!(bot.handle_message(Event::private(2, "/weather")).await);
    assert_eq!(sent.messages(), ["你想查询哪个城市的天气呢？"]);
    assert_eq!(bot.sessions().len(), 1);

    assert!(bot.handle_message(Event::private(2, "合肥")).await);
    assert_eq!(sent.last().as_deref(), Some("合肥的天气是晴"));
    assert_eq!(sent.messages().len(), 2);
    assert!(bot.sessions().is_empty());
}

#[tokio::test]
async fn get_reruns_handler_once_after_reply() {
    let runs = Arc::new(AtomicUsize::new(0));
    let (bot, sent) = bot(vec![weather_get(runs.clone())]);

    assert!(bot.handle_message(Event::private(2, "/weather")).await);
    assert_eq!(sent.messages(), ["城市？"]);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    assert!(bot.handle_message(Event::private(2, "合肥")).await);
    assert_eq!(sent.last().as_deref(), Some("合肥：晴"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(bot.sessions().is_empty());
}

#[tokio::test]
async fn get_is_idempotent_for_present_keys() {
    let cmd = Command::builder("twice", |s: CommandSession| async move {
        let a = s.get("city", Some("城市？"), None).await?;
        let b = s.get("city", Some("城市？"), None).await?;
        s.send(&format!("{}", a == b)).await?;
        Ok(())
    })
    .build();
    let (bot, sent) = bot(vec![cmd]);

    let mut args = Map::new();
    args.insert("city".to_string(), Value::from("合肥"));
    let outcome = bot
        .call_command(
            &Event::private(2, ""),
            &CommandName::from("twice"),
            "",
            Some(args),
            true,
            false,
        )
        .await;
    assert_eq!(outcome, CommandOutcome::Done(true));
    assert_eq!(sent.messages(), ["true"]);
}

#[tokio::test(start_paused = true)]
async fn busy_context_gets_notice_and_no_second_session() {
    let (bot, sent) = bot(vec![slow(10), ping()]);

    let first = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.handle_message(Event::private(2, "/slow")).await })
    };
    until(|| bot.sessions().get("/user/2").is_some_and(|s| s.running())).await;

    assert!(bot.handle_message(Event::private(2, "/ping")).await);
    assert_eq!(sent.messages(), [BUSY]);
    assert_eq!(bot.sessions().len(), 1);

    assert!(first.await.unwrap());
    assert_eq!(sent.last().as_deref(), Some("done"));
    assert!(bot.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn other_contexts_are_not_blocked() {
    let (bot, sent) = bot(vec![slow(10), ping()]);
    let first = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.handle_message(Event::private(2, "/slow")).await })
    };
    until(|| !bot.sessions().is_empty()).await;

    assert!(bot.handle_message(Event::private(3, "/ping")).await);
    assert_eq!(sent.messages(), ["pong!"]);
    first.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_replaced_by_fresh_command() {
    let ask = Command::builder("ask", |s: CommandSession| async move {
        let answer = s.aget(Some("answer"), Some("问题？"), None, false).await?;
        s.send(&format!("答案: {}", answer.as_str().unwrap_or_default()))
            .await?;
        Ok(())
    })
    .expire_timeout(Timeout::After(Duration::from_secs(5)))
    .build();
    let (bot, sent) = bot(vec![ask, ping()]);

    assert!(bot.handle_message(Event::private(2, "/ask")).await);
    assert_eq!(bot.sessions().len(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(bot.handle_message(Event::private(2, "/ping")).await);
    assert_eq!(sent.messages(), ["问题？", "pong!"]);
    assert!(bot.sessions().is_empty());

    // 重新开始的会话不带旧状态
    assert!(bot.handle_message(Event::private(2, "/ask")).await);
    assert_eq!(sent.last().as_deref(), Some("问题？"));
}

#[tokio::test(start_paused = true)]
async fn expired_get_session_does_not_resume() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut cfg = common::core_config();
    cfg.session_expire_timeout_secs = 5;
    let settings = huihua::config::CoreSettings::from_config(&cfg).unwrap();
    let (bot, sent) = bot_with(settings, vec![weather_get(runs.clone())]);

    assert!(bot.handle_message(Event::private(2, "/weather")).await);
    tokio::time::sleep(Duration::from_secs(6)).await;

    // 不是指令，也没有有效会话
    assert!(!bot.handle_message(Event::private(2, "合肥")).await);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(sent.messages(), ["城市？"]);
    assert!(bot.sessions().is_empty());
}

#[tokio::test]
async fn switch_redispatches_new_message_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let (bot, sent) = bot(vec![weather_get(runs.clone()), ping()]);

    assert!(bot.handle_message(Event::private(2, "/weather")).await);
    assert!(bot.handle_message(Event::private(2, "算了，/ping")).await);

    assert_eq!(sent.messages(), ["城市？", "pong!"]);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(bot.sessions().is_empty());
}

#[tokio::test]
async fn switch_releases_a_suspended_handler() {
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = finished.clone();
    let cmd = Command::builder("loop", move |s: CommandSession| {
        let counter = counter.clone();
        async move {
            let result = s.apause(Some("继续？")).await;
            counter.fetch_add(1, Ordering::SeqCst);
            result
        }
    })
    .args_parser(|s: CommandSession| async move {
        if !s.is_first_run() {
            return s.switch(s.current_arg());
        }
        Ok(())
    })
    .build();
    let (bot, sent) = bot(vec![cmd, ping()]);

    assert!(bot.handle_message(Event::private(2, "/loop")).await);
    assert!(bot.handle_message(Event::private(2, "/ping")).await);
    assert_eq!(sent.messages(), ["继续？", "pong!"]);

    // 挂起的处理器收到切换信号后退出
    until(|| finished.load(Ordering::SeqCst) == 1).await;
    assert!(bot.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn privileged_command_bypasses_busy_session() {
    let status = Command::builder("status", |s: CommandSession| async move {
        s.send("ok").await?;
        Ok(())
    })
    .privileged(true)
    .build();
    let (bot, sent) = bot(vec![slow(10), status]);

    let first = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.handle_message(Event::private(2, "/slow")).await })
    };
    until(|| !bot.sessions().is_empty()).await;

    assert!(bot.handle_message(Event::private(2, "/status")).await);
    assert_eq!(sent.messages(), ["ok"]);
    // 特权指令不会保存会话，也不会替换正在运行的会话
    assert_eq!(bot.sessions().len(), 1);
    first.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn kill_removes_running_session() {
    let kill = Command::builder("kill", |s: CommandSession| async move {
        let event = s.event();
        s.bot().kill_current_session(&event);
        Ok(())
    })
    .privileged(true)
    .build();
    let (bot, sent) = bot(vec![slow(10), kill, ping()]);

    let _first = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.handle_message(Event::private(2, "/slow")).await })
    };
    until(|| !bot.sessions().is_empty()).await;

    assert!(bot.handle_message(Event::private(2, "/kill")).await);
    assert!(bot.sessions().is_empty());

    assert!(bot.handle_message(Event::private(2, "/ping")).await);
    assert_eq!(sent.messages(), ["pong!"]);
}

#[tokio::test]
async fn kill_wakes_a_waiting_handler() {
    let woke = Arc::new(AtomicUsize::new(0));
    let counter = woke.clone();
    let cmd = Command::builder("wait", move |s: CommandSession| {
        let counter = counter.clone();
        async move {
            let result = s.aget(None, Some("等你"), None, true).await;
            if matches!(result, Err(Flow::Finish(true))) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            result.map(|_| ())
        }
    })
    .build();
    let (bot, _sent) = bot(vec![cmd]);

    assert!(bot.handle_message(Event::private(2, "/wait")).await);
    bot.kill_current_session(&Event::private(2, ""));
    until(|| woke.load(Ordering::SeqCst) == 1).await;
    assert!(bot.sessions().is_empty());
}

fn age_command() -> Command {
    let number = ArgFilter::new(|v| {
        let n = v
            .as_str()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .ok_or_else(|| ValidateError::new("请输入数字"))?;
        Ok(Value::from(n))
    });
    Command::builder("age", move |s: CommandSession| {
        let number = number.clone();
        async move {
            let age = s
                .aget(Some("age"), Some("几岁？"), Some(vec![number]), false)
                .await?;
            s.send(&format!("{}岁", age)).await?;
            Ok(())
        }
    })
    .build()
}

#[tokio::test]
async fn validation_failures_reprompt_until_cap() {
    let (bot, sent) = bot(vec![age_command()]);

    assert!(bot.handle_message(Event::private(2, "/age")).await);
    assert!(bot.handle_message(Event::private(2, "abc")).await);
    assert!(bot.handle_message(Event::private(2, "def")).await);
    assert_eq!(bot.sessions().len(), 1);
    assert!(bot.handle_message(Event::private(2, "ghi")).await);

    assert_eq!(
        sent.messages(),
        [
            "几岁？",
            "请输入数字",
            "请输入数字",
            "您输入错误太多次啦，如需重试，请重新触发本功能",
        ]
    );
    assert!(bot.sessions().is_empty());
}

#[tokio::test]
async fn valid_reply_after_failure_is_accepted() {
    let (bot, sent) = bot(vec![age_command()]);

    bot.handle_message(Event::private(2, "/age")).await;
    bot.handle_message(Event::private(2, "abc")).await;
    assert!(bot.handle_message(Event::private(2, "18")).await);

    assert_eq!(sent.messages(), ["几岁？", "请输入数字", "18岁"]);
    assert!(bot.sessions().is_empty());
}

#[tokio::test]
async fn cancellation_filter_ends_session() {
    let cmd = Command::builder("note", |s: CommandSession| async move {
        let note = s
            .aget(Some("note"), Some("记什么？"), Some(vec![handle_cancellation()]), false)
            .await?;
        s.send(&format!("记下了: {}", note.as_str().unwrap_or_default()))
            .await?;
        Ok(())
    })
    .build();
    let (bot, sent) = bot(vec![cmd]);

    bot.handle_message(Event::private(2, "/note")).await;
    assert!(bot.handle_message(Event::private(2, "算了吧")).await);
    assert_eq!(sent.messages(), ["记什么？", "好的"]);
    assert!(bot.sessions().is_empty());
}

#[tokio::test]
async fn pattern_command_receives_full_text() {
    let cmd = Command::builder("weather", |s: CommandSession| async move {
        s.send(&s.current_arg()).await?;
        Ok(())
    })
    .pattern("天气")
    .build();
    let echo = Command::builder("echo", |s: CommandSession| async move {
        s.send(&s.current_arg()).await?;
        Ok(())
    })
    .build();
    let (bot, sent) = bot_with(optional_start_settings(), vec![cmd, echo]);

    assert!(bot.handle_message(Event::private(2, "今天合肥天气怎么样")).await);
    assert!(bot.handle_message(Event::private(2, "/echo hello")).await);
    assert!(bot.handle_message(Event::private(2, "echo hello")).await);
    assert_eq!(
        sent.messages(),
        ["今天合肥天气怎么样", "hello", "hello"]
    );
}

#[tokio::test]
async fn permission_denied_is_not_handled() {
    let cmd = Command::builder("secret", |s: CommandSession| async move {
        s.send("secret").await?;
        Ok(())
    })
    .permission(huihua::permission::Permission::from_fn(|r| r.is_superuser))
    .build();
    let (bot, sent) = bot(vec![cmd]);

    assert!(!bot.handle_message(Event::private(2, "/secret")).await);
    assert!(bot.sessions().is_empty());
    assert!(bot.handle_message(Event::private(1, "/secret")).await);
    assert_eq!(sent.messages(), ["secret"]);
}

#[tokio::test]
async fn group_commands_require_addressing() {
    let (bot, sent) = bot(vec![ping()]);
    assert!(!bot.handle_message(Event::group(9, 2, "/ping")).await);
    assert!(bot.handle_message(Event::group(9, 2, "/ping").with_to_me(true)).await);
    assert_eq!(sent.messages(), ["pong!"]);
}

#[tokio::test]
async fn handler_errors_end_session_as_handled() {
    let failing = Command::builder("fail", |_s: CommandSession| async move {
        let n: i32 = "not a number".parse()?;
        let _ = n;
        Ok(())
    })
    .build();
    let panicking = Command::builder("panic", |s: CommandSession| async move {
        if s.current_arg().is_empty() {
            panic!("handler blew up");
        }
        Ok(())
    })
    .build();
    let (bot, _sent) = bot(vec![failing, panicking]);

    assert!(bot.handle_message(Event::private(2, "/fail")).await);
    assert!(bot.sessions().is_empty());
    assert!(bot.handle_message(Event::private(2, "/panic")).await);
    assert!(bot.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_timeout_finishes_as_handled() {
    let stuck = Command::builder("stuck", |s: CommandSession| async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        s.send("too late").await?;
        Ok(())
    })
    .run_timeout(Timeout::After(Duration::from_secs(1)))
    .build();
    let (bot, sent) = bot(vec![stuck, ping()]);

    assert!(bot.handle_message(Event::private(2, "/stuck")).await);
    assert!(bot.sessions().is_empty());
    assert!(bot.handle_message(Event::private(2, "/ping")).await);
    assert_eq!(sent.messages(), ["pong!"]);
}

#[tokio::test]
async fn disabled_interaction_treats_pause_as_failure() {
    let (bot, sent) = bot(vec![weather_aget()]);
    let outcome = bot
        .call_command(
            &Event::private(2, ""),
            &CommandName::from("weather"),
            "",
            None,
            true,
            true,
        )
        .await;
    assert_eq!(outcome, CommandOutcome::Done(false));
    assert_eq!(sent.messages(), ["你想查询哪个城市的天气呢？"]);
    assert!(bot.sessions().is_empty());
}

#[tokio::test]
async fn shell_like_fills_argv() {
    let cmd = Command::builder("args", |s: CommandSession| async move {
        s.send(&s.argv().join("|")).await?;
        Ok(())
    })
    .shell_like()
    .build();
    let (bot, sent) = bot_with(settings(), vec![cmd]);

    bot.handle_message(Event::private(2, r#"/args one "two three" four"#)).await;
    assert_eq!(sent.messages(), ["one|two three|four"]);
}

#[tokio::test(start_paused = true)]
async fn resumed_handler_keeps_session_busy() {
    let starts = Arc::new(AtomicUsize::new(0));
    let counter = starts.clone();
    let cmd = Command::builder("loop", move |s: CommandSession| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            // 与第二条消息的忙等待同时醒来
            tokio::time::sleep(Duration::from_millis(10)).await;
            s.apause(None).await?;
            tokio::time::sleep(Duration::from_secs(5)).await;
            s.send("第二轮结束").await?;
            Ok(())
        }
    })
    .build();
    let (bot, sent) = bot(vec![cmd, ping()]);

    let first = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.handle_message(Event::private(2, "/loop")).await })
    };
    until(|| !bot.sessions().is_empty()).await;
    let second = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.handle_message(Event::private(2, "继续")).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(first.await.unwrap());
    let session = bot.sessions().get("/user/2").expect("session stays stored");
    assert!(session.running(), "handler is in its second turn");

    assert!(bot.handle_message(Event::private(2, "/ping")).await);
    assert_eq!(sent.messages(), [BUSY]);
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    assert!(second.await.unwrap());
    assert_eq!(sent.messages(), [BUSY, "第二轮结束"]);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert!(bot.sessions().is_empty());
}

#[tokio::test]
async fn unbalanced_quotes_end_shell_like_session() {
    let cmd = Command::builder("args", |s: CommandSession| async move {
        s.send(&s.argv().join("|")).await?;
        Ok(())
    })
    .shell_like()
    .build();
    let (bot, sent) = bot(vec![cmd]);

    assert!(bot.handle_message(Event::private(2, r#"/args one "two"#)).await);
    assert!(sent.messages().is_empty());
    assert!(bot.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn abandoned_handler_leaves_newer_session_alone() {
    let stuck = Command::builder("stuck", |s: CommandSession| async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        // 运行超时后才走到这里
        let late = s.aget(Some("late"), Some("迟到的提问"), None, false).await?;
        s.send(&format!("迟到的回复: {}", late)).await?;
        Ok(())
    })
    .run_timeout(Timeout::After(Duration::from_secs(1)))
    .build();
    let ask = Command::builder("ask", |s: CommandSession| async move {
        let answer = s.aget(Some("answer"), Some("问题？"), None, false).await?;
        s.send(&format!("答案: {}", answer.as_str().unwrap_or_default()))
            .await?;
        Ok(())
    })
    .build();
    let (bot, sent) = bot(vec![stuck, ask]);

    assert!(bot.handle_message(Event::private(2, "/stuck")).await);
    assert!(bot.sessions().is_empty());

    assert!(bot.handle_message(Event::private(2, "/ask")).await);
    // 被放弃的处理器在此期间醒来并尝试继续交互
    tokio::time::sleep(Duration::from_secs(5)).await;

    let stored = bot.sessions().get("/user/2").expect("newer session stays stored");
    assert_eq!(stored.command().name, CommandName::from("ask"));
    assert!(!stored.running());
    assert_eq!(sent.messages(), ["问题？"]);

    assert!(bot.handle_message(Event::private(2, "42")).await);
    assert_eq!(sent.messages(), ["问题？", "答案: 42"]);
    assert!(bot.sessions().is_empty());
}
