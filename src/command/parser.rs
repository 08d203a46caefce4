use super::registry::{Command, CommandName, CommandRegistry};
use crate::config::{CoreSettings, Marker};
use std::sync::Arc;

/// 找出最长的起始符
fn match_start<'a>(markers: &[Marker], text: &'a str) -> Option<&'a str> {
    let mut matched: Option<&str> = None;
    for marker in markers {
        let current = match marker {
            Marker::Literal(s) => text.starts_with(s.as_str()).then(|| &text[..s.len()]),
            Marker::Pattern(re) => re.find(text).filter(|m| m.start() == 0).map(|m| m.as_str()),
        };
        if let Some(current) = current
            && matched.is_none_or(|m| current.len() > m.len())
        {
            matched = Some(current);
        }
    }
    matched
}

/// 用各分隔符切分指令名，取段数最多的结果
fn split_name(separators: &[Marker], name_text: &str) -> CommandName {
    let mut best: Option<Vec<String>> = None;
    for sep in separators {
        let current: Vec<String> = match sep {
            Marker::Literal(s) if s.is_empty() => continue,
            Marker::Literal(s) => name_text.split(s.as_str()).map(str::to_string).collect(),
            Marker::Pattern(re) => re.split(name_text).map(str::to_string).collect(),
        };
        if best.as_ref().is_none_or(|b| current.len() > b.len()) {
            best = Some(current);
        }
    }
    CommandName::from(best.unwrap_or_else(|| vec![name_text.to_string()]))
}

/// 把文本解析为指令及其参数
///
/// 依次尝试指令名、别名、正则。由正则匹配到的指令，参数是去掉起始符后的完整文本；
/// 其他情况参数是指令名之后的剩余部分。
pub fn parse_command(
    settings: &CoreSettings,
    registry: &CommandRegistry,
    text: &str,
) -> Option<(Arc<Command>, String)> {
    crate::debug!(target: "command", "解析指令: {:?}", text);

    let Some(start) = match_start(&settings.command_start, text) else {
        crate::debug!(target: "command", "不是指令");
        return None;
    };
    crate::debug!(target: "command", "匹配到起始符: {:?}", start);

    let full_command = text[start.len()..].trim_start();
    if full_command.is_empty() {
        return None;
    }

    let (name_text, remained) = match full_command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim_start()),
        None => (full_command, ""),
    };

    let name = split_name(&settings.command_sep, name_text);
    crate::debug!(target: "command", "指令名: {}", name);

    if let Some(cmd) = registry.find_command(&name) {
        return Some((cmd, remained.to_string()));
    }
    if let Some(cmd) = registry.find_alias(name_text) {
        crate::debug!(target: "command", "别名 {} 指向指令 {}", name_text, cmd.name);
        return Some((cmd, remained.to_string()));
    }
    registry
        .find_pattern(full_command)
        .map(|cmd| (cmd, full_command.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSession;
    use crate::config::{CoreConfig, MarkerSpec};

    fn registry() -> CommandRegistry {
        let mut reg = CommandRegistry::new();
        let noop = |_s: CommandSession| async { Ok(()) };
        reg.add_command(Command::builder("echo", noop).build());
        reg.add_command(Command::builder(["note", "add"], noop).alias("记笔记").build());
        reg.add_command(Command::builder("weather", noop).pattern(r"天气$").build());
        reg
    }

    fn settings(start: &[&str], sep: &[&str]) -> CoreSettings {
        let cfg = CoreConfig {
            command_start: start.iter().map(|s| MarkerSpec::from(*s)).collect(),
            command_sep: sep.iter().map(|s| MarkerSpec::from(*s)).collect(),
            ..Default::default()
        };
        CoreSettings::from_config(&cfg).unwrap()
    }

    #[test]
    fn longest_start_marker_wins() {
        let markers = settings(&["", "/", "//"], &[]).command_start;
        assert_eq!(match_start(&markers, "//echo"), Some("//"));
        assert_eq!(match_start(&markers, "/echo"), Some("/"));
        assert_eq!(match_start(&markers, "echo"), Some(""));
        assert_eq!(match_start(&settings(&["/"], &[]).command_start, "echo"), None);
    }

    #[test]
    fn regex_start_must_match_at_beginning() {
        let cfg = CoreConfig {
            command_start: vec![MarkerSpec::Regex {
                regex: "[#＃]+".to_string(),
            }],
            ..Default::default()
        };
        let s = CoreSettings::from_config(&cfg).unwrap();
        assert_eq!(match_start(&s.command_start, "##echo"), Some("##"));
        assert_eq!(match_start(&s.command_start, "echo#"), None);
    }

    #[test]
    fn separator_with_most_segments_wins() {
        let s = settings(&["/"], &["/", "."]);
        assert_eq!(split_name(&s.command_sep, "note.add").segments(), ["note", "add"]);
        assert_eq!(split_name(&s.command_sep, "a/b.c").segments(), ["a", "b.c"]);
        assert_eq!(split_name(&settings(&["/"], &[""]).command_sep, "x").segments(), ["x"]);
    }

    #[test]
    fn parses_name_and_remainder() {
        let s = settings(&["/"], &["."]);
        let reg = registry();

        let (cmd, arg) = parse_command(&s, &reg, "/echo  hello  world ").unwrap();
        assert_eq!(cmd.name, CommandName::from("echo"));
        assert_eq!(arg, "hello  world ");

        let (cmd, arg) = parse_command(&s, &reg, "/note.add 买牛奶").unwrap();
        assert_eq!(cmd.name, CommandName::from(["note", "add"]));
        assert_eq!(arg, "买牛奶");

        let (cmd, _) = parse_command(&s, &reg, "/ 记笔记 x").unwrap();
        assert_eq!(cmd.name, CommandName::from(["note", "add"]));

        assert!(parse_command(&s, &reg, "/").is_none());
        assert!(parse_command(&s, &reg, "/unknown").is_none());
        assert!(parse_command(&s, &reg, "echo").is_none());
    }

    #[test]
    fn pattern_match_receives_full_text() {
        let s = settings(&["", "/"], &["."]);
        let (cmd, arg) = parse_command(&s, &registry(), "/明天 合肥 天气").unwrap();
        assert_eq!(cmd.name, CommandName::from("weather"));
        assert_eq!(arg, "明天 合肥 天气");
    }

    #[test]
    fn disabled_commands_are_invisible() {
        let s = settings(&["/"], &["."]);
        let mut reg = registry();
        reg.switch_command(&CommandName::from("echo"), Some(false));
        assert!(parse_command(&s, &reg, "/echo hi").is_none());
    }
}
