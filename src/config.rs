use crate::BotResult;
use crate::expression::Expression;
use crate::permission::Permission;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid regex marker `{pattern}`: {source}")]
    InvalidMarker {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid nickname list: {0}")]
    InvalidNickname(#[source] regex::Error),
}

// ============================================================================
// 配置文件结构
// ============================================================================

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 核心配置
    #[serde(default)]
    pub core: CoreConfig,
    /// 插件配置（使用 flatten 支持任意插件配置）
    #[serde(flatten)]
    pub plugins: HashMap<String, toml::Value>,
}

/// 指令起始符 / 分隔符：字面量或正则
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MarkerSpec {
    Literal(String),
    Regex { regex: String },
}

impl From<&str> for MarkerSpec {
    fn from(s: &str) -> Self {
        MarkerSpec::Literal(s.to_string())
    }
}

/// 核心配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// 调试模式，开启后输出 Debug 日志
    #[serde(default)]
    pub debug: bool,
    /// 超级用户
    #[serde(default)]
    pub superusers: Vec<i64>,
    /// 机器人的称呼，用于判断用户是否在和机器人说话
    #[serde(default)]
    pub nickname: Vec<String>,
    /// 指令起始符，`""` 表示可以不带起始符
    #[serde(default = "default_command_start")]
    pub command_start: Vec<MarkerSpec>,
    /// 指令名分隔符，如 `note.add` -> ("note", "add")
    #[serde(default = "default_command_sep")]
    pub command_sep: Vec<MarkerSpec>,
    /// 会话过期时间（秒），0 表示不过期
    #[serde(default = "default_expire_timeout")]
    pub session_expire_timeout_secs: u64,
    /// 单次运行超时（秒），0 表示不限制
    #[serde(default)]
    pub session_run_timeout_secs: u64,
    /// 会话忙时的重试次数
    #[serde(default = "default_busy_retries")]
    pub session_busy_retries: u32,
    /// 会话忙时的重试间隔（毫秒）
    #[serde(default = "default_busy_interval")]
    pub session_busy_retry_interval_ms: u64,
    #[serde(default = "default_short_message_max_length")]
    pub short_message_max_length: usize,
    /// 参数校验最大失败次数，0 表示不限制
    #[serde(default = "default_max_validation_failures")]
    pub max_validation_failures: u32,
    /// 自然语言意图的最低置信度
    #[serde(default = "default_nlp_threshold")]
    pub nlp_confidence_threshold: f64,
    #[serde(default = "default_session_running_expression")]
    pub session_running_expression: Expression,
    #[serde(default = "default_validation_failure_expression")]
    pub default_validation_failure_expression: Expression,
    #[serde(default = "default_too_many_failures_expression")]
    pub too_many_validation_failures_expression: Expression,
    #[serde(default = "default_cancel_expression")]
    pub session_cancel_expression: Expression,
}

fn default_command_start() -> Vec<MarkerSpec> {
    ["/", "!", "／", "！"].into_iter().map(MarkerSpec::from).collect()
}

fn default_command_sep() -> Vec<MarkerSpec> {
    ["/", "."].into_iter().map(MarkerSpec::from).collect()
}

fn default_expire_timeout() -> u64 {
    5 * 60
}

fn default_busy_retries() -> u32 {
    5
}

fn default_busy_interval() -> u64 {
    300
}

fn default_short_message_max_length() -> usize {
    50
}

fn default_max_validation_failures() -> u32 {
    3
}

fn default_nlp_threshold() -> f64 {
    60.0
}

fn default_session_running_expression() -> Expression {
    Expression::from("您有命令正在执行，请稍后再试")
}

fn default_validation_failure_expression() -> Expression {
    Expression::from("您的输入不符合要求，请重新输入")
}

fn default_too_many_failures_expression() -> Expression {
    Expression::from("您输入错误太多次啦，如需重试，请重新触发本功能")
}

fn default_cancel_expression() -> Expression {
    Expression::from("好的")
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            debug: false,
            superusers: Vec::new(),
            nickname: Vec::new(),
            command_start: default_command_start(),
            command_sep: default_command_sep(),
            session_expire_timeout_secs: default_expire_timeout(),
            session_run_timeout_secs: 0,
            session_busy_retries: default_busy_retries(),
            session_busy_retry_interval_ms: default_busy_interval(),
            short_message_max_length: default_short_message_max_length(),
            max_validation_failures: default_max_validation_failures(),
            nlp_confidence_threshold: default_nlp_threshold(),
            session_running_expression: default_session_running_expression(),
            default_validation_failure_expression: default_validation_failure_expression(),
            too_many_validation_failures_expression: default_too_many_failures_expression(),
            session_cancel_expression: default_cancel_expression(),
        }
    }
}

impl AppConfig {
    /// 获取指定插件的配置
    pub fn get_plugin_config<T: for<'de> Deserialize<'de>>(&self, plugin_id: &str) -> Option<T> {
        self.plugins
            .get(plugin_id)
            .and_then(|v| v.clone().try_into().ok())
    }
}

// ============================================================================
// 运行时配置
// ============================================================================

/// 编译后的起始符 / 分隔符
#[derive(Debug, Clone)]
pub enum Marker {
    Literal(String),
    Pattern(Regex),
}

impl Marker {
    fn compile(spec: &MarkerSpec) -> Result<Self, ConfigError> {
        match spec {
            MarkerSpec::Literal(s) => Ok(Marker::Literal(s.clone())),
            MarkerSpec::Regex { regex } => Regex::new(regex)
                .map(Marker::Pattern)
                .map_err(|source| ConfigError::InvalidMarker {
                    pattern: regex.clone(),
                    source,
                }),
        }
    }
}

/// 框架运行时使用的核心设置
///
/// 由 [`CoreConfig`] 编译而来：正则已编译、时长已换算，并附带无法写进配置文件的
/// 默认权限策略。
#[derive(Clone)]
pub struct CoreSettings {
    pub debug: bool,
    pub superusers: Vec<i64>,
    pub nickname: Vec<String>,
    pub(crate) nickname_regex: Option<Regex>,
    pub command_start: Vec<Marker>,
    pub command_sep: Vec<Marker>,
    pub session_expire_timeout: Option<Duration>,
    pub session_run_timeout: Option<Duration>,
    pub session_busy_retries: u32,
    pub session_busy_retry_interval: Duration,
    pub short_message_max_length: usize,
    pub max_validation_failures: u32,
    pub nlp_confidence_threshold: f64,
    pub session_running_expression: Expression,
    pub default_validation_failure_expression: Expression,
    pub too_many_validation_failures_expression: Expression,
    pub session_cancel_expression: Expression,
    pub default_command_permission: Permission,
    pub default_nlp_permission: Permission,
}

impl CoreSettings {
    pub fn from_config(cfg: &CoreConfig) -> Result<Self, ConfigError> {
        let compile_all = |specs: &[MarkerSpec]| -> Result<Vec<Marker>, ConfigError> {
            specs.iter().map(Marker::compile).collect()
        };

        let nicknames: Vec<&str> = cfg
            .nickname
            .iter()
            .map(String::as_str)
            .filter(|n| !n.is_empty())
            .collect();
        let nickname_regex = if nicknames.is_empty() {
            None
        } else {
            let alternatives = nicknames
                .iter()
                .map(|n| regex::escape(n))
                .collect::<Vec<_>>()
                .join("|");
            let re = Regex::new(&format!(r"(?i)^({})([\s,，]*|$)", alternatives))
                .map_err(ConfigError::InvalidNickname)?;
            Some(re)
        };

        let secs = |s: u64| (s > 0).then(|| Duration::from_secs(s));

        Ok(Self {
            debug: cfg.debug,
            superusers: cfg.superusers.clone(),
            nickname: cfg.nickname.clone(),
            nickname_regex,
            command_start: compile_all(&cfg.command_start)?,
            command_sep: compile_all(&cfg.command_sep)?,
            session_expire_timeout: secs(cfg.session_expire_timeout_secs),
            session_run_timeout: secs(cfg.session_run_timeout_secs),
            session_busy_retries: cfg.session_busy_retries,
            session_busy_retry_interval: Duration::from_millis(cfg.session_busy_retry_interval_ms),
            short_message_max_length: cfg.short_message_max_length,
            max_validation_failures: cfg.max_validation_failures,
            nlp_confidence_threshold: cfg.nlp_confidence_threshold,
            session_running_expression: cfg.session_running_expression.clone(),
            default_validation_failure_expression: cfg
                .default_validation_failure_expression
                .clone(),
            too_many_validation_failures_expression: cfg
                .too_many_validation_failures_expression
                .clone(),
            session_cancel_expression: cfg.session_cancel_expression.clone(),
            default_command_permission: Permission::everybody(),
            default_nlp_permission: Permission::everybody(),
        })
    }

    pub fn is_superuser(&self, user_id: i64) -> bool {
        self.superusers.contains(&user_id)
    }
}

impl Default for CoreSettings {
    fn default() -> Self {
        // 默认配置中没有正则，编译不会失败
        match Self::from_config(&CoreConfig::default()) {
            Ok(s) => s,
            Err(e) => unreachable!("default core config must compile: {}", e),
        }
    }
}

// ============================================================================
// 配置管理器
// ============================================================================

/// 配置管理器
pub struct ConfigManager {
    path: PathBuf,
    config: RwLock<AppConfig>,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config: RwLock::new(AppConfig::default()),
        }
    }

    /// 获取配置文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载配置，如果文件不存在则创建默认配置
    pub async fn load(&self) -> BotResult<AppConfig> {
        if !self.path.exists() {
            let default_cfg = AppConfig::default();
            self.save_atomic(&default_cfg).await?;
            return Ok(default_cfg);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let cfg: AppConfig = toml::from_str(&content)?;

        let mut write_lock = self.config.write().await;
        *write_lock = cfg.clone();

        Ok(cfg)
    }

    /// 原子写入配置（写临时文件 -> Rename 覆盖）
    pub async fn save_atomic(&self, cfg: &AppConfig) -> BotResult<()> {
        let content = toml::to_string_pretty(cfg)?;
        let tmp_path = self.path.with_extension("tmp");
        let path_clone = self.path.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some(parent) = path_clone.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path_clone)?;
            Ok(())
        })
        .await??;

        let mut write_lock = self.config.write().await;
        *write_lock = cfg.clone();

        Ok(())
    }

    /// 获取当前配置（只读）
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// 更新配置（会自动保存）
    pub async fn update<F>(&self, f: F) -> BotResult<AppConfig>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut cfg = self.config.write().await;
        f(&mut cfg);
        let new_cfg = cfg.clone();
        drop(cfg);

        self.save_atomic(&new_cfg).await?;
        Ok(new_cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = CoreSettings::default();
        assert_eq!(s.command_start.len(), 4);
        assert_eq!(s.session_expire_timeout, Some(Duration::from_secs(300)));
        assert_eq!(s.session_run_timeout, None);
        assert_eq!(s.session_busy_retries, 5);
        assert_eq!(s.session_busy_retry_interval, Duration::from_millis(300));
        assert_eq!(s.max_validation_failures, 3);
    }

    #[test]
    fn parses_mixed_markers_from_toml() {
        let raw = r#"
            [core]
            command_start = ["", "/", { regex = "^[#＃]+" }]
            command_sep = []
            session_expire_timeout_secs = 0
            nickname = ["小明"]

            [weather]
            enabled = true
        "#;
        let cfg: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.core.command_start[0], MarkerSpec::Literal(String::new()));
        assert!(matches!(cfg.core.command_start[2], MarkerSpec::Regex { .. }));
        assert!(cfg.plugins.contains_key("weather"));

        let s = CoreSettings::from_config(&cfg.core).unwrap();
        assert!(matches!(s.command_start[2], Marker::Pattern(_)));
        assert!(s.command_sep.is_empty());
        assert_eq!(s.session_expire_timeout, None);
        assert!(s.nickname_regex.is_some());
    }

    #[test]
    fn bad_regex_is_reported() {
        let cfg = CoreConfig {
            command_start: vec![MarkerSpec::Regex {
                regex: "(".to_string(),
            }],
            ..Default::default()
        };
        assert!(matches!(
            CoreSettings::from_config(&cfg),
            Err(ConfigError::InvalidMarker { .. })
        ));
    }

    #[tokio::test]
    async fn manager_creates_and_updates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let manager = ConfigManager::new(&path);

        let cfg = manager.load().await.unwrap();
        assert!(path.exists());
        assert!(!cfg.core.debug);

        manager.update(|c| c.core.debug = true).await.unwrap();
        let reloaded = ConfigManager::new(&path).load().await.unwrap();
        assert!(reloaded.core.debug);
    }
}
