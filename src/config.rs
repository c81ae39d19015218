//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CADENCE__*` 覆盖（双下划线表示嵌套，如 `CADENCE__CREDENTIALS__PASSWORD=...`）。
//! 加载后立即校验；任何不合法的取值都是启动期致命错误，不会拖到运行时才静默拒绝。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use chrono::Weekday;
use serde::Deserialize;

use crate::core::error::ConfigError;

/// 内置延迟类别，必须全部配置
pub const REQUIRED_DELAY_CATEGORIES: [&str; 4] = ["action", "scroll", "typing", "think"];

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub logging: LoggingSection,
    pub browser: BrowserSection,
    pub pacing: PacingSection,
    pub rate_limits: RateLimitsSection,
    pub scheduling: SchedulingSection,
    pub search: SearchSection,
    pub connection: ConnectionSection,
    pub messaging: MessagingSection,
    pub site: SiteSection,
    pub detection: DetectionSection,
    pub credentials: CredentialsSection,
}

/// [app] 段：数据库位置、快照目录、循环级等待
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    pub database_path: PathBuf,
    /// 检测信号截图目录
    pub snapshot_dir: PathBuf,
    /// 两轮之间的停顿（秒）
    pub cycle_pause_secs: u64,
    /// 整轮失败后的退避（秒）
    pub retry_backoff_secs: u64,
    /// 所有配额当日耗尽时的复查间隔（秒）
    pub quota_recheck_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            database_path: PathBuf::from("data/cadence.db"),
            snapshot_dir: PathBuf::from("logs/snapshots"),
            cycle_pause_secs: 600,
            retry_backoff_secs: 300,
            quota_recheck_secs: 3600,
        }
    }
}

/// [logging] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// 额外写入的日志文件
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// [browser] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub headless: bool,
    pub viewport: Viewport,
    /// 浏览器用户目录，会话在多次运行之间保留
    pub user_data_dir: Option<PathBuf>,
    pub chrome_path: Option<PathBuf>,
    pub navigation_timeout_secs: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            user_data_dir: None,
            chrome_path: None,
            navigation_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1366,
            height: 768,
        }
    }
}

/// 闭区间毫秒延迟 `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DelayBand {
    pub min: u64,
    pub max: u64,
}

impl DelayBand {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }
}

/// [pacing] 段：延迟区间、冷却策略、轨迹参数与各类人类化行为开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingSection {
    pub enable_mouse_movement: bool,
    pub enable_random_scrolling: bool,
    pub enable_human_typing: bool,
    pub enable_mouse_hovering: bool,
    pub enable_idle_breaks: bool,
    /// 每个字符先打错再更正的概率
    pub typo_probability: f64,
    /// 类别名 -> 毫秒区间
    pub delays: HashMap<String, DelayBand>,
    pub cooldown: CooldownSection,
    pub motion: MotionSection,
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            enable_mouse_movement: true,
            enable_random_scrolling: true,
            enable_human_typing: true,
            enable_mouse_hovering: true,
            enable_idle_breaks: true,
            typo_probability: 0.05,
            delays: default_delays(),
            cooldown: CooldownSection::default(),
            motion: MotionSection::default(),
        }
    }
}

fn default_delays() -> HashMap<String, DelayBand> {
    HashMap::from([
        ("action".to_string(), DelayBand::new(2000, 5000)),
        ("scroll".to_string(), DelayBand::new(500, 1500)),
        ("typing".to_string(), DelayBand::new(50, 150)),
        ("think".to_string(), DelayBand::new(3000, 8000)),
    ])
}

/// [pacing.cooldown]：累计交互次数达到阈值后长时间休息
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CooldownSection {
    pub threshold_actions: u32,
    pub min_secs: u64,
    pub max_secs: u64,
}

impl Default for CooldownSection {
    fn default() -> Self {
        Self {
            threshold_actions: 25,
            min_secs: 60,
            max_secs: 300,
        }
    }
}

/// [pacing.motion]：Bezier 控制点抖动与步数区间
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotionSection {
    pub jitter: f64,
    pub min_steps: u32,
    pub max_steps: u32,
}

impl Default for MotionSection {
    fn default() -> Self {
        Self {
            jitter: 50.0,
            min_steps: 20,
            max_steps: 29,
        }
    }
}

/// 单个动作类型的小时 / 日上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimit {
    pub per_hour: u32,
    pub per_day: u32,
}

/// [rate_limits] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitsSection {
    pub connections: RateLimit,
    pub messages: RateLimit,
    pub searches: RateLimit,
}

impl Default for RateLimitsSection {
    fn default() -> Self {
        Self {
            connections: RateLimit {
                per_hour: 5,
                per_day: 20,
            },
            messages: RateLimit {
                per_hour: 3,
                per_day: 10,
            },
            searches: RateLimit {
                per_hour: 5,
                per_day: 20,
            },
        }
    }
}

/// 活跃小时窗口；`end < start` 表示跨夜（如 22 -> 6），`end` 可取 24
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HourWindowConfig {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MinutesBand {
    pub min: u32,
    pub max: u32,
}

/// [scheduling] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulingSection {
    pub active_days: Vec<String>,
    pub active_hours: HourWindowConfig,
    /// 午间休息所在小时，None 表示不休息
    pub midday_break_hour: Option<u32>,
    pub midday_break_minutes: MinutesBand,
    /// 窗口关闭前最后一小时是否休息
    pub end_of_window_break: bool,
}

impl Default for SchedulingSection {
    fn default() -> Self {
        Self {
            active_days: ["monday", "tuesday", "wednesday", "thursday", "friday"]
                .into_iter()
                .map(String::from)
                .collect(),
            active_hours: HourWindowConfig { start: 9, end: 18 },
            midday_break_hour: Some(12),
            midday_break_minutes: MinutesBand { min: 30, max: 60 },
            end_of_window_break: true,
        }
    }
}

impl SchedulingSection {
    /// 解析活跃日（支持 `mon` / `Monday` 等写法）
    pub fn weekdays(&self) -> Result<HashSet<Weekday>, ConfigError> {
        self.active_days
            .iter()
            .map(|day| {
                day.trim().parse::<Weekday>().map_err(|_| {
                    ConfigError::invalid("scheduling.active_days", format!("unknown day `{day}`"))
                })
            })
            .collect()
    }
}

/// 单条搜索目标
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub title: String,
    pub location: String,
    pub keywords: String,
}

/// 搜索结果页选择器（站点相关，由使用者提供）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResultSelectors {
    pub item: String,
    /// 相对 item 的链接元素，取其 href
    pub link: String,
    pub name: String,
    pub headline: String,
    pub subtitle: String,
    pub next_page: String,
}

/// [search] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub queries: Vec<SearchQuery>,
    pub max_results_per_query: usize,
    pub pagination_limit: usize,
    /// 含 `{keywords}` / `{location}` 占位符的搜索地址
    pub url_template: String,
    pub selectors: ResultSelectors,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            max_results_per_query: 25,
            pagination_limit: 3,
            url_template: String::new(),
            selectors: ResultSelectors::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionSelectors {
    pub connect_button: Vec<String>,
    pub add_note_button: Vec<String>,
    pub note_input: Vec<String>,
    pub send_with_note: Vec<String>,
    pub send_without_note: Vec<String>,
}

/// [connection] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub send_note: bool,
    pub note_templates: Vec<String>,
    pub note_max_length: usize,
    /// 姓名为空时 `{{FirstName}}` 的替代
    pub fallback_first_name: String,
    /// 每成功发送 N 次额外思考一次
    pub think_every: u32,
    /// 单轮最多处理的目标数
    pub batch_limit: usize,
    pub selectors: ConnectionSelectors,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            send_note: true,
            note_templates: Vec::new(),
            note_max_length: 300,
            fallback_first_name: "there".to_string(),
            think_every: 5,
            batch_limit: 20,
            selectors: ConnectionSelectors::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingSelectors {
    pub message_input: Vec<String>,
    pub send_button: Vec<String>,
}

/// [messaging] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingSection {
    pub enabled: bool,
    /// 接受后至少等待多久才能发跟进消息
    pub delay_after_acceptance_hours: u32,
    pub templates: Vec<String>,
    pub think_every: u32,
    /// 含 `{profile_slug}` / `{profile_url}` 的对话地址；未设置时直接打开目标页
    pub thread_url_template: Option<String>,
    pub selectors: MessagingSelectors,
}

impl Default for MessagingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_after_acceptance_hours: 24,
            templates: Vec::new(),
            think_every: 3,
            thread_url_template: None,
            selectors: MessagingSelectors::default(),
        }
    }
}

/// [site] 段：登录与会话判断
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SiteSection {
    pub home_url: String,
    pub login_url: String,
    pub username_input: Vec<String>,
    pub password_input: Vec<String>,
    pub login_submit: Vec<String>,
    pub login_error: Vec<String>,
    /// 任一存在即视为已登录
    pub logged_in: Vec<String>,
}

/// [detection] 段：挑战 / 验证页标记
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetectionSection {
    pub challenge_selectors: Vec<String>,
    pub challenge_url_markers: Vec<String>,
}

/// [credentials] 段，通常通过环境变量注入
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsSection {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for CredentialsSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsSection")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl AppConfig {
    /// 启动期校验
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in REQUIRED_DELAY_CATEGORIES {
            let band = self.pacing.delays.get(name).ok_or_else(|| {
                ConfigError::invalid(format!("pacing.delays.{name}"), "missing delay band")
            })?;
            if band.min > band.max {
                return Err(ConfigError::invalid(
                    format!("pacing.delays.{name}"),
                    format!("min {} > max {}", band.min, band.max),
                ));
            }
        }
        for (name, band) in &self.pacing.delays {
            if band.min > band.max {
                return Err(ConfigError::invalid(
                    format!("pacing.delays.{name}"),
                    format!("min {} > max {}", band.min, band.max),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.pacing.typo_probability) {
            return Err(ConfigError::invalid(
                "pacing.typo_probability",
                "must be within [0, 1]",
            ));
        }
        let cooldown = &self.pacing.cooldown;
        if cooldown.threshold_actions == 0 {
            return Err(ConfigError::invalid(
                "pacing.cooldown.threshold_actions",
                "must be positive",
            ));
        }
        if cooldown.min_secs > cooldown.max_secs {
            return Err(ConfigError::invalid("pacing.cooldown", "min_secs > max_secs"));
        }
        let motion = &self.pacing.motion;
        if motion.min_steps == 0 || motion.min_steps > motion.max_steps {
            return Err(ConfigError::invalid(
                "pacing.motion",
                "steps must satisfy 0 < min_steps <= max_steps",
            ));
        }
        if motion.jitter < 0.0 {
            return Err(ConfigError::invalid("pacing.motion.jitter", "must not be negative"));
        }

        for (name, limit) in [
            ("connections", self.rate_limits.connections),
            ("messages", self.rate_limits.messages),
            ("searches", self.rate_limits.searches),
        ] {
            if limit.per_hour == 0 || limit.per_day == 0 {
                return Err(ConfigError::invalid(
                    format!("rate_limits.{name}"),
                    "per_hour and per_day must be positive",
                ));
            }
        }

        let sched = &self.scheduling;
        let window = sched.active_hours;
        if window.start >= 24 || window.end > 24 {
            return Err(ConfigError::invalid(
                "scheduling.active_hours",
                "start must be 0..=23 and end 0..=24",
            ));
        }
        if window.start == window.end {
            return Err(ConfigError::invalid(
                "scheduling.active_hours",
                "start == end leaves no active hours (use 0 -> 24 for all day)",
            ));
        }
        if sched.weekdays()?.is_empty() {
            return Err(ConfigError::invalid("scheduling.active_days", "no active days"));
        }
        if let Some(hour) = sched.midday_break_hour {
            if hour >= 24 {
                return Err(ConfigError::invalid("scheduling.midday_break_hour", "must be 0..=23"));
            }
        }
        if sched.midday_break_minutes.min > sched.midday_break_minutes.max {
            return Err(ConfigError::invalid("scheduling.midday_break_minutes", "min > max"));
        }

        if self.browser.viewport.width == 0 || self.browser.viewport.height == 0 {
            return Err(ConfigError::invalid("browser.viewport", "invalid viewport dimensions"));
        }
        if self.app.database_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("app.database_path", "must be specified"));
        }
        if self.connection.note_max_length < 4 {
            return Err(ConfigError::invalid(
                "connection.note_max_length",
                "must leave room for the ellipsis marker",
            ));
        }
        if !self.search.queries.is_empty() && self.search.url_template.trim().is_empty() {
            return Err(ConfigError::invalid(
                "search.url_template",
                "required when search queries are configured",
            ));
        }
        Ok(())
    }

    /// 驱动浏览器的命令额外需要的配置：凭据、站点地址与关键选择器
    pub fn require_automation_settings(&self) -> Result<(), ConfigError> {
        let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        if !has(&self.credentials.email) || !has(&self.credentials.password) {
            return Err(ConfigError::MissingCredentials);
        }
        if self.site.home_url.trim().is_empty() || self.site.login_url.trim().is_empty() {
            return Err(ConfigError::invalid("site", "home_url and login_url are required"));
        }
        if self.site.logged_in.is_empty() {
            return Err(ConfigError::invalid("site.logged_in", "at least one selector required"));
        }
        if self.connection.selectors.connect_button.is_empty() {
            return Err(ConfigError::invalid(
                "connection.selectors.connect_button",
                "at least one selector required",
            ));
        }
        if self.messaging.enabled
            && (self.messaging.selectors.message_input.is_empty()
                || self.messaging.selectors.send_button.is_empty())
        {
            return Err(ConfigError::invalid(
                "messaging.selectors",
                "message_input and send_button are required when messaging is enabled",
            ));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 CADENCE__* 可覆盖，最后执行校验
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CADENCE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if !path.exists() {
            return Err(ConfigError::invalid(
                "config",
                format!("file not found: {}", path.display()),
            ));
        }
        builder = builder.add_source(config::File::from(path.clone()));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CADENCE")
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
