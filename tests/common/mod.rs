//! 集成测试公共部分：脚本化浏览器、推进手动时钟的睡眠器、测试配置与装配

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use cadence::config::{
    AppConfig, DelayBand, HourWindowConfig, RateLimit, SearchQuery,
};
use cadence::core::{InteractionError, ManualClock};
use cadence::interaction::{ElementHandle, Interaction};
use cadence::pacing::{replay, Keystroke, Point, Sleeper};
use cadence::store::SqliteStore;
use cadence::{WorkflowBuilder, WorkflowOrchestrator};

pub const HOME: &str = "https://site.test/feed";
pub const LOGIN: &str = "https://site.test/login";

pub const LOGGED_IN: &str = "nav.me";
pub const CAPTCHA: &str = "#captcha";

pub const RESULT_ITEM: &str = "li.result";
pub const RESULT_LINK: &str = "a.profile";
pub const RESULT_NAME: &str = "span.name";
pub const RESULT_HEADLINE: &str = "div.headline";
pub const RESULT_SUBTITLE: &str = "div.subtitle";
pub const NEXT_PAGE: &str = "button.next";

pub const CONNECT: &str = "button.connect";
pub const ADD_NOTE: &str = "button.add-note";
pub const NOTE_INPUT: &str = "textarea.note";
pub const SEND_NOTE: &str = "button.send-note";

pub const MESSAGE_INPUT: &str = "div.msg-input";
pub const MESSAGE_SEND: &str = "button.msg-send";

/// 搜索结果中的一项
#[derive(Debug, Clone, Default)]
pub struct ResultItem {
    pub href: String,
    pub name: String,
    pub headline: String,
    pub location: String,
}

impl ResultItem {
    pub fn new(href: &str, name: &str, headline: &str) -> Self {
        Self {
            href: href.to_string(),
            name: name.to_string(),
            headline: headline.to_string(),
            location: "Berlin".to_string(),
        }
    }
}

/// 一张脚本页面：存在的选择器、搜索结果与下一页地址
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub elements: HashSet<String>,
    pub results: Vec<ResultItem>,
    pub next: Option<String>,
}

impl Page {
    pub fn with(mut self, selector: &str) -> Self {
        self.elements.insert(selector.to_string());
        self
    }

    pub fn results(mut self, items: Vec<ResultItem>) -> Self {
        self.results = items;
        self
    }

    pub fn next(mut self, url: &str) -> Self {
        self.next = Some(url.to_string());
        self
    }

    /// 可发送带备注连接请求的目标页
    pub fn profile() -> Self {
        Page::default()
            .with(CONNECT)
            .with(ADD_NOTE)
            .with(NOTE_INPUT)
            .with(SEND_NOTE)
    }

    pub fn thread() -> Self {
        Page::default().with(MESSAGE_INPUT).with(MESSAGE_SEND)
    }
}

#[derive(Default)]
struct State {
    pages: HashMap<String, Page>,
    current: String,
    visits: Vec<String>,
    clicks: Vec<(String, String)>,
    focus: Option<(String, String)>,
    keys: Vec<((String, String), Keystroke)>,
    screenshots: usize,
    cancel_on_click: Option<(String, CancellationToken)>,
    cancel_on_visit: Option<(String, usize, CancellationToken)>,
}

/// 按 URL 脚本化的假浏览器
#[derive(Default)]
pub struct ScriptedInteraction {
    state: Mutex<State>,
}

impl ScriptedInteraction {
    pub fn new() -> Self {
        let driver = Self::default();
        driver.page(HOME, Page::default().with(LOGGED_IN));
        driver
    }

    pub fn page(&self, url: &str, page: Page) {
        self.state.lock().unwrap().pages.insert(url.to_string(), page);
    }

    pub fn add_element(&self, url: &str, selector: &str) {
        self.state
            .lock()
            .unwrap()
            .pages
            .entry(url.to_string())
            .or_default()
            .elements
            .insert(selector.to_string());
    }

    /// 点击该选择器时触发取消
    pub fn cancel_on_click(&self, selector: &str, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_click = Some((selector.to_string(), token));
    }

    /// 第 `nth` 次打开该地址时触发取消
    pub fn cancel_on_visit(&self, url: &str, nth: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_visit = Some((url.to_string(), nth, token));
    }

    pub fn visits(&self) -> Vec<String> {
        self.state.lock().unwrap().visits.clone()
    }

    pub fn visit_count(&self, url: &str) -> usize {
        self.visits().iter().filter(|v| v.as_str() == url).count()
    }

    pub fn clicked(&self, url: &str, selector: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .clicks
            .iter()
            .any(|(u, s)| u == url && s == selector)
    }

    /// 在某页某输入框中最终留下的文本
    pub fn typed(&self, url: &str, selector: &str) -> String {
        let state = self.state.lock().unwrap();
        let keys: Vec<Keystroke> = state
            .keys
            .iter()
            .filter(|((u, s), _)| u == url && s == selector)
            .map(|(_, k)| *k)
            .collect();
        replay(&keys)
    }

    pub fn screenshots(&self) -> usize {
        self.state.lock().unwrap().screenshots
    }

    fn current_page(state: &State) -> Page {
        state.pages.get(&state.current).cloned().unwrap_or_default()
    }

    fn result_item(state: &State, element: &ElementHandle) -> Option<ResultItem> {
        let (root, index) = element.path().first()?;
        if root != RESULT_ITEM {
            return None;
        }
        Self::current_page(state).results.get(*index).cloned()
    }
}

#[async_trait]
impl Interaction for ScriptedInteraction {
    async fn navigate(&self, url: &str) -> Result<(), InteractionError> {
        let mut state = self.state.lock().unwrap();
        state.current = url.to_string();
        state.visits.push(url.to_string());
        let visits = state.visits.iter().filter(|v| v.as_str() == url).count();
        if let Some((target, nth, token)) = &state.cancel_on_visit {
            if target == url && *nth == visits {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, InteractionError> {
        Ok(self.state.lock().unwrap().current.clone())
    }

    async fn find_element(&self, selector: &str) -> Result<Option<ElementHandle>, InteractionError> {
        let state = self.state.lock().unwrap();
        let page = Self::current_page(&state);
        let present = page.elements.contains(selector)
            || (selector == NEXT_PAGE && page.next.is_some());
        Ok(present.then(|| ElementHandle::new(selector, 0)))
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementHandle>, InteractionError> {
        let state = self.state.lock().unwrap();
        let page = Self::current_page(&state);
        if selector == RESULT_ITEM {
            return Ok((0..page.results.len())
                .map(|i| ElementHandle::new(selector, i))
                .collect());
        }
        Ok(if page.elements.contains(selector) {
            vec![ElementHandle::new(selector, 0)]
        } else {
            vec![]
        })
    }

    async fn find_within(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Option<ElementHandle>, InteractionError> {
        let is_field = [RESULT_LINK, RESULT_NAME, RESULT_HEADLINE, RESULT_SUBTITLE].contains(&selector);
        Ok((parent.selector() == RESULT_ITEM && is_field).then(|| parent.child(selector, 0)))
    }

    async fn element_text(&self, element: &ElementHandle) -> Result<String, InteractionError> {
        let state = self.state.lock().unwrap();
        let Some(item) = Self::result_item(&state, element) else {
            return Ok(String::new());
        };
        Ok(match element.selector() {
            RESULT_NAME => item.name,
            RESULT_HEADLINE => item.headline,
            RESULT_SUBTITLE => item.location,
            _ => String::new(),
        })
    }

    async fn element_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, InteractionError> {
        let state = self.state.lock().unwrap();
        if name != "href" || element.selector() != RESULT_LINK {
            return Ok(None);
        }
        Ok(Self::result_item(&state, element).map(|item| item.href))
    }

    async fn element_center(&self, _element: &ElementHandle) -> Result<Point, InteractionError> {
        Ok(Point::new(400.0, 300.0))
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), InteractionError> {
        let mut state = self.state.lock().unwrap();
        let url = state.current.clone();
        let selector = element.selector().to_string();
        state.clicks.push((url.clone(), selector.clone()));
        state.focus = Some((url, selector.clone()));
        if let Some((target, token)) = &state.cancel_on_click {
            if *target == selector {
                token.cancel();
            }
        }
        if selector == NEXT_PAGE {
            if let Some(next) = Self::current_page(&state).next {
                state.current = next.clone();
                state.visits.push(next);
            }
        }
        Ok(())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), InteractionError> {
        let mut state = self.state.lock().unwrap();
        let key = (state.current.clone(), element.selector().to_string());
        state.keys.extend(text.chars().map(|c| (key.clone(), Keystroke::Char(c))));
        Ok(())
    }

    async fn press_key(&self, key: Keystroke) -> Result<(), InteractionError> {
        let mut state = self.state.lock().unwrap();
        let Some(focus) = state.focus.clone() else {
            return Err(InteractionError::Failed("no focused element".into()));
        };
        state.keys.push((focus, key));
        Ok(())
    }

    async fn move_pointer(&self, _to: Point) -> Result<(), InteractionError> {
        Ok(())
    }

    async fn scroll_by(&self, _dy: i64) -> Result<(), InteractionError> {
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), InteractionError> {
        std::fs::write(path, b"\x89PNG").map_err(|e| InteractionError::Failed(e.to_string()))?;
        self.state.lock().unwrap().screenshots += 1;
        Ok(())
    }
}

/// 不真正等待，只推进手动时钟；可设置调用次数上限，超过后触发取消
pub struct ClockSleeper {
    clock: Arc<ManualClock>,
    calls: AtomicUsize,
    limit: Option<usize>,
}

impl ClockSleeper {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            calls: AtomicUsize::new(0),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sleeper for ClockSleeper {
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.limit.is_some_and(|limit| n > limit) {
            cancel.cancel();
            return false;
        }
        self.clock
            .advance(chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero()));
        true
    }
}

/// 2024-03-04 06:00 UTC
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 6, 0, 0).unwrap()
}

pub fn search_url() -> String {
    cadence::phases::build_search_url(&test_config(Path::new("unused")).search.url_template, &query())
}

pub fn query() -> SearchQuery {
    SearchQuery {
        title: "Engineer".into(),
        location: String::new(),
        keywords: "robotics".into(),
    }
}

/// 全天活跃、延迟极短、单一模板的配置
pub fn test_config(snapshot_dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.app.snapshot_dir = snapshot_dir.to_path_buf();
    cfg.app.cycle_pause_secs = 60;
    cfg.app.retry_backoff_secs = 120;
    cfg.app.quota_recheck_secs = 3600;

    for band in cfg.pacing.delays.values_mut() {
        *band = DelayBand::new(1, 5);
    }
    cfg.pacing.enable_idle_breaks = false;

    cfg.rate_limits.connections = RateLimit { per_hour: 5, per_day: 20 };
    cfg.rate_limits.messages = RateLimit { per_hour: 5, per_day: 10 };
    cfg.rate_limits.searches = RateLimit { per_hour: 5, per_day: 20 };

    cfg.scheduling.active_days = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"]
        .into_iter()
        .map(String::from)
        .collect();
    cfg.scheduling.active_hours = HourWindowConfig { start: 0, end: 24 };
    cfg.scheduling.midday_break_hour = None;
    cfg.scheduling.end_of_window_break = false;

    cfg.search.queries = vec![query()];
    cfg.search.url_template = "https://site.test/search?q={keywords}".into();
    cfg.search.pagination_limit = 3;
    cfg.search.selectors.item = RESULT_ITEM.into();
    cfg.search.selectors.link = RESULT_LINK.into();
    cfg.search.selectors.name = RESULT_NAME.into();
    cfg.search.selectors.headline = RESULT_HEADLINE.into();
    cfg.search.selectors.subtitle = RESULT_SUBTITLE.into();
    cfg.search.selectors.next_page = NEXT_PAGE.into();

    cfg.connection.note_templates =
        vec!["Hi {{FirstName}}, let's connect about {{Field}}.".into()];
    cfg.connection.selectors.connect_button = vec![CONNECT.into()];
    cfg.connection.selectors.add_note_button = vec![ADD_NOTE.into()];
    cfg.connection.selectors.note_input = vec![NOTE_INPUT.into()];
    cfg.connection.selectors.send_with_note = vec![SEND_NOTE.into()];

    cfg.messaging.templates = vec!["Thanks for connecting, {{FirstName}}!".into()];
    cfg.messaging.selectors.message_input = vec![MESSAGE_INPUT.into()];
    cfg.messaging.selectors.send_button = vec![MESSAGE_SEND.into()];

    cfg.site.home_url = HOME.into();
    cfg.site.login_url = LOGIN.into();
    cfg.site.logged_in = vec![LOGGED_IN.into()];

    cfg.detection.challenge_selectors = vec![CAPTCHA.into()];
    cfg.detection.challenge_url_markers = vec!["/checkpoint".into()];
    cfg
}

pub struct Harness {
    pub orchestrator: WorkflowOrchestrator,
    pub driver: Arc<ScriptedInteraction>,
    pub store: Arc<SqliteStore>,
    pub clock: Arc<ManualClock>,
    pub sleeper: Arc<ClockSleeper>,
    pub cancel: CancellationToken,
    pub snapshots: TempDir,
}

pub fn harness(driver: ScriptedInteraction, configure: impl FnOnce(&mut AppConfig)) -> Harness {
    harness_with_limit(driver, None, configure)
}

pub fn harness_with_limit(
    driver: ScriptedInteraction,
    sleep_limit: Option<usize>,
    configure: impl FnOnce(&mut AppConfig),
) -> Harness {
    // 调度与“当天”配额按本地时区计算，测试统一用 UTC
    std::env::set_var("TZ", "UTC");
    let snapshots = tempfile::tempdir().unwrap();
    let mut config = test_config(snapshots.path());
    configure(&mut config);

    let driver = Arc::new(driver);
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(start()));
    let mut sleeper = ClockSleeper::new(clock.clone());
    if let Some(limit) = sleep_limit {
        sleeper = sleeper.with_limit(limit);
    }
    let sleeper = Arc::new(sleeper);
    let cancel = CancellationToken::new();

    let orchestrator = WorkflowBuilder::new(config, driver.clone())
        .with_store(store.clone())
        .with_clock(clock.clone())
        .with_sleeper(sleeper.clone())
        .with_cancel(cancel.clone())
        .with_seed(42)
        .build()
        .unwrap();

    Harness {
        orchestrator,
        driver,
        store,
        clock,
        sleeper,
        cancel,
        snapshots,
    }
}
