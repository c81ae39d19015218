//! Headless Chrome 驱动
//!
//! 需启用 feature "browser" 且系统已安装 Chrome/Chromium。
//! headless_chrome 的 Tab API 是同步的，所有调用都放进 `spawn_blocking`。

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::browser::tab::point::Point as ChromePoint;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};

use super::{ElementHandle, Interaction, Keystroke, Point};
use crate::config::BrowserSection;
use crate::core::error::InteractionError;

fn failed<E: Display>(context: &'static str) -> impl FnOnce(E) -> InteractionError {
    move |e| InteractionError::Failed(format!("{context}: {e}"))
}

/// 按路径逐级定位元素；任一级找不到返回 None
fn resolve<'a>(tab: &'a Tab, handle: &ElementHandle) -> Option<Element<'a>> {
    let mut steps = handle.path().iter();
    let (selector, index) = steps.next()?;
    let mut current = tab.find_elements(selector).ok()?.into_iter().nth(*index)?;
    for (selector, index) in steps {
        current = current.find_elements(selector).ok()?.into_iter().nth(*index)?;
    }
    Some(current)
}

fn require<'a>(tab: &'a Tab, handle: &ElementHandle) -> Result<Element<'a>, InteractionError> {
    resolve(tab, handle).ok_or_else(|| InteractionError::NotFound(handle.selector().to_string()))
}

pub struct ChromeDriver {
    // 浏览器进程随 Browser 释放而退出
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeDriver {
    /// 启动浏览器并打开一个标签页
    pub async fn launch(cfg: &BrowserSection) -> Result<Self, InteractionError> {
        let cfg = cfg.clone();
        tokio::task::spawn_blocking(move || {
            let options = LaunchOptions::default_builder()
                .headless(cfg.headless)
                .window_size(Some((cfg.viewport.width, cfg.viewport.height)))
                .user_data_dir(cfg.user_data_dir.clone())
                .path(cfg.chrome_path.clone())
                .build()
                .map_err(failed("launch options"))?;
            let browser = Browser::new(options).map_err(failed("Chrome launch failed"))?;
            let tab = browser.new_tab().map_err(failed("Browser tab failed"))?;
            tab.set_default_timeout(Duration::from_secs(cfg.navigation_timeout_secs));
            tracing::info!(headless = cfg.headless, "Browser launched");
            Ok(Self {
                _browser: browser,
                tab,
            })
        })
        .await
        .map_err(failed("Task join"))?
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, InteractionError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T, InteractionError> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(failed("Task join"))?
    }
}

#[async_trait]
impl Interaction for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<(), InteractionError> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url)
                .map_err(failed("Navigate failed"))?
                .wait_until_navigated()
                .map_err(failed("Page load failed"))?;
            Ok(())
        })
        .await
    }

    async fn current_url(&self) -> Result<String, InteractionError> {
        self.blocking(|tab| Ok(tab.get_url())).await
    }

    async fn find_element(&self, selector: &str) -> Result<Option<ElementHandle>, InteractionError> {
        let handle = ElementHandle::new(selector, 0);
        self.blocking(move |tab| Ok(resolve(tab, &handle).map(|_| handle.clone())))
            .await
    }

    async fn find_elements(&self, selector: &str) -> Result<Vec<ElementHandle>, InteractionError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            let count = tab.find_elements(&selector).map(|v| v.len()).unwrap_or(0);
            Ok((0..count)
                .map(|i| ElementHandle::new(selector.clone(), i))
                .collect())
        })
        .await
    }

    async fn find_within(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Option<ElementHandle>, InteractionError> {
        let handle = parent.child(selector, 0);
        self.blocking(move |tab| Ok(resolve(tab, &handle).map(|_| handle.clone())))
            .await
    }

    async fn element_text(&self, element: &ElementHandle) -> Result<String, InteractionError> {
        let handle = element.clone();
        self.blocking(move |tab| {
            require(tab, &handle)?
                .get_inner_text()
                .map_err(failed("Read text failed"))
        })
        .await
    }

    async fn element_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, InteractionError> {
        let handle = element.clone();
        let name = name.to_string();
        self.blocking(move |tab| {
            require(tab, &handle)?
                .get_attribute_value(&name)
                .map_err(failed("Read attribute failed"))
        })
        .await
    }

    async fn element_center(&self, element: &ElementHandle) -> Result<Point, InteractionError> {
        let handle = element.clone();
        self.blocking(move |tab| {
            let mid = require(tab, &handle)?
                .get_midpoint()
                .map_err(failed("Locate element failed"))?;
            Ok(Point::new(mid.x, mid.y))
        })
        .await
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), InteractionError> {
        let handle = element.clone();
        self.blocking(move |tab| {
            require(tab, &handle)?.click().map_err(failed("Click failed"))?;
            Ok(())
        })
        .await
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), InteractionError> {
        let handle = element.clone();
        let text = text.to_string();
        self.blocking(move |tab| {
            require(tab, &handle)?
                .type_into(&text)
                .map_err(failed("Type failed"))?;
            Ok(())
        })
        .await
    }

    async fn press_key(&self, key: Keystroke) -> Result<(), InteractionError> {
        self.blocking(move |tab| {
            match key {
                Keystroke::Char(c) => {
                    tab.type_str(&c.to_string()).map_err(failed("Type failed"))?;
                }
                Keystroke::Backspace => {
                    tab.press_key("Backspace").map_err(failed("Key press failed"))?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn move_pointer(&self, to: Point) -> Result<(), InteractionError> {
        self.blocking(move |tab| {
            tab.move_mouse_to_point(ChromePoint { x: to.x, y: to.y })
                .map_err(failed("Mouse move failed"))?;
            Ok(())
        })
        .await
    }

    async fn scroll_by(&self, dy: i64) -> Result<(), InteractionError> {
        self.blocking(move |tab| {
            tab.evaluate(&format!("window.scrollBy(0, {dy})"), false)
                .map_err(failed("Scroll failed"))?;
            Ok(())
        })
        .await
    }

    async fn screenshot(&self, path: &Path) -> Result<(), InteractionError> {
        let path = path.to_path_buf();
        self.blocking(move |tab| {
            let png = tab
                .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(failed("Screenshot failed"))?;
            std::fs::write(&path, png).map_err(failed("Write screenshot failed"))
        })
        .await
    }
}
