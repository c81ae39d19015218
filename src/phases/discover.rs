//! 发现阶段：按配置的搜索条件翻页收集目标并入库
//!
//! 每个查询受 `search` 配额约束，完成后记一条 `search` 事件。
//! 同一轮内按规范化 URL 去重，入库本身也是幂等的。
//! 每翻一页前检查停止条件，停止后不再滚动或点击。

use std::collections::HashSet;

use tracing::{debug, info, warn};
use url::Url;

use super::PhaseContext;
use crate::config::{ResultSelectors, SearchQuery, SearchSection};
use crate::core::error::{CycleError, InteractionError, StoreError};
use crate::core::state::{Halt, PhaseReport};
use crate::interaction::ElementHandle;
use crate::store::{ActionKind, NewEvent, Outcome, TargetDraft};

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.trim().as_bytes()).collect()
}

/// 展开搜索地址模板：`{keywords}`（职位 + 关键词）、`{title}`、`{location}`，取值均做 URL 编码
pub fn build_search_url(template: &str, query: &SearchQuery) -> String {
    let keywords = [query.title.trim(), query.keywords.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    template
        .replace("{keywords}", &encode(&keywords))
        .replace("{title}", &encode(&query.title))
        .replace("{location}", &encode(&query.location))
}

/// 规范化目标地址：解析相对链接，去掉查询串、片段与结尾斜杠
pub fn canonical_profile_url(href: &str, base: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let mut url = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base).ok()?.join(href).ok()?,
        Err(_) => return None,
    };
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    Some(url.as_str().trim_end_matches('/').to_string())
}

/// "Staff Engineer at Acme" -> ("Staff Engineer", "Acme")；没有 " at " 时组织为空
fn split_headline(headline: &str) -> (String, String) {
    match headline.rsplit_once(" at ") {
        Some((role, org)) if !role.trim().is_empty() && !org.trim().is_empty() => {
            (role.trim().to_string(), org.trim().to_string())
        }
        _ => (headline.trim().to_string(), String::new()),
    }
}

pub async fn discover_targets(
    ctx: &PhaseContext,
    search: &SearchSection,
) -> Result<PhaseReport, CycleError> {
    let mut report = PhaseReport::default();
    let mut seen: HashSet<String> = HashSet::new();

    for query in &search.queries {
        if let Some(halt) = ctx.halt() {
            report.halt(halt);
            break;
        }
        let now = ctx.clock.now();
        let decision = ctx.outreach.quota().check(ActionKind::Search, &now)?;
        if !decision.is_allowed() {
            warn!(%decision, "Search quota exhausted, ending discovery");
            ctx.outreach
                .record_quota_skip(ActionKind::Search, None, decision, ctx.clock.now_utc())?;
            report.quota_exhausted = true;
            break;
        }

        report.processed += 1;
        let url = build_search_url(&search.url_template, query);
        let label = format!("{} @ {}", query.title, query.location);
        info!(query = %label, "Running search");

        match run_query(ctx, search, query, &url, &mut seen).await {
            Ok(QueryProgress { found, halted }) => {
                report.succeeded += 1;
                let mut detail = format!("{label}: {found} targets");
                if let Some(halt) = halted {
                    info!(query = %label, found, %halt, "Search stopped early");
                    detail.push_str(&format!(" ({halt})"));
                } else {
                    info!(query = %label, found, "Search complete");
                }
                ctx.outreach.store().log_event(
                    &NewEvent::new(ActionKind::Search, Outcome::Success, ctx.clock.now_utc())
                        .target(url.clone())
                        .detail(detail),
                )?;
                if let Some(halt) = halted {
                    report.halt(halt);
                    break;
                }
            }
            Err(QueryError::Store(e)) => return Err(CycleError::Store(e)),
            Err(QueryError::Interaction(e)) if e.is_recoverable() => {
                report.failed += 1;
                warn!(query = %label, error = %e, "Search failed");
                ctx.outreach.store().log_event(
                    &NewEvent::new(ActionKind::Search, Outcome::Failure, ctx.clock.now_utc())
                        .target(url.clone())
                        .detail(e.to_string()),
                )?;
            }
            Err(QueryError::Interaction(e)) => {
                return Err(ctx.escalate(ActionKind::Search, Some(&url), e).await)
            }
        }
        ctx.pacing().delay(crate::pacing::DelayCategory::Action).await;
    }

    Ok(report)
}

enum QueryError {
    Interaction(InteractionError),
    Store(StoreError),
}

impl From<InteractionError> for QueryError {
    fn from(e: InteractionError) -> Self {
        QueryError::Interaction(e)
    }
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        QueryError::Store(e)
    }
}

struct QueryProgress {
    /// 本查询新收集到的目标数
    found: usize,
    halted: Option<Halt>,
}

async fn run_query(
    ctx: &PhaseContext,
    search: &SearchSection,
    query: &SearchQuery,
    url: &str,
    seen: &mut HashSet<String>,
) -> Result<QueryProgress, QueryError> {
    let human = &ctx.human;
    let driver = human.driver();
    let selectors = &search.selectors;

    human.navigate(url).await?;
    ctx.ensure_clear().await?;

    let mut found = 0usize;
    for page in 1..=search.pagination_limit.max(1) {
        if let Some(halt) = ctx.halt() {
            debug!(page, %halt, "Leaving result pages");
            return Ok(QueryProgress { found, halted: Some(halt) });
        }
        human.random_scroll().await?;
        let base = driver.current_url().await?;
        let items = driver.find_elements(&selectors.item).await?;
        debug!(page, items = items.len(), "Scanning result page");

        for item in &items {
            if found >= search.max_results_per_query {
                return Ok(QueryProgress { found, halted: None });
            }
            match extract(ctx, selectors, item, &base, query).await {
                Ok(Some(draft)) => {
                    if !seen.insert(draft.url.clone()) {
                        continue;
                    }
                    ctx.outreach.discover(&draft, ctx.clock.now_utc())?;
                    found += 1;
                }
                Ok(None) => {}
                Err(e) if e.is_recoverable() => debug!(error = %e, "Skipping unreadable result"),
                Err(e) => return Err(e.into()),
            }
        }

        if page == search.pagination_limit || selectors.next_page.is_empty() {
            break;
        }
        let Some(next) = driver.find_element(&selectors.next_page).await? else {
            debug!(page, "No more result pages");
            break;
        };
        if let Some(halt) = ctx.halt() {
            return Ok(QueryProgress { found, halted: Some(halt) });
        }
        human.click(&next).await?;
        ctx.pacing().delay(crate::pacing::DelayCategory::Action).await;
        ctx.ensure_clear().await?;
    }
    Ok(QueryProgress { found, halted: None })
}

async fn extract(
    ctx: &PhaseContext,
    selectors: &ResultSelectors,
    item: &ElementHandle,
    base: &str,
    query: &SearchQuery,
) -> Result<Option<TargetDraft>, InteractionError> {
    let driver = ctx.human.driver();
    let link = if selectors.link.is_empty() {
        Some(item.clone())
    } else {
        driver.find_within(item, &selectors.link).await?
    };
    let Some(link) = link else {
        return Ok(None);
    };
    let Some(href) = driver.element_attribute(&link, "href").await? else {
        return Ok(None);
    };
    let Some(url) = canonical_profile_url(&href, base) else {
        return Ok(None);
    };

    let text_of = |selector: &str| {
        let selector = selector.to_string();
        async move {
            if selector.is_empty() {
                return Ok::<_, InteractionError>(String::new());
            }
            match driver.find_within(item, &selector).await? {
                Some(el) => Ok(driver.element_text(&el).await?.trim().to_string()),
                None => Ok(String::new()),
            }
        }
    };

    let headline = text_of(&selectors.headline).await?;
    let (role, organization) = split_headline(&headline);
    let draft = TargetDraft {
        url,
        name: text_of(&selectors.name).await?,
        role,
        organization,
        location: text_of(&selectors.subtitle).await?,
        keywords: query.keywords.trim().to_string(),
    };
    Ok(Some(draft))
}
