//! 跟进消息阶段：对已接受且满足等待时长的连接发送一条消息

use tracing::{debug, info, warn};
use url::Url;

use super::PhaseContext;
use crate::config::MessagingSection;
use crate::core::error::{CycleError, InteractionError};
use crate::core::state::{Halt, PhaseReport};
use crate::outreach::{MessageGate, Personalizer};
use crate::pacing::DelayCategory;
use crate::store::{ActionKind, Target};

/// 对话地址：模板中的 `{profile_slug}` 取目标 URL 最后一段路径，`{profile_url}` 为编码后的完整地址
pub fn thread_url(template: Option<&str>, target_url: &str) -> String {
    let Some(template) = template.filter(|t| !t.trim().is_empty()) else {
        return target_url.to_string();
    };
    let slug = Url::parse(target_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(str::to_string))
        })
        .unwrap_or_default();
    let encoded: String = url::form_urlencoded::byte_serialize(target_url.as_bytes()).collect();
    template
        .replace("{profile_slug}", &slug)
        .replace("{profile_url}", &encoded)
}

pub async fn send_follow_ups(
    ctx: &PhaseContext,
    cfg: &MessagingSection,
    fallback_first_name: &str,
) -> Result<PhaseReport, CycleError> {
    let mut report = PhaseReport::default();
    if !cfg.enabled {
        debug!("Messaging disabled");
        return Ok(report);
    }
    let candidates = ctx.outreach.message_candidates()?;
    if candidates.is_empty() {
        debug!("No accepted connections awaiting a follow-up");
        return Ok(report);
    }

    let personalizer = Personalizer::for_messages(cfg, fallback_first_name);
    let mut sent: u32 = 0;

    for candidate in candidates {
        if let Some(halt) = ctx.halt() {
            report.halt(halt);
            break;
        }
        let url = candidate.target.url.clone();
        let now = ctx.clock.now();
        let target = match ctx.outreach.message_gate(&url, &now)? {
            MessageGate::Proceed(target) => target,
            MessageGate::TooEarly { eligible_at } => {
                debug!(url = %url, %eligible_at, "Too early to follow up");
                report.skipped += 1;
                continue;
            }
            MessageGate::NotAccepted(_) | MessageGate::AlreadyMessaged => {
                report.skipped += 1;
                continue;
            }
            MessageGate::QuotaExhausted(decision) => {
                warn!(%decision, url = %url, "Message quota exhausted, ending phase");
                ctx.outreach.record_quota_skip(
                    ActionKind::Message,
                    Some(&url),
                    decision,
                    ctx.clock.now_utc(),
                )?;
                report.quota_exhausted = true;
                break;
            }
        };

        report.processed += 1;
        let content = ctx.pacing().with_rng(|rng| personalizer.compose(&target, rng));
        let thread = thread_url(cfg.thread_url_template.as_deref(), &target.url);

        match send_one(ctx, cfg, &thread, &content).await {
            Ok(Some(halt)) => {
                info!(url = %target.url, %halt, "Stopped before typing, follow-up postponed");
                report.halt(halt);
                break;
            }
            Ok(None) => {
                ctx.outreach
                    .confirm_message(&target, &content, ctx.clock.now_utc())?;
                report.succeeded += 1;
                sent += 1;
                info!(url = %target.url, "Follow-up sent");
                if cfg.think_every > 0 && sent % cfg.think_every == 0 {
                    ctx.pacing().delay(DelayCategory::Think).await;
                }
            }
            Err(e) if e.is_recoverable() => {
                report.failed += 1;
                warn!(url = %target.url, error = %e, "Follow-up failed");
                ctx.outreach.record_message_failure(
                    &target,
                    &content,
                    &e.to_string(),
                    ctx.clock.now_utc(),
                )?;
            }
            Err(e) => return Err(escalate(ctx, &target, e).await),
        }

        ctx.pacing().delay(DelayCategory::Action).await;
    }

    info!(%report, "Messaging phase finished");
    Ok(report)
}

async fn escalate(ctx: &PhaseContext, target: &Target, e: InteractionError) -> CycleError {
    ctx.escalate(ActionKind::Message, Some(&target.url), e).await
}

/// 输入前需要停止时返回 `Some`，此时什么都没发出
async fn send_one(
    ctx: &PhaseContext,
    cfg: &MessagingSection,
    thread: &str,
    content: &str,
) -> Result<Option<Halt>, InteractionError> {
    let human = &ctx.human;
    human.navigate(thread).await?;
    ctx.ensure_clear().await?;
    human.hover_randomly().await?;

    let input = human.require_first(&cfg.selectors.message_input).await?;
    if let Some(halt) = ctx.halt() {
        return Ok(Some(halt));
    }
    human.type_into(&input, content).await?;
    let send = human.require_first(&cfg.selectors.send_button).await?;
    human.click(&send).await?;

    ctx.ensure_clear().await?;
    Ok(None)
}
