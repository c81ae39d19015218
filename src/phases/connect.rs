//! 连接请求阶段
//!
//! 候选来自存储中尚无请求的目标（含之前发送失败的目标）。
//! 每个目标：状态机判断 -> 打开页面、阅读、悬停 -> 点击连接（可附备注）-> 落库。
//! 配额耗尽时记一条 quota_blocked 事件并结束本阶段。
//! 点击“连接”之前再检查一次停止条件；此时放弃的目标不落库，下轮仍是候选。

use tracing::{debug, info, warn};

use super::PhaseContext;
use crate::config::ConnectionSection;
use crate::core::error::{CycleError, InteractionError};
use crate::core::state::{Halt, PhaseReport};
use crate::outreach::{Personalizer, RequestGate};
use crate::pacing::DelayCategory;
use crate::store::{ActionKind, Target};

pub async fn send_connection_requests(
    ctx: &PhaseContext,
    cfg: &ConnectionSection,
) -> Result<PhaseReport, CycleError> {
    let mut report = PhaseReport::default();
    let candidates = ctx.outreach.request_candidates(cfg.batch_limit)?;
    if candidates.is_empty() {
        debug!("No targets awaiting a connection request");
        return Ok(report);
    }
    info!(candidates = candidates.len(), "Sending connection requests");

    let personalizer = Personalizer::for_notes(cfg);
    let mut sent: u32 = 0;

    for candidate in candidates {
        if let Some(halt) = ctx.halt() {
            report.halt(halt);
            break;
        }

        let now = ctx.clock.now();
        let target = match ctx.outreach.prepare_request(&candidate.url, &now)? {
            RequestGate::Proceed(target) => target,
            RequestGate::AlreadyContacted(_) => {
                report.skipped += 1;
                continue;
            }
            RequestGate::QuotaExhausted(decision) => {
                warn!(%decision, url = %candidate.url, "Connection quota exhausted, ending phase");
                ctx.outreach.record_quota_skip(
                    ActionKind::ConnectionRequest,
                    Some(&candidate.url),
                    decision,
                    ctx.clock.now_utc(),
                )?;
                report.quota_exhausted = true;
                break;
            }
        };

        report.processed += 1;
        let note = if cfg.send_note {
            Some(ctx.pacing().with_rng(|rng| personalizer.compose(&target, rng)))
        } else {
            None
        };

        match send_one(ctx, cfg, &target, note.as_deref()).await {
            Ok(Sent::Halted(halt)) => {
                info!(url = %target.url, %halt, "Stopped before sending, target stays eligible");
                report.halt(halt);
                break;
            }
            Ok(Sent::Delivered { with_note: attached }) => {
                let note = if attached { note.as_deref() } else { None };
                ctx.outreach
                    .confirm_request(&target, note, ctx.clock.now_utc())?;
                report.succeeded += 1;
                sent += 1;
                info!(url = %target.url, with_note = note.is_some(), "Connection request sent");
                if cfg.think_every > 0 && sent % cfg.think_every == 0 {
                    ctx.pacing().delay(DelayCategory::Think).await;
                }
            }
            Err(e) if e.is_recoverable() => {
                report.failed += 1;
                warn!(url = %target.url, error = %e, "Connection request failed");
                ctx.outreach
                    .record_request_failure(&target.url, &e.to_string(), ctx.clock.now_utc())?;
            }
            Err(e) => {
                return Err(ctx
                    .escalate(ActionKind::ConnectionRequest, Some(&target.url), e)
                    .await)
            }
        }

        ctx.pacing().delay(DelayCategory::Action).await;
    }

    info!(%report, "Connection phase finished");
    Ok(report)
}

enum Sent {
    /// 备注是否真的附上了
    Delivered { with_note: bool },
    Halted(Halt),
}

async fn send_one(
    ctx: &PhaseContext,
    cfg: &ConnectionSection,
    target: &Target,
    note: Option<&str>,
) -> Result<Sent, InteractionError> {
    let human = &ctx.human;
    let selectors = &cfg.selectors;

    human.navigate(&target.url).await?;
    ctx.ensure_clear().await?;
    human.simulate_reading().await?;
    human.hover_randomly().await?;

    let connect = human.require_first(&selectors.connect_button).await?;
    if let Some(halt) = ctx.halt() {
        return Ok(Sent::Halted(halt));
    }
    human.click(&connect).await?;

    let mut attached = false;
    if let Some(note) = note {
        match human.find_first(&selectors.add_note_button).await? {
            Some(add_note) => {
                human.click(&add_note).await?;
                let input = human.require_first(&selectors.note_input).await?;
                human.type_into(&input, note).await?;
                let send = human.require_first(&selectors.send_with_note).await?;
                human.click(&send).await?;
                attached = true;
            }
            None => {
                debug!(url = %target.url, "Add-note option unavailable, sending without note");
                send_without_note(ctx, cfg).await?;
            }
        }
    } else {
        send_without_note(ctx, cfg).await?;
    }

    ctx.ensure_clear().await?;
    Ok(Sent::Delivered { with_note: attached })
}

/// 部分页面点击“连接”即直接发送，没有确认按钮时视为已发送
async fn send_without_note(ctx: &PhaseContext, cfg: &ConnectionSection) -> Result<(), InteractionError> {
    if let Some(send) = ctx.human.find_first(&cfg.selectors.send_without_note).await? {
        ctx.human.click(&send).await?;
    }
    Ok(())
}
