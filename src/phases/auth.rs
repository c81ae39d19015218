//! 登录阶段：优先复用已有会话，否则以人类化方式填写凭据

use tracing::{info, warn};

use super::PhaseContext;
use crate::config::{CredentialsSection, SiteSection};
use crate::core::error::{ConfigError, CycleError, InteractionError};
use crate::store::{ActionKind, NewEvent, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// 首页已是登录状态
    SessionReused,
    LoggedIn,
}

pub async fn authenticate(
    ctx: &PhaseContext,
    site: &SiteSection,
    credentials: &CredentialsSection,
) -> Result<AuthOutcome, CycleError> {
    let kind = ActionKind::Authentication;
    match try_authenticate(ctx, site, credentials).await {
        Ok(outcome) => {
            let detail = match outcome {
                AuthOutcome::SessionReused => "existing session reused",
                AuthOutcome::LoggedIn => "logged in with credentials",
            };
            info!(detail, "Authenticated");
            ctx.outreach.store().log_event(
                &NewEvent::new(kind, Outcome::Success, ctx.clock.now_utc()).detail(detail),
            )?;
            Ok(outcome)
        }
        Err(AuthError::Config(e)) => {
            ctx.outreach.store().log_event(
                &NewEvent::new(kind, Outcome::Failure, ctx.clock.now_utc()).detail(e.to_string()),
            )?;
            Err(CycleError::Config(e))
        }
        Err(AuthError::Interaction(e)) => {
            let e = match e {
                // 登录过程中的任何可恢复错误都意味着无法建立会话
                InteractionError::NotFound(_) | InteractionError::Failed(_) => {
                    InteractionError::SessionLost(format!("login failed: {e}"))
                }
                other => other,
            };
            Err(ctx.escalate(kind, None, e).await)
        }
    }
}

enum AuthError {
    Config(ConfigError),
    Interaction(InteractionError),
}

impl From<InteractionError> for AuthError {
    fn from(e: InteractionError) -> Self {
        AuthError::Interaction(e)
    }
}

async fn try_authenticate(
    ctx: &PhaseContext,
    site: &SiteSection,
    credentials: &CredentialsSection,
) -> Result<AuthOutcome, AuthError> {
    let human = &ctx.human;
    let driver = human.driver().as_ref();

    human.navigate(&site.home_url).await?;
    ctx.ensure_clear().await?;
    if ctx.guard.is_logged_in(driver).await? {
        return Ok(AuthOutcome::SessionReused);
    }

    let (Some(email), Some(password)) = (credentials.email.as_deref(), credentials.password.as_deref())
    else {
        return Err(AuthError::Config(ConfigError::MissingCredentials));
    };

    info!("No active session, logging in");
    human.navigate(&site.login_url).await?;
    ctx.ensure_clear().await?;

    let username = human.require_first(&site.username_input).await?;
    human.type_into(&username, email).await?;
    let password_input = human.require_first(&site.password_input).await?;
    human.type_into(&password_input, password).await?;
    let submit = human.require_first(&site.login_submit).await?;
    human.click(&submit).await?;

    // 等待跳转
    ctx.pacing()
        .delay(crate::pacing::DelayCategory::Think)
        .await;
    ctx.ensure_clear().await?;

    for selector in &site.login_error {
        if let Some(el) = driver.find_element(selector).await? {
            let text = driver.element_text(&el).await.unwrap_or_default();
            warn!(selector = %selector, message = %text.trim(), "Login rejected");
            return Err(InteractionError::SessionLost(format!("login rejected: {}", text.trim())).into());
        }
    }

    if ctx.guard.is_logged_in(driver).await? {
        Ok(AuthOutcome::LoggedIn)
    } else {
        Err(InteractionError::SessionLost("logged-in marker missing after login".into()).into())
    }
}
