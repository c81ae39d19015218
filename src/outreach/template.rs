//! 备注 / 消息模板渲染
//!
//! 占位符按字面替换：
//! `{{FirstName}}` 名字首个词（为空时用回退值），`{{Company}}` 组织，
//! `{{Role}}` / `{{Topic}}` 职位，`{{Field}}` 关键词。
//! 超长时按字符截断到 `max - 3` 并追加 `...`。

use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::{ConnectionSection, MessagingSection};
use crate::store::Target;

pub const DEFAULT_NOTE: &str = "Hi, I'd love to connect!";
pub const DEFAULT_MESSAGE: &str = "Thanks for connecting! Looking forward to staying in touch.";

const ELLIPSIS: &str = "...";

/// 名字的第一个词
pub fn first_name<'a>(full_name: &'a str, fallback: &'a str) -> &'a str {
    full_name.split_whitespace().next().unwrap_or(fallback)
}

pub fn render(template: &str, target: &Target, fallback_first_name: &str) -> String {
    template
        .replace("{{FirstName}}", first_name(&target.name, fallback_first_name))
        .replace("{{Company}}", &target.organization)
        .replace("{{Role}}", &target.role)
        .replace("{{Topic}}", &target.role)
        .replace("{{Field}}", &target.keywords)
}

/// 按字符数截断，保留结尾省略号
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= ELLIPSIS.len() {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - ELLIPSIS.len()).collect();
    out.push_str(ELLIPSIS);
    out
}

/// 一组模板 + 默认文本 + 长度上限
#[derive(Debug, Clone)]
pub struct Personalizer {
    templates: Vec<String>,
    default_text: String,
    fallback_first_name: String,
    max_length: Option<usize>,
}

impl Personalizer {
    pub fn new(templates: Vec<String>, default_text: impl Into<String>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .filter(|t| !t.trim().is_empty())
                .collect(),
            default_text: default_text.into(),
            fallback_first_name: "there".to_string(),
            max_length: None,
        }
    }

    pub fn with_fallback_first_name(mut self, fallback: impl Into<String>) -> Self {
        self.fallback_first_name = fallback.into();
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// 连接备注
    pub fn for_notes(cfg: &ConnectionSection) -> Self {
        Self::new(cfg.note_templates.clone(), DEFAULT_NOTE)
            .with_fallback_first_name(cfg.fallback_first_name.clone())
            .with_max_length(cfg.note_max_length)
    }

    /// 跟进消息（不截断）
    pub fn for_messages(cfg: &MessagingSection, fallback_first_name: &str) -> Self {
        Self::new(cfg.templates.clone(), DEFAULT_MESSAGE).with_fallback_first_name(fallback_first_name)
    }

    /// 随机选一个模板渲染；没有模板时用默认文本
    pub fn compose<R: Rng + ?Sized>(&self, target: &Target, rng: &mut R) -> String {
        let template = self
            .templates
            .choose(rng)
            .map(String::as_str)
            .unwrap_or(self.default_text.as_str());
        let text = render(template, target, &self.fallback_first_name);
        match self.max_length {
            Some(max) => truncate_with_ellipsis(&text, max),
            None => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn target(name: &str, keywords: &str) -> Target {
        Target {
            id: 1,
            url: "https://example.com/in/jane-doe".into(),
            name: name.into(),
            role: "Staff Engineer".into(),
            organization: "Acme".into(),
            location: String::new(),
            keywords: keywords.into(),
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_placeholders() {
        let t = target("Jane Doe", "robotics");
        assert_eq!(
            render("Hi {{FirstName}}, I work in {{Field}}", &t, "there"),
            "Hi Jane, I work in robotics"
        );
        assert_eq!(
            render("{{Role}} at {{Company}} / {{Topic}}", &t, "there"),
            "Staff Engineer at Acme / Staff Engineer"
        );
    }

    #[test]
    fn test_empty_name_uses_fallback() {
        let t = target("   ", "robotics");
        assert_eq!(render("Hi {{FirstName}}!", &t, "there"), "Hi there!");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
        assert_eq!(truncate_with_ellipsis("abcdefghij", 10), "abcdefghij");
        assert_eq!(truncate_with_ellipsis("abcdefghijk", 10), "abcdefg...");
        // 多字节字符按字符计数
        assert_eq!(truncate_with_ellipsis("你好世界你好世界", 6), "你好世...");
    }

    #[test]
    fn test_compose_default_and_truncation() {
        let mut rng = StdRng::seed_from_u64(4);
        let t = target("Jane Doe", "robotics");

        let empty = Personalizer::new(vec![], DEFAULT_NOTE);
        assert_eq!(empty.compose(&t, &mut rng), DEFAULT_NOTE);

        let long = Personalizer::new(vec!["Hi {{FirstName}}, ".repeat(40)], DEFAULT_NOTE)
            .with_max_length(50);
        let note = long.compose(&t, &mut rng);
        assert_eq!(note.chars().count(), 50);
        assert!(note.ends_with("..."));
    }

    #[test]
    fn test_compose_picks_from_templates() {
        let mut rng = StdRng::seed_from_u64(8);
        let t = target("Jane Doe", "robotics");
        let p = Personalizer::new(
            vec!["A {{FirstName}}".into(), "B {{FirstName}}".into()],
            DEFAULT_MESSAGE,
        );
        for _ in 0..20 {
            let text = p.compose(&t, &mut rng);
            assert!(text == "A Jane" || text == "B Jane");
        }
    }
}
