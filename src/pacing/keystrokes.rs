//! 打字计划：把文本展开为逻辑按键序列
//!
//! 每个字符以固定概率先打一个错误字母、删除，再打正确字符；最后一个字符从不打错。
//! 计划与时序无关，测试只比较 `replay` 得到的逻辑内容。

use rand::Rng;

/// 逻辑按键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keystroke {
    Char(char),
    Backspace,
}

/// 生成按键计划
pub fn plan_keystrokes<R: Rng + ?Sized>(
    text: &str,
    typo_probability: f64,
    rng: &mut R,
) -> Vec<Keystroke> {
    let probability = typo_probability.clamp(0.0, 1.0);
    let chars: Vec<char> = text.chars().collect();
    let mut plan = Vec::with_capacity(chars.len() + chars.len() / 8);

    for (i, &c) in chars.iter().enumerate() {
        let is_last = i + 1 == chars.len();
        if !is_last && probability > 0.0 && rng.gen_bool(probability) {
            plan.push(Keystroke::Char(wrong_letter(c, rng)));
            plan.push(Keystroke::Backspace);
        }
        plan.push(Keystroke::Char(c));
    }
    plan
}

/// a-z 中与目标字符不同的一个字母
fn wrong_letter<R: Rng + ?Sized>(intended: char, rng: &mut R) -> char {
    let offset = rng.gen_range(0..26u8);
    let candidate = char::from(b'a' + offset);
    if candidate == intended {
        char::from(b'a' + (offset + 1) % 26)
    } else {
        candidate
    }
}

/// 重放按键计划，得到最终输入框内容
pub fn replay(plan: &[Keystroke]) -> String {
    let mut out = String::new();
    for key in plan {
        match key {
            Keystroke::Char(c) => out.push(*c),
            Keystroke::Backspace => {
                out.pop();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_replay_matches_input() {
        let mut rng = StdRng::seed_from_u64(42);
        for text in ["", "a", "Hi Jane, I work in robotics", "naïve café ✓"] {
            let plan = plan_keystrokes(text, 0.3, &mut rng);
            assert_eq!(replay(&plan), text);
        }
    }

    #[test]
    fn test_no_typos_when_probability_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let plan = plan_keystrokes("hello", 0.0, &mut rng);
        assert_eq!(plan.len(), 5);
        assert!(!plan.contains(&Keystroke::Backspace));
    }

    #[test]
    fn test_last_char_never_mistyped() {
        let mut rng = StdRng::seed_from_u64(9);
        let plan = plan_keystrokes("abc", 1.0, &mut rng);
        // a、b 各有一次打错 + 删除，c 直接输入
        assert_eq!(plan.len(), 3 + 2 * 2);
        assert_eq!(plan[plan.len() - 1], Keystroke::Char('c'));
        assert_eq!(plan[plan.len() - 2], Keystroke::Char('b'));
    }

    #[test]
    fn test_wrong_letter_differs() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let plan = plan_keystrokes("zz", 1.0, &mut rng);
            assert_ne!(plan[0], Keystroke::Char('z'));
        }
    }
}
