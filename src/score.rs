/// 计分规则，根据提交的单词计算得分
///
/// 以trait对象的形式注入到对局注册表中，替换计分经济时无需改动对局逻辑。
pub trait ScoreRule: Send + Sync {
    fn score(&self, word: &str) -> u32;
}

/// 默认计分规则：按字母数计分
#[derive(Debug, Clone)]
pub struct LetterCountRule {
    pub points_per_letter: u32,
}

impl LetterCountRule {
    pub fn new(points_per_letter: u32) -> Self {
        LetterCountRule { points_per_letter }
    }
}

impl Default for LetterCountRule {
    fn default() -> Self {
        LetterCountRule::new(10)
    }
}

impl ScoreRule for LetterCountRule {
    fn score(&self, word: &str) -> u32 {
        word.chars().count() as u32 * self.points_per_letter
    }
}

/// 单词合法性校验，由宿主环境提供（词典或外部服务）
pub trait WordValidator: Send + Sync {
    fn is_valid(&self, word: &str) -> bool;
}

/// 默认校验规则：只接受纯字母单词
///
/// 占位实现，接入真实词典服务时替换。
#[derive(Debug, Clone, Default)]
pub struct AlphabeticValidator;

impl WordValidator for AlphabeticValidator {
    fn is_valid(&self, word: &str) -> bool {
        !word.is_empty() && word.chars().all(|c| c.is_alphabetic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_count_rule_scores_by_length() {
        let rule = LetterCountRule::default();
        assert_eq!(rule.score("CAT"), 30);
        assert_eq!(rule.score("ELEPHANT"), 80);
        assert_eq!(rule.score(""), 0);
    }

    #[test]
    fn letter_count_rule_counts_chars_not_bytes() {
        let rule = LetterCountRule::default();
        assert_eq!(rule.score("苹果"), 20);
    }

    #[test]
    fn custom_points_per_letter() {
        let rule = LetterCountRule::new(5);
        assert_eq!(rule.score("DOG"), 15);
    }

    #[test]
    fn alphabetic_validator_accepts_letters_only() {
        let validator = AlphabeticValidator;
        assert!(validator.is_valid("CAT"));
        assert!(validator.is_valid("dog"));
        assert!(!validator.is_valid("DOG1"));
        assert!(!validator.is_valid("A B"));
        assert!(!validator.is_valid(""));
    }
}
