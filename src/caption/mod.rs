//! 字幕切分
//!
//! 把一段旁白切成若干条不超过 `max_chars` 个字符的短字幕，顺序即显示顺序。
//! 标点一次扫描完成分类（小数点、省略号、句末标点），不做任何字符替换，
//! 因此原文中的任意字符都不会被误伤。

/// 默认每条字幕的最大字符数
pub const DEFAULT_MAX_CHARS: usize = 10;

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '．' | '！' | '？')
}

fn is_dot(c: char) -> bool {
    matches!(c, '.' | '．')
}

fn is_comma(c: char) -> bool {
    matches!(c, ',' | '，' | '、')
}

fn is_digit(c: char) -> bool {
    c.is_ascii_digit() || ('０'..='９').contains(&c)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 一段连续句末标点的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PunctRun {
    /// 句子在此结束
    Terminator,
    /// 两个数字之间的单个点，如 `3.5`
    DecimalPoint,
    /// 两到三个点
    Ellipsis,
}

fn classify_run(chars: &[char], start: usize, end: usize) -> PunctRun {
    let run = &chars[start..end];
    if run.iter().all(|&c| is_dot(c)) {
        match run.len() {
            1 => {
                let before = start.checked_sub(1).map(|i| chars[i]);
                let after = chars.get(end).copied();
                if before.is_some_and(is_digit) && after.is_some_and(is_digit) {
                    return PunctRun::DecimalPoint;
                }
            }
            2 | 3 => return PunctRun::Ellipsis,
            _ => {}
        }
    }
    PunctRun::Terminator
}

fn push_trimmed(out: &mut Vec<String>, buf: &mut String) {
    let trimmed = buf.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    buf.clear();
}

/// 按句末标点分句，标点串跟随前一句
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut current = String::new();

    let mut i = 0;
    while i < chars.len() {
        if !is_terminator(chars[i]) {
            current.push(chars[i]);
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() && is_terminator(chars[i]) {
            i += 1;
        }
        current.extend(&chars[start..i]);

        if classify_run(&chars, start, i) == PunctRun::Terminator {
            push_trimmed(&mut sentences, &mut current);
        }
    }
    push_trimmed(&mut sentences, &mut current);

    sentences
}

/// 按逗号切分，逗号留在前半部分；数字中间的千分位逗号不切
fn split_commas(sentence: &str) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        current.push(c);
        if !is_comma(c) {
            continue;
        }
        let thousands = i > 0
            && is_digit(chars[i - 1])
            && chars.get(i + 1).copied().is_some_and(is_digit);
        if !thousands {
            push_trimmed(&mut parts, &mut current);
        }
    }
    push_trimmed(&mut parts, &mut current);

    parts
}

/// 单个词超长时按固定长度硬切，最后一片可能更短
fn force_split(word: &str, max_chars: usize, out: &mut Vec<String>) {
    let chars: Vec<char> = word.chars().collect();
    for slice in chars.chunks(max_chars) {
        out.push(slice.iter().collect());
    }
}

/// 按空白分词后贪心拼装
fn pack_words(part: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut current = String::new();
    let mut current_len = 0;

    for word in part.split_whitespace() {
        let word_len = char_len(word);

        if word_len > max_chars {
            push_trimmed(out, &mut current);
            current_len = 0;
            force_split(word, max_chars, out);
            continue;
        }

        if current_len == 0 {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + 1 + word_len <= max_chars {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        } else {
            push_trimmed(out, &mut current);
            current.push_str(word);
            current_len = word_len;
        }
    }
    push_trimmed(out, &mut current);
}

/// 把旁白切成字幕
///
/// 长度按字符计。`max_chars` 为 0 时按 1 处理。空文本返回空列表，
/// 调用方需要把它当成“整段文本即一条字幕”。
pub fn chunk(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();

    for sentence in split_sentences(text) {
        if char_len(&sentence) <= max_chars {
            chunks.push(sentence);
            continue;
        }

        for part in split_commas(&sentence) {
            if char_len(&part) <= max_chars {
                chunks.push(part);
            } else {
                pack_words(&part, max_chars, &mut chunks);
            }
        }
    }

    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visible(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk("", 10).is_empty());
        assert!(chunk("   \n ", 10).is_empty());
    }

    #[test]
    fn decimal_point_is_not_a_sentence_boundary() {
        let chunks = chunk("속도는 3.5초입니다.", 10);
        assert_eq!(chunks, vec!["속도는", "3.5초입니다."]);
        assert!(chunks.iter().all(|c| !c.ends_with("3.")));
    }

    #[test]
    fn full_width_decimal_point() {
        let sentences = split_sentences("約３．５秒です。次へ");
        assert_eq!(sentences, vec!["約３．５秒です。", "次へ"]);
    }

    #[test]
    fn punctuation_run_stays_with_sentence() {
        let chunks = chunk("이거 실화냐?! 진짜 미쳤어요.", 10);
        assert_eq!(chunks, vec!["이거 실화냐?!", "진짜 미쳤어요."]);
    }

    #[test]
    fn ellipsis_does_not_end_sentence() {
        assert_eq!(split_sentences("음... 그렇군요."), vec!["음... 그렇군요."]);
        assert_eq!(split_sentences("음.. 그렇군요!"), vec!["음.. 그렇군요!"]);
        assert_eq!(split_sentences("음… 그렇군요."), vec!["음… 그렇군요."]);
        assert_eq!(split_sentences("음．．． 네"), vec!["음．．． 네"]);
    }

    #[test]
    fn long_dot_run_ends_sentence() {
        assert_eq!(split_sentences("끝.... 다음"), vec!["끝....", "다음"]);
        assert_eq!(split_sentences("진짜...! 와"), vec!["진짜...!", "와"]);
    }

    #[test]
    fn giant_token_is_force_split() {
        let text = "가나다라마바사아자차".repeat(8);
        assert_eq!(text.chars().count(), 80);

        let chunks = chunk(&text, 10);
        assert_eq!(chunks.len(), 8);
        assert!(chunks.iter().all(|c| c.chars().count() == 10));
    }

    #[test]
    fn forced_split_keeps_remainder_and_neighbours() {
        let chunks = chunk("짧은 ABCDEFGHIJKLMNOPQRSTUVWXY 끝", 10);
        assert_eq!(chunks, vec!["짧은", "ABCDEFGHIJ", "KLMNOPQRST", "UVWXY", "끝"]);
    }

    #[test]
    fn commas_split_long_sentences() {
        let chunks = chunk("첫째로 배터리가 크고, 둘째로 충전이 빠릅니다.", 10);
        assert_eq!(
            chunks,
            vec!["첫째로 배터리가", "크고,", "둘째로 충전이", "빠릅니다."]
        );
    }

    #[test]
    fn short_comma_parts_are_emitted_whole() {
        let chunks = chunk("네, 맞아요, 정말 그렇습니다.", 10);
        assert_eq!(chunks, vec!["네,", "맞아요,", "정말 그렇습니다."]);
    }

    #[test]
    fn thousands_separator_is_kept() {
        let chunks = chunk("가격은 6,715만원부터 시작합니다", 10);
        assert_eq!(chunks, vec!["가격은", "6,715만원부터", "시작합니다"]);
    }

    #[test]
    fn punctuation_only_survives() {
        assert_eq!(chunk("?!", 10), vec!["?!"]);
        assert_eq!(chunk("...", 10), vec!["..."]);
    }

    #[test]
    fn zero_limit_is_treated_as_one() {
        assert_eq!(chunk("가나", 0), vec!["가", "나"]);
    }

    #[test]
    fn chunks_respect_limit_and_preserve_text() {
        let samples = [
            "아이오닉9 가격 공개! 6715만원부터 7941만원까지! 대형 전기 SUV인데 이 가격 실화야?",
            "532km 주행거리에 초고속 충전, 6인승 7인승까지! 경쟁차 대비 가성비 어떤지 팩트체크 해볼게!",
            "EV6와 아이오닉6, 과연 어떤 차가 더 좋을까요... 지금 바로 비교해 봅니다.",
            "The quick brown fox jumps over the lazy dog. It was 2.5 times faster!!",
            "supercalifragilisticexpialidocious, antidisestablishmentarianism.",
        ];

        for limit in [1, 3, 7, 10, 16] {
            for text in samples {
                let chunks = chunk(text, limit);
                for c in &chunks {
                    assert!(c.chars().count() <= limit, "{c:?} exceeds {limit}");
                    assert_eq!(c.trim(), c);
                }
                assert_eq!(visible(&chunks.concat()), visible(text));
            }
        }
    }
}
