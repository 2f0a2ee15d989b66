//! Keyword-density window selection over long passages.

/// Default window width, in characters.
pub const DEFAULT_WINDOW_SIZE: usize = 800;
/// Default distance between window starts, in characters.
pub const DEFAULT_STEP: usize = 200;

const EXACT_HIT: usize = 10;
const PARTIAL_HIT: usize = 3;
/// Windows scoring at least this share of the maximum end the scan early.
const GOOD_ENOUGH_PERCENT: usize = 80;

/// Picks the window of a text that mentions a query's keywords most.
///
/// All lengths and offsets are in characters, so CJK text is never split
/// inside a code point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelevanceExtractor {
    window_size: usize,
    step: usize,
}

impl Default for RelevanceExtractor {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            step: DEFAULT_STEP,
        }
    }
}

impl RelevanceExtractor {
    /// Create an extractor. Zero sizes are raised to one.
    pub fn new(window_size: usize, step: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            step: step.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// The most query-relevant window of `text`, wrapped in ellipses.
    ///
    /// Text shorter than the window comes back unchanged. A query with no
    /// usable keywords yields the first window, unwrapped. Ties go to the
    /// leftmost window.
    pub fn extract(&self, text: &str, query: &str) -> String {
        // byte offset of every char boundary, including the end
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let char_len = boundaries.len() - 1;

        if char_len < self.window_size {
            return text.to_string();
        }

        let keywords = tokenize_query(query);
        if keywords.is_empty() {
            return text[..boundaries[self.window_size]].to_string();
        }

        let good_enough = keywords.len() * EXACT_HIT * GOOD_ENOUGH_PERCENT;
        let mut best: Option<(usize, &str)> = None;

        for start in (0..char_len).step_by(self.step) {
            let end = (start + self.window_size).min(char_len);
            let window = &text[boundaries[start]..boundaries[end]];
            let score = score_window(window, &keywords);

            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, window));
            }
            if score * 100 >= good_enough {
                break;
            }
        }

        let window = best.map_or("", |(_, window)| window);
        format!("...{window}...")
    }
}

/// Split a query into keywords on `·`, whitespace, `-` and `_`.
///
/// Single-character fragments are dropped.
pub fn tokenize_query(query: &str) -> Vec<String> {
    query
        .split(|c: char| c == '·' || c == '-' || c == '_' || c.is_whitespace())
        .filter(|token| token.chars().count() > 1)
        .map(str::to_string)
        .collect()
}

/// Score a window: 10 per keyword found verbatim, 3 per keyword of three or
/// more characters found without its first character.
pub fn score_window(window: &str, keywords: &[String]) -> usize {
    keywords
        .iter()
        .map(|keyword| {
            if window.contains(keyword.as_str()) {
                return EXACT_HIT;
            }
            let mut chars = keyword.chars();
            if keyword.chars().count() >= 3 {
                chars.next();
                if window.contains(chars.as_str()) {
                    return PARTIAL_HIT;
                }
            }
            0
        })
        .sum()
}

/// [`RelevanceExtractor::extract`] with the default window and step.
pub fn extract_relevant_segment(text: &str, query: &str) -> String {
    RelevanceExtractor::default().extract(text, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_unchanged() {
        let extractor = RelevanceExtractor::new(50, 10);
        let text = "百草堂内陈设简单";
        assert_eq!(extractor.extract(text, "百草堂 陈设"), text);
        assert_eq!(extract_relevant_segment("", "百草堂"), "");
    }

    #[test]
    fn test_tokenize_query() {
        assert_eq!(
            tokenize_query("百草堂·陈设 布局-年代_a"),
            vec!["百草堂", "陈设", "布局", "年代"]
        );
        assert!(tokenize_query("a · b").is_empty());
    }

    #[test]
    fn test_prefers_window_with_keywords() {
        let filler = "山风吹过".repeat(10);
        let text = format!("{filler}百草堂里陈设古朴{filler}");
        let extractor = RelevanceExtractor::new(10, 5);

        let segment = extractor.extract(&text, "百草堂 陈设");
        assert!(segment.starts_with("..."));
        assert!(segment.ends_with("..."));
        assert!(segment.contains("百草堂"));
        assert!(segment.contains("陈设"));
    }

    #[test]
    fn test_scores() {
        let keywords = tokenize_query("百草堂 陈设");
        assert_eq!(score_window("百草堂里陈设古朴", &keywords), 20);
        assert_eq!(score_window("草堂", &keywords), 3);
        assert_eq!(score_window("山风吹过", &keywords), 0);
    }

    #[test]
    fn test_tie_goes_to_leftmost_window() {
        // no window mentions the keyword, so every score is zero
        let text = "甲乙丙丁戊己庚辛壬癸".repeat(3);
        let extractor = RelevanceExtractor::new(10, 10);
        assert_eq!(extractor.extract(&text, "玉佩"), "...甲乙丙丁戊己庚辛壬癸...");
    }

    #[test]
    fn test_good_enough_window_stops_the_scan() {
        let query = "甲乙 丙丁 戊己 庚辛 壬癸";
        let extractor = RelevanceExtractor::new(10, 10);

        // four of five keywords reach 80%, so the later perfect window is never scored
        let text = "甲乙丙丁戊己庚辛山山甲乙丙丁戊己庚辛壬癸";
        assert_eq!(extractor.extract(text, query), "...甲乙丙丁戊己庚辛山山...");

        // three of five keep the scan going
        let text = "甲乙丙丁戊己山山山山甲乙丙丁戊己庚辛壬癸";
        assert_eq!(extractor.extract(text, query), "...甲乙丙丁戊己庚辛壬癸...");
    }

    #[test]
    fn test_query_without_keywords_truncates() {
        let text = "一二三四五六七八九十";
        let extractor = RelevanceExtractor::new(4, 2);
        assert_eq!(extractor.extract(text, "a b"), "一二三四");
    }

    #[test]
    fn test_zero_sizes_are_clamped() {
        let extractor = RelevanceExtractor::new(0, 0);
        assert_eq!(extractor.window_size(), 1);
        assert_eq!(extractor.step(), 1);
        assert_eq!(extractor.extract("甲玉乙", "玉佩"), "...甲...");
    }
}
