//! Subtitle pagination and timestamp parsing.

/// Display time granted per printable character.
pub const TEXT_CHAR_MS: i32 = 80;
/// Shortest time any page stays up.
pub const MIN_PAGE_MS: i32 = 1000;

/// One unit of subtitle text with its display time in milliseconds. The
/// final page of a split carries its time negated: a suggested minimum,
/// with the actual end decided by the audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Page {
    pub text: Option<String>,
    pub time_ms: i32,
}

/// Split subtitle text into pages at CR/LF breaks and compute per-page
/// display times. The last page's time is stored negative (suggested
/// minimum; the audio decides the real end).
pub(crate) fn split_pages(text: &str) -> Vec<Page> {
    let mut pages: Vec<Page> = text
        .split("\r\n")
        .map(|raw| {
            let printable = raw.chars().filter(|c| !c.is_control()).count() as i32;
            Page {
                text: Some(raw.to_string()),
                time_ms: (printable * TEXT_CHAR_MS).max(MIN_PAGE_MS),
            }
        })
        .collect();
    if let Some(last) = pages.last_mut() {
        last.time_ms = -last.time_ms;
    }
    pages
}

/// Parse explicit page timestamps: unsigned integers separated by commas
/// or line breaks. Zeros and garbage entries are skipped.
pub(crate) fn parse_timestamps(text: &str) -> Vec<u32> {
    text.split([',', '\r', '\n'])
        .filter_map(|part| part.trim().parse::<u32>().ok())
        .filter(|&t| t != 0)
        .collect()
}

/// Whether subtitle text was cut mid-word: its last character is neither
/// whitespace nor punctuation.
pub(crate) fn ends_mid_word(text: &str) -> bool {
    text.chars()
        .last()
        .is_some_and(|c| !c.is_whitespace() && !c.is_ascii_punctuation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_two_pages() {
        let pages = split_pages("Hello world\r\nGoodbye");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].text.as_deref(), Some("Hello world"));
        assert_eq!(pages[1].text.as_deref(), Some("Goodbye"));
        // 11 printable chars at 80 ms is below the floor.
        assert_eq!(pages[0].time_ms, 1000);
        // Final page: suggested minimum, negated.
        assert_eq!(pages[1].time_ms, -1000);
    }

    #[test]
    fn test_long_page_time_scales_with_chars() {
        let text = "x".repeat(40);
        let pages = split_pages(&text);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].time_ms, -(40 * TEXT_CHAR_MS));
    }

    #[test]
    fn test_empty_page_gets_floor_time() {
        let pages = split_pages("\r\n");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].time_ms, MIN_PAGE_MS);
        assert_eq!(pages[1].time_ms, -MIN_PAGE_MS);
    }

    #[test]
    fn test_parse_timestamps_mixed_separators() {
        assert_eq!(parse_timestamps("1200,0,3400\r\n500\n,,800"), vec![
            1200, 3400, 500, 800
        ]);
        assert!(parse_timestamps("").is_empty());
        assert!(parse_timestamps("0,0,0").is_empty());
        assert!(parse_timestamps("abc,-5").is_empty());
    }

    #[test]
    fn test_ends_mid_word() {
        assert!(ends_mid_word("interrup"));
        assert!(!ends_mid_word("done."));
        assert!(!ends_mid_word("trailing "));
        assert!(!ends_mid_word(""));
    }

    proptest! {
        #[test]
        fn prop_page_times_at_least_floor(text in ".*") {
            for page in split_pages(&text) {
                prop_assert!(page.time_ms.abs() >= MIN_PAGE_MS);
            }
        }

        #[test]
        fn prop_page_count_matches_breaks(text in "[a-z ]{0,40}(\r\n[a-z ]{0,40}){0,4}") {
            let breaks = text.matches("\r\n").count();
            prop_assert_eq!(split_pages(&text).len(), breaks + 1);
        }

        #[test]
        fn prop_only_last_page_negative(text in ".*") {
            let pages = split_pages(&text);
            let n = pages.len();
            for (i, page) in pages.iter().enumerate() {
                if i + 1 == n {
                    prop_assert!(page.time_ms < 0);
                } else {
                    prop_assert!(page.time_ms > 0);
                }
            }
        }

        #[test]
        fn prop_timestamps_all_positive(text in ".*") {
            for t in parse_timestamps(&text) {
                prop_assert!(t > 0);
            }
        }
    }
}
