// Property-based tests using proptest
// These tests generate random documents and verify engine invariants

use proptest::prelude::*;

use xmlpager::lines::count_lines;
use xmlpager::pagination::{index_text, page_text, starting_line_counts};
use xmlpager::search::{SearchMode, SearchQuery};
use xmlpager::{Document, SearchEngine, Settings};

fn small_settings(page_size: usize) -> Settings {
    Settings {
        page_size,
        pagination_enabled: true,
        pagination_threshold: 0,
        disk_pagination_enabled: false,
        disk_pagination_threshold: u64::MAX,
    }
}

proptest! {
    /// Line count is 1 plus the number of line terminators, counting
    /// \r\n as one, and lone \r or \n as one each.
    #[test]
    fn prop_line_count_matches_terminator_count(text in "[a-z\r\n]{0,200}") {
        let mut terminators = 0;
        let mut prev_cr = false;
        for c in text.chars() {
            match c {
                '\r' => {
                    terminators += 1;
                    prev_cr = true;
                }
                '\n' => {
                    if !prev_cr {
                        terminators += 1;
                    }
                    prev_cr = false;
                }
                _ => prev_cr = false,
            }
        }
        prop_assert_eq!(count_lines(&text), terminators + 1);
    }

    /// Each page's starting line number is the previous page's start plus
    /// its line count minus one (the last line of a page continues onto
    /// the next page unless it ended exactly at the boundary).
    #[test]
    fn prop_starting_line_counts_formula(counts in proptest::collection::vec(1usize..50, 0..20)) {
        let starts = starting_line_counts(&counts);
        prop_assert_eq!(starts.len(), counts.len());
        if !starts.is_empty() {
            prop_assert_eq!(starts[0], 0);
        }
        for i in 1..starts.len() {
            prop_assert_eq!(starts[i], starts[i - 1] + counts[i - 1] - 1);
        }
    }

    /// Concatenating every page reproduces the document, and no page but
    /// the last exceeds the page size.
    #[test]
    fn prop_pages_partition_text(text in "[a-zé\n]{0,300}", page_size in 1usize..64) {
        let index = index_text(&text, page_size);
        let mut rebuilt = String::new();
        for page in 1..=index.page_count() {
            let p = page_text(&text, page_size, page);
            if page < index.page_count() {
                prop_assert_eq!(p.chars().count(), page_size);
            } else {
                prop_assert!(p.chars().count() <= page_size);
            }
            rebuilt.push_str(&p);
        }
        prop_assert_eq!(rebuilt, text);
    }

    /// Byte offsets from the index are exactly the byte positions of the
    /// page-size char boundaries.
    #[test]
    fn prop_index_byte_offsets_are_char_boundaries(
        text in "[a-zé€\n]{0,200}",
        page_size in 1usize..32,
    ) {
        let index = index_text(&text, page_size);
        for (i, &offset) in index.byte_offsets().iter().enumerate() {
            let expected: usize = text
                .chars()
                .take(i * page_size)
                .map(|c| c.len_utf8())
                .sum();
            prop_assert_eq!(offset, expected as u64);
        }
    }

    /// find_all returns non-overlapping matches in ascending order, each
    /// of which really is the pattern.
    #[test]
    fn prop_find_all_nonoverlapping(
        haystack in "[ab]{0,100}",
        needle in "[ab]{1,4}",
    ) {
        let engine = SearchEngine::new();
        let query = SearchQuery::new(needle.as_str(), SearchMode::Normal);
        let finds = engine.find_all(&haystack, &query).unwrap();
        let chars: Vec<char> = haystack.chars().collect();
        let mut prev_end = 0;
        for find in &finds {
            prop_assert!(find.start >= prev_end);
            let matched: String = chars[find.start..find.end].iter().collect();
            prop_assert_eq!(&matched, &needle);
            prev_end = find.end;
        }
    }

    /// A metacharacter-free literal behaves identically in Normal and
    /// Regex modes.
    #[test]
    fn prop_normal_equals_regex_for_literals(
        haystack in "[a-z ]{0,80}",
        needle in "[a-z]{1,5}",
        offset in 0usize..100,
    ) {
        let engine = SearchEngine::new();
        let normal = engine
            .find_next(&haystack, &SearchQuery::new(needle.as_str(), SearchMode::Normal), offset)
            .unwrap();
        let regex = engine
            .find_next(&haystack, &SearchQuery::new(needle.as_str(), SearchMode::Regex), offset)
            .unwrap();
        prop_assert_eq!(normal, regex);
    }

    /// replace_all with the pattern itself is the identity.
    #[test]
    fn prop_replace_with_self_is_identity(
        haystack in "[ab ]{0,100}",
        needle in "[ab]{1,3}",
    ) {
        let engine = SearchEngine::new();
        let query = SearchQuery::new(needle.as_str(), SearchMode::Normal);
        let (out, _count) = engine.replace_all(&haystack, &query, &needle).unwrap();
        prop_assert_eq!(out, haystack);
    }

    /// Stripping inter-tag whitespace never loses tag or data content:
    /// the output equals the input with inter-tag whitespace runs removed.
    #[test]
    fn prop_ugly_preserves_non_whitespace(depth in 1usize..5, data in "[a-z]{0,8}") {
        // Build a well-formed nested document with noisy whitespace.
        let mut doc = String::new();
        for i in 0..depth {
            doc.push_str(&format!("<t{i}>\n  "));
        }
        doc.push_str(&data);
        for i in (0..depth).rev() {
            doc.push_str(&format!("</t{i}>\n"));
        }
        let ugly = xmlpager::formatter::ugly_print_str(&doc).unwrap();
        let stripped: String = ugly.chars().filter(|c| !c.is_whitespace()).collect();
        let expected: String = doc.chars().filter(|c| !c.is_whitespace()).collect();
        prop_assert_eq!(stripped, expected);
    }

    /// Pretty-printing then stripping whitespace is the same as stripping
    /// whitespace from the original.
    #[test]
    fn prop_pretty_preserves_non_whitespace(depth in 1usize..5, data in "[a-z]{1,8}") {
        let mut doc = String::new();
        for i in 0..depth {
            doc.push_str(&format!("<t{i}>"));
        }
        doc.push_str(&data);
        for i in (0..depth).rev() {
            doc.push_str(&format!("</t{i}>"));
        }
        let pretty = xmlpager::formatter::pretty_print_str(&doc, 2).unwrap();
        let stripped: String = pretty.chars().filter(|c| !c.is_whitespace()).collect();
        prop_assert_eq!(stripped, doc);
    }

    /// Random window edits folded back through navigation keep the
    /// document equal to a flat-string model of the same edits.
    #[test]
    fn prop_paginated_edits_match_flat_model(
        text in "[a-z]{10,60}",
        page_size in 2usize..8,
        replacement in "[A-Z]{0,6}",
        page_choice in 0usize..100,
    ) {
        let mut doc = Document::from_text(text.as_str(), small_settings(page_size));
        let page = page_choice % doc.page_count() + 1;
        doc.goto_page(page).unwrap();
        doc.edit_visible(replacement.as_str());

        // Flat model: replace the same char range in the original string.
        let chars: Vec<char> = text.chars().collect();
        let start = page_size * (page - 1);
        let end = (start + page_size).min(chars.len());
        let mut expected: String = chars[..start].iter().collect();
        expected.push_str(&replacement);
        expected.extend(&chars[end..]);

        doc.goto_page(1).unwrap();
        let mut rebuilt = String::new();
        for p in 1..=doc.page_count() {
            doc.goto_page(p).unwrap();
            rebuilt.push_str(doc.visible_text());
        }
        prop_assert_eq!(rebuilt, expected);
    }
}
