//! Link-based deduplication of freshly parsed items.

use std::collections::HashSet;

use crate::parser::ParsedItem;

/// Returns the items whose link is not already known for a feed.
///
/// Document order is preserved. Repeated links inside one parsed batch are
/// collapsed to their first occurrence, so a feed never ends up holding two
/// posts with the same link.
pub fn find_new_items(existing_links: &HashSet<String>, parsed: &[ParsedItem]) -> Vec<ParsedItem> {
    let mut seen: HashSet<&str> = HashSet::new();
    parsed
        .iter()
        .filter(|item| !existing_links.contains(&item.link))
        .filter(|item| seen.insert(item.link.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(link: &str) -> ParsedItem {
        ParsedItem {
            title: format!("title for {}", link),
            description: String::new(),
            link: link.to_string(),
        }
    }

    fn links(items: &[ParsedItem]) -> Vec<&str> {
        items.iter().map(|i| i.link.as_str()).collect()
    }

    #[test]
    fn test_nothing_known_returns_everything() {
        let parsed = vec![item("L1"), item("L2")];
        let result = find_new_items(&HashSet::new(), &parsed);
        assert_eq!(links(&result), vec!["L1", "L2"]);
    }

    #[test]
    fn test_only_unknown_links_survive() {
        let existing: HashSet<String> = ["L1", "L2"].iter().map(|s| s.to_string()).collect();
        let parsed = vec![item("L1"), item("L2"), item("L3")];
        let result = find_new_items(&existing, &parsed);
        assert_eq!(links(&result), vec!["L3"]);
    }

    #[test]
    fn test_keeps_source_order() {
        let existing: HashSet<String> = ["L2"].iter().map(|s| s.to_string()).collect();
        let parsed = vec![item("L5"), item("L2"), item("L1"), item("L4")];
        let result = find_new_items(&existing, &parsed);
        assert_eq!(links(&result), vec!["L5", "L1", "L4"]);
    }

    #[test]
    fn test_all_known_returns_empty() {
        let existing: HashSet<String> = ["L1"].iter().map(|s| s.to_string()).collect();
        assert!(find_new_items(&existing, &[item("L1")]).is_empty());
    }

    #[test]
    fn test_intra_batch_duplicates_keep_first() {
        let mut second = item("L1");
        second.title = "later copy".to_string();
        let parsed = vec![item("L1"), item("L2"), second];
        let result = find_new_items(&HashSet::new(), &parsed);
        assert_eq!(links(&result), vec!["L1", "L2"]);
        assert_eq!(result[0].title, "title for L1");
    }

    #[test]
    fn test_idempotent() {
        let existing: HashSet<String> = ["L1"].iter().map(|s| s.to_string()).collect();
        let parsed = vec![item("L1"), item("L2"), item("L3")];
        assert_eq!(
            find_new_items(&existing, &parsed),
            find_new_items(&existing, &parsed)
        );
    }
}
