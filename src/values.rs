use crate::record::{AttrValue, Record};
use std::collections::HashMap;

/// Counts the distinct values of `attribute` across `records`. Members of a
/// multi-valued attribute are counted individually.
pub fn collect_values(records: &[Record], attribute: &str) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();

    for record in records {
        let Some(value) = record.lookup(attribute) else {
            continue;
        };

        match value {
            AttrValue::Multi(items) => {
                for item in items.iter().filter(|s| !s.is_empty()) {
                    *counts.entry(item.clone()).or_default() += 1;
                }
            }
            _ => {
                let text = value.as_text();
                if !text.is_empty() {
                    *counts.entry(text.into_owned()).or_default() += 1;
                }
            }
        }
    }

    counts
}

pub fn format_values(counts: HashMap<String, usize>, show_count: bool) -> Vec<String> {
    let mut items: Vec<(String, usize)> = counts.into_iter().collect();

    if show_count {
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items
            .into_iter()
            .map(|(val, count)| format!("{}: {}", val, count))
            .collect()
    } else {
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items.into_iter().map(|(val, _)| val).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(names: &[&str]) -> AttrValue {
        AttrValue::Multi(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_collect_values() {
        let records = vec![
            Record::new().with("department", "Sales"),
            Record::new().with("Department", "Ops"),
            Record::new().with("department", "Sales"),
            Record::new().with("department", ""),
            Record::new(),
        ];

        let counts = collect_values(&records, "department");
        assert_eq!(counts.get("Sales"), Some(&2));
        assert_eq!(counts.get("Ops"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn test_collect_multi_valued() {
        let records = vec![
            Record::new().with("memberOf", groups(&["Admins", "Users"])),
            Record::new().with("memberOf", groups(&["Users"])),
        ];

        let counts = collect_values(&records, "memberOf");
        assert_eq!(counts.get("Users"), Some(&2));
        assert_eq!(counts.get("Admins"), Some(&1));
    }

    #[test]
    fn test_integer_values() {
        let records = vec![
            Record::new().with("gidNumber", 100_i64),
            Record::new().with("gidNumber", 100_i64),
        ];
        assert_eq!(collect_values(&records, "gidNumber").get("100"), Some(&2));
    }

    #[test]
    fn test_format_values() {
        let counts = HashMap::from([
            ("b".to_string(), 1),
            ("a".to_string(), 1),
            ("c".to_string(), 3),
        ]);
        assert_eq!(format_values(counts.clone(), false), ["a", "b", "c"]);
        assert_eq!(format_values(counts, true), ["c: 3", "a: 1", "b: 1"]);
    }
}
