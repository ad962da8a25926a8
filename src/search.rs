use crate::error::Result;
use crate::filter::{self, Filter};
use crate::record::Record;
use crate::store::UserStore;
use tracing::debug;

/// Selects users for a raw `filter` parameter.
///
/// An empty filter returns everything. Text starting with `(` goes through
/// the filter engine; a malformed filter is an error, never an empty result.
/// Otherwise `key=value` is an exact, case-insensitive store lookup, and
/// anything else returns everything.
pub fn search_users(store: &UserStore, raw: Option<&str>) -> Result<Vec<Record>> {
    let raw = raw.map(str::trim).unwrap_or_default();

    if raw.is_empty() {
        return store.all_users();
    }

    if raw.starts_with('(') {
        let filter = filter::parse(raw)?;
        debug!("Parsed filter {:?}", filter);
        return Ok(select(&filter, store.all_users()?));
    }

    if let Some((key, value)) = raw.split_once('=') {
        return store.find_by_attribute(key.trim(), value.trim());
    }

    store.all_users()
}

/// Keeps the records matching `filter`, in their original order.
pub fn select(filter: &Filter, records: Vec<Record>) -> Vec<Record> {
    records
        .into_iter()
        .filter(|record| filter::evaluate(filter, record))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::record::AttrValue;
    use serde_json::json;

    fn store() -> UserStore {
        let store = UserStore::open_in_memory().unwrap();
        let users = [
            json!({"dn": "cn=alice", "cn": "Alice", "sAMAccountName": "alice", "uidNumber": 1001, "memberOf": ["Admins", "Users"]}),
            json!({"dn": "cn=bob", "cn": "Bob", "sAMAccountName": "bob", "uidNumber": 999, "memberOf": ["Users"]}),
            json!({"dn": "cn=carol", "cn": "Carol", "sAMAccountName": "carol", "uidNumber": 1500, "memberOf": "AdminsReadOnly"}),
        ];
        for user in users {
            store.create_user(user.as_object().unwrap()).unwrap();
        }
        store
    }

    fn names(records: &[Record]) -> Vec<String> {
        records
            .iter()
            .map(|r| r.lookup("cn").map(|v| v.as_text().into_owned()).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_empty_returns_everything() {
        let store = store();
        assert_eq!(search_users(&store, None).unwrap().len(), 3);
        assert_eq!(search_users(&store, Some("")).unwrap().len(), 3);
        assert_eq!(search_users(&store, Some("   ")).unwrap().len(), 3);
    }

    #[test]
    fn test_filter_expression_preserves_store_order() {
        let store = store();
        let found = search_users(&store, Some("(uidNumber>=1000)")).unwrap();
        assert_eq!(names(&found), ["Alice", "Carol"]);

        let found = search_users(&store, Some(" (memberOf=Users) ")).unwrap();
        assert_eq!(names(&found), ["Alice", "Bob"]);

        let found = search_users(&store, Some("(|)")).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_malformed_filter_is_an_error() {
        let store = store();
        assert!(matches!(
            search_users(&store, Some("(cn=Alice")),
            Err(Error::Filter(_))
        ));
    }

    #[test]
    fn test_key_value_shortcut() {
        let store = store();
        let found = search_users(&store, Some("SAMACCOUNTNAME = Bob")).unwrap();
        assert_eq!(names(&found), ["Bob"]);
        assert_eq!(found[0].lookup("uidNumber"), Some(&AttrValue::Int(999)));

        // whole-column match, unlike the filter engine's multi-value equality
        assert_eq!(search_users(&store, Some("memberOf=Users")).unwrap().len(), 1);
        assert!(search_users(&store, Some("unknown=x")).unwrap().is_empty());
    }

    #[test]
    fn test_plain_text_returns_everything() {
        let store = store();
        assert_eq!(search_users(&store, Some("alice")).unwrap().len(), 3);
    }
}
