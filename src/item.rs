//! Normalized sync items and the paging-aware collection that carries them through the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::parser::ParsedRecord;

/// Field every item carries to remember its position in the source page.
pub const SYNC_KEY: &str = "_sync_key";

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(list) => segment.parse::<usize>().ok().and_then(|i| list.get(i)),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(list) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| list.get_mut(i)),
        _ => None,
    }
}

pub(crate) fn lookup<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = segments(path);
    let mut current = map.get(parts.next()?)?;
    for part in parts {
        current = child(current, part)?;
    }
    Some(current)
}

fn lookup_mut<'a>(map: &'a mut Map<String, Value>, path: &str) -> Option<&'a mut Value> {
    let mut parts = segments(path);
    let mut current = map.get_mut(parts.next()?)?;
    for part in parts {
        current = child_mut(current, part)?;
    }
    Some(current)
}

/// Writes `value` at `path`, turning anything in the way into an object.
pub(crate) fn assign(map: &mut Map<String, Value>, path: &str, value: Value) {
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = parts.split_last() else {
        return;
    };
    let mut current = map;
    for part in parents {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(inner) => inner,
            _ => unreachable!("entry was just coerced into an object"),
        };
    }
    current.insert(last.to_string(), value);
}

fn remove(map: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => map.shift_remove(path),
        Some((parent, last)) => match lookup_mut(map, parent)? {
            Value::Object(inner) => inner.shift_remove(last),
            Value::Array(list) => {
                let index = last.parse::<usize>().ok()?;
                (index < list.len()).then(|| list.remove(index))
            }
            _ => None,
        },
    }
}

/// Loose emptiness: null, false, zero, "", "0" and empty containers all count as empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Renders scalars as plain strings (numbers and booleans included).
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// One normalized source record: a schema-less nested mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncItem {
    data: Map<String, Value>,
}

impl SyncItem {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// Objects are taken as-is; anything else is wrapped as `{ "value": ... }`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(data) => Self { data },
            other => {
                let mut data = Map::new();
                data.insert("value".to_string(), other);
                Self { data }
            }
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.data.get(SYNC_KEY).and_then(Value::as_str)
    }

    pub fn has(&self, path: &str) -> bool {
        lookup(&self.data, path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.data, path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        lookup_mut(&mut self.data, path)
    }

    pub fn get_string(&self, path: &str) -> Option<String> {
        self.get(path).and_then(value_to_string)
    }

    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        assign(&mut self.data, path, value.into());
    }

    pub fn unset(&mut self, path: &str) -> Option<Value> {
        remove(&mut self.data, path)
    }

    pub fn is_empty_at(&self, path: &str) -> bool {
        self.get(path).map_or(true, is_empty_value)
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.data)
    }

    /// Copies every top-level field of `other` over this item.
    pub fn extend_from(&mut self, other: &SyncItem) {
        for (key, value) in other.fields() {
            if key != SYNC_KEY {
                self.data.insert(key.clone(), value.clone());
            }
        }
    }
}

/// An ordered, keyed page of items plus the paging flag computed by the fetcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncItemCollection {
    items: Vec<SyncItem>,
    original_count: usize,
    has_next_page: bool,
}

impl SyncItemCollection {
    pub fn new(records: Vec<ParsedRecord>) -> Self {
        let mut collection = Self::default();
        collection.set_items(records);
        collection.original_count = collection.items.len();
        collection
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self::new(
            values
                .into_iter()
                .enumerate()
                .map(|(i, record)| ParsedRecord::new(i.to_string(), record))
                .collect(),
        )
    }

    /// Replaces the items, stamping each with its key. The original count is left alone.
    pub fn set_items(&mut self, records: Vec<ParsedRecord>) {
        self.items = records
            .into_iter()
            .map(|record| {
                let mut item = SyncItem::from_value(record.record);
                item.set(SYNC_KEY, record.key);
                item
            })
            .collect();
    }

    pub fn items(&self) -> &[SyncItem] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SyncItem> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, SyncItem> {
        self.items.iter_mut()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn original_count(&self) -> usize {
        self.original_count
    }

    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn has_next_page(&self) -> bool {
        self.has_next_page
    }

    pub fn set_has_next_page(&mut self, has_next_page: bool) {
        self.has_next_page = has_next_page;
    }

    pub fn first(&self) -> Option<&SyncItem> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&SyncItem> {
        self.items.last()
    }

    /// Keeps `length` items starting at `offset`.
    pub fn slice(&mut self, offset: usize, length: usize) {
        let start = offset.min(self.items.len());
        let end = start.saturating_add(length).min(self.items.len());
        self.items = self.items.drain(start..end).collect();
    }

    pub fn retain(&mut self, keep: impl FnMut(&SyncItem) -> bool) {
        self.items.retain(keep);
    }

    pub fn remove_item(&mut self, key: &str) -> Option<SyncItem> {
        let index = self.items.iter().position(|i| i.key() == Some(key))?;
        Some(self.items.remove(index))
    }

    pub fn item(&self, key: &str) -> Option<&SyncItem> {
        self.items.iter().find(|i| i.key() == Some(key))
    }

    fn split_path(path: &str) -> (&str, Option<&str>) {
        match path.split_once('.') {
            Some((key, rest)) => (key, Some(rest)),
            None => (path, None),
        }
    }

    /// `"<key>"` addresses an item, `"<key>.<path>"` a field inside it.
    pub fn has(&self, path: &str) -> bool {
        let (key, rest) = Self::split_path(path);
        match (self.item(key), rest) {
            (Some(_), None) => true,
            (Some(item), Some(rest)) => item.has(rest),
            (None, _) => false,
        }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let (key, rest) = Self::split_path(path);
        self.item(key)?.get(rest?)
    }

    /// Sets a field on an existing item; returns false when no item has that key.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> bool {
        let (key, rest) = Self::split_path(path);
        let Some(rest) = rest else {
            return false;
        };
        match self.items.iter_mut().find(|i| i.key() == Some(key)) {
            Some(item) => {
                item.set(rest, value);
                true
            }
            None => false,
        }
    }

    pub fn unset(&mut self, path: &str) -> Option<Value> {
        let (key, rest) = Self::split_path(path);
        match rest {
            None => self.remove_item(key).map(SyncItem::into_value),
            Some(rest) => self
                .items
                .iter_mut()
                .find(|i| i.key() == Some(key))?
                .unset(rest),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (index, item) in self.items.iter().enumerate() {
            let key = item
                .key()
                .map(str::to_string)
                .unwrap_or_else(|| index.to_string());
            map.insert(key, item.to_value());
        }
        Value::Object(map)
    }
}

impl<'a> IntoIterator for &'a SyncItemCollection {
    type Item = &'a SyncItem;
    type IntoIter = std::slice::Iter<'a, SyncItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl IntoIterator for SyncItemCollection {
    type Item = SyncItem;
    type IntoIter = std::vec::IntoIter<SyncItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection() -> SyncItemCollection {
        SyncItemCollection::from_values(vec![
            json!({"id": "1", "name": "A", "tags": ["x", "y"]}),
            json!({"id": "2", "name": "B", "meta": {"bookmark": "k2"}}),
            json!("scalar"),
        ])
    }

    #[test]
    fn items_are_stamped_with_their_key_in_order() {
        let items = collection();
        let keys: Vec<_> = items.iter().map(|i| i.key().unwrap().to_string()).collect();
        assert_eq!(keys, vec!["0", "1", "2"]);
        assert_eq!(items.first().unwrap().get_string("id").as_deref(), Some("1"));
        assert_eq!(items.last().unwrap().get_string("value").as_deref(), Some("scalar"));
    }

    #[test]
    fn nested_paths_read_and_write() {
        let mut item = SyncItem::from_value(json!({"a": {"b": 1}, "list": [{"c": "d"}]}));
        assert_eq!(item.get("a.b"), Some(&json!(1)));
        assert_eq!(item.get_string("list.0.c").as_deref(), Some("d"));
        item.set("a.new.deep", "v");
        assert_eq!(item.get_string("a.new.deep").as_deref(), Some("v"));
        item.set("a.b.c", 2);
        assert_eq!(item.get("a.b.c"), Some(&json!(2)));
        assert_eq!(item.unset("a.new"), Some(json!({"deep": "v"})));
        assert!(!item.has("a.new"));
        assert!(item.is_empty_at("missing"));
    }

    #[test]
    fn slice_and_remove_never_grow_beyond_original_count() {
        let mut items = collection();
        items.slice(1, 10);
        assert_eq!(items.count(), 2);
        assert_eq!(items.original_count(), 3);
        assert!(items.remove_item("1").is_some());
        assert_eq!(items.count(), 1);
        assert!(items.count() <= items.original_count());
        assert!(!items.set("9.name", "nope"));
    }

    #[test]
    fn collection_paths_address_items_by_key() {
        let mut items = collection();
        assert!(items.has("1.meta.bookmark"));
        assert_eq!(items.get("1.meta.bookmark"), Some(&json!("k2")));
        assert!(items.set("0.name", "Z"));
        assert_eq!(items.get("0.name"), Some(&json!("Z")));
        assert_eq!(items.unset("0.tags.1"), Some(json!("y")));
        assert_eq!(items.to_value()["0"]["tags"], json!(["x"]));
    }

    #[test]
    fn loose_emptiness_matches_source_conventions() {
        assert!(is_empty_value(&json!("0")));
        assert!(is_empty_value(&json!(0)));
        assert!(is_empty_value(&json!([])));
        assert!(!is_empty_value(&json!("a")));
    }
}
