mod common;

use std::io;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::{json, Value};

use common::{person, sync, Harness, Script};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn events(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

fn message_containing<'a>(events: &'a [Value], needle: &str) -> &'a Value {
    events
        .iter()
        .find(|e| {
            e["fields"]["message"]
                .as_str()
                .map_or(false, |m| m.contains(needle))
        })
        .unwrap_or_else(|| panic!("no log line containing {:?}", needle))
}

#[tokio::test]
async fn unclassified_item_errors_are_tagged_in_the_log() -> Result<()> {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::WARN)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let harness = Harness::new();
    let mut failing = person("a", "A");
    failing["fail"] = json!(true);
    let mut broken = person("b", "B");
    broken["broken"] = json!(true);
    let runner = harness.people(&Script::single(vec![failing, broken]), false);
    sync(&runner).await;

    let events = captured.events();
    let unclassified = message_containing(&events, "Process Item Error");
    assert_eq!(unclassified["level"], "ERROR");
    assert_eq!(unclassified["fields"]["unclassified"], json!(true));
    assert_eq!(unclassified["fields"]["resource"], "people");

    let classified = message_containing(&events, "Process Item Fail");
    assert_eq!(classified["level"], "ERROR");
    assert!(classified["fields"].get("unclassified").is_none());
    Ok(())
}
