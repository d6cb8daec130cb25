use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::fetcher::entity::EntityFetcher;
use crate::fetcher::file::{FileFetcher, FileUploadFetcher};
use crate::fetcher::http::HttpFetcher;
use crate::fetcher::soap::SoapFetcher;
use crate::fetcher::sql::SqlFetcher;
use crate::fetcher::Fetcher;
use crate::parser::csv::CsvParser;
use crate::parser::file::FileParser;
use crate::parser::json::JsonParser;
use crate::parser::passthrough::{NoneParser, ObjectParser, StreamParser};
use crate::parser::xml::XmlParser;
use crate::parser::Parser;
use crate::resource::file::FileResource;
use crate::resource::mapped::MappedResource;
use crate::resource::{PluginConfig, Resource};
use crate::storage::EntityStore;

/// What plugin factories may depend on besides their own settings.
#[derive(Clone)]
pub struct PluginContext {
    /// Base for relative file and database paths.
    pub file_root: PathBuf,
    /// Where file parsers and file resources write.
    pub content_root: PathBuf,
    pub entities: Arc<dyn EntityStore>,
}

pub type FetcherFactory =
    Arc<dyn Fn(&Value, &PluginContext) -> Result<Box<dyn Fetcher>> + Send + Sync>;
pub type ParserFactory =
    Arc<dyn Fn(&Value, &PluginContext) -> Result<Box<dyn Parser>> + Send + Sync>;
pub type ResourceFactory =
    Arc<dyn Fn(&Value, &PluginContext) -> Result<Box<dyn Resource>> + Send + Sync>;

/// Deserializes plugin settings; a missing table yields the defaults.
pub fn settings<T: DeserializeOwned + Default>(value: &Value) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| SyncError::Config(format!("invalid plugin settings: {}", e)))
}

/// Maps plugin ids to factories for fetchers, parsers and resources.
#[derive(Default, Clone)]
pub struct Registry {
    fetchers: HashMap<String, FetcherFactory>,
    parsers: HashMap<String, ParserFactory>,
    resources: HashMap<String, ResourceFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in plugin.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register_fetcher("http", |s, _| Ok(Box::new(HttpFetcher::new(settings(s)?)?)));
        registry.register_fetcher("sql", |s, ctx| {
            Ok(Box::new(SqlFetcher::new(settings(s)?, ctx.file_root.clone())?))
        });
        registry.register_fetcher("soap", |s, _| Ok(Box::new(SoapFetcher::new(settings(s)?)?)));
        registry.register_fetcher("file", |s, ctx| {
            Ok(Box::new(FileFetcher::new(settings(s)?, ctx.file_root.clone())?))
        });
        registry.register_fetcher("file_upload", |s, ctx| {
            Ok(Box::new(FileUploadFetcher::new(settings(s)?, ctx.file_root.clone())))
        });
        registry.register_fetcher("entity", |s, ctx| {
            Ok(Box::new(EntityFetcher::new(settings(s)?, ctx.entities.clone())?))
        });

        registry.register_parser("csv", |s, _| Ok(Box::new(CsvParser::new(settings(s)?)?)));
        registry.register_parser("json", |s, _| Ok(Box::new(JsonParser::new(settings(s)?))));
        registry.register_parser("xml", |s, _| Ok(Box::new(XmlParser::new(settings(s)?))));
        registry.register_parser("rss", |s, _| Ok(Box::new(XmlParser::rss(settings(s)?))));
        registry.register_parser("none", |_, _| Ok(Box::new(NoneParser)));
        registry.register_parser("object", |_, _| Ok(Box::new(ObjectParser)));
        registry.register_parser("stream", |_, _| Ok(Box::new(StreamParser)));
        registry.register_parser("file", |s, ctx| {
            Ok(Box::new(FileParser::new(settings(s)?, ctx.content_root.clone())))
        });
        registry.register_parser("json_file", |s, ctx| {
            Ok(Box::new(FileParser::json(settings(s)?, ctx.content_root.clone())))
        });

        registry.register_resource("mapped", |s, _| Ok(Box::new(MappedResource::new(settings(s)?))));
        registry.register_resource("file", |s, ctx| {
            Ok(Box::new(FileResource::new(settings(s)?, &ctx.content_root)))
        });

        registry
    }

    pub fn register_fetcher<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&Value, &PluginContext) -> Result<Box<dyn Fetcher>> + Send + Sync + 'static,
    {
        self.fetchers.insert(id.to_string(), Arc::new(factory));
    }

    pub fn register_parser<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&Value, &PluginContext) -> Result<Box<dyn Parser>> + Send + Sync + 'static,
    {
        self.parsers.insert(id.to_string(), Arc::new(factory));
    }

    pub fn register_resource<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&Value, &PluginContext) -> Result<Box<dyn Resource>> + Send + Sync + 'static,
    {
        self.resources.insert(id.to_string(), Arc::new(factory));
    }

    pub fn fetcher(&self, config: &PluginConfig, ctx: &PluginContext) -> Result<Box<dyn Fetcher>> {
        let factory = self.fetchers.get(&config.plugin).ok_or_else(|| SyncError::Plugin {
            kind: "fetcher",
            id: config.plugin.clone(),
        })?;
        factory(&config.settings, ctx)
    }

    pub fn parser(&self, config: &PluginConfig, ctx: &PluginContext) -> Result<Box<dyn Parser>> {
        let factory = self.parsers.get(&config.plugin).ok_or_else(|| SyncError::Plugin {
            kind: "parser",
            id: config.plugin.clone(),
        })?;
        factory(&config.settings, ctx)
    }

    pub fn resource(
        &self,
        config: &PluginConfig,
        ctx: &PluginContext,
    ) -> Result<Box<dyn Resource>> {
        let factory = self.resources.get(&config.plugin).ok_or_else(|| SyncError::Plugin {
            kind: "resource",
            id: config.plugin.clone(),
        })?;
        factory(&config.settings, ctx)
    }

    /// Registered ids per kind, sorted.
    pub fn list(&self) -> (Vec<&str>, Vec<&str>, Vec<&str>) {
        fn keys<V>(map: &HashMap<String, V>) -> Vec<&str> {
            let mut ids: Vec<&str> = map.keys().map(String::as_str).collect();
            ids.sort_unstable();
            ids
        }
        (keys(&self.fetchers), keys(&self.parsers), keys(&self.resources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, SqliteEntityStore};
    use serde_json::json;

    fn context() -> PluginContext {
        PluginContext {
            file_root: PathBuf::from("."),
            content_root: PathBuf::from("data/files"),
            entities: Arc::new(SqliteEntityStore::new(Database::open_in_memory().unwrap())),
        }
    }

    #[test]
    fn defaults_cover_every_builtin() {
        let registry = Registry::with_defaults();
        let (fetchers, parsers, resources) = registry.list();
        assert_eq!(fetchers, vec!["entity", "file", "file_upload", "http", "soap", "sql"]);
        assert_eq!(
            parsers,
            vec!["csv", "file", "json", "json_file", "none", "object", "rss", "stream", "xml"]
        );
        assert_eq!(resources, vec!["file", "mapped"]);
    }

    #[test]
    fn unknown_plugins_are_reported_by_kind() {
        let registry = Registry::with_defaults();
        let err = registry
            .parser(&PluginConfig::new("yaml", Value::Null), &context())
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Plugin { kind: "parser", .. }));
    }

    #[test]
    fn settings_are_validated_by_the_factory() {
        let registry = Registry::with_defaults();
        let ctx = context();
        assert!(registry
            .parser(&PluginConfig::new("csv", json!({"delimiter": ";"})), &ctx)
            .is_ok());
        assert!(registry
            .parser(&PluginConfig::new("csv", json!({"delimiter": "ab"})), &ctx)
            .is_err());
        assert!(registry
            .fetcher(&PluginConfig::new("http", json!({"query": "nope"})), &ctx)
            .is_err());
    }
}
