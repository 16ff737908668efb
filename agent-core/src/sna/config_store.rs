//! The Config Store (C6): a small key/value layer with pluggable persistence,
//! split into a `ConfigurationManager` (typed accessors) and a
//! `ConfigurationPersistence` strategy. Two strategies are provided: a
//! warehouse-table-backed one used in production, and an
//! environment-variable-backed one used for local development, selected by
//! `USE_DB_PERSISTENCE`.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::db::WarehouseConnection;
use crate::error::{AgentError, AgentErrorKind, AgentResult};

const QUERY_LOAD_CONFIG: &str = "SELECT key, value FROM {table}";
const QUERY_UPDATE_CONFIG: &str = "MERGE INTO {table} t USING (SELECT ? AS key, ? AS value) s \
    ON t.key = s.key WHEN MATCHED THEN UPDATE SET t.value = s.value \
    WHEN NOT MATCHED THEN INSERT (key, value) VALUES (s.key, s.value)";

const ENV_PREFIX: &str = "SNA";

/// Persistence strategy for the Config Store's key/value pairs.
pub trait ConfigurationPersistence: Send + Sync {
    fn get_value(&self, key: &str) -> AgentResult<Option<String>>;
    fn set_value(&self, key: &str, value: &str) -> AgentResult<()>;
    fn get_all_values(&self) -> AgentResult<HashMap<String, String>>;
}

/// Reads configuration from environment variables prefixed `SNA_`, e.g.
/// `SNA_USE_CONNECTION_POOL=true`. Writes are rejected: there's nowhere
/// durable to persist them outside a warehouse.
pub struct EnvConfig;

impl ConfigurationPersistence for EnvConfig {
    fn get_value(&self, key: &str) -> AgentResult<Option<String>> {
        Ok(std::env::var(format!("{}_{}", ENV_PREFIX, key)).ok())
    }

    fn set_value(&self, _key: &str, _value: &str) -> AgentResult<()> {
        Err(AgentErrorKind::Config(
            "cannot update config settings outside a warehouse container, set env vars instead"
                .to_owned(),
        )
        .into())
    }

    fn get_all_values(&self) -> AgentResult<HashMap<String, String>> {
        let prefix = format!("{}_", ENV_PREFIX);
        Ok(std::env::vars()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k[prefix.len()..].to_owned(), v))
            .collect())
    }
}

/// Reads/writes configuration from a warehouse table, MERGE-ing updates in
/// and caching the full set in memory between writes.
pub struct WarehouseConfig {
    pool: r2d2::Pool<crate::db::WarehouseConnectionManager>,
    table_name: String,
    cache: RwLock<HashMap<String, String>>,
}

impl WarehouseConfig {
    pub fn new(
        pool: r2d2::Pool<crate::db::WarehouseConnectionManager>,
        table_name: String,
    ) -> AgentResult<Self> {
        let store = Self {
            pool,
            table_name,
            cache: RwLock::new(HashMap::new()),
        };
        store.reload()?;
        Ok(store)
    }

    fn reload(&self) -> AgentResult<()> {
        let mut conn = self.pool.get()?;
        let query = QUERY_LOAD_CONFIG.replace("{table}", &self.table_name);
        let rows = conn.query_rows(&query, &[])?;
        let values = rows
            .into_iter()
            .filter_map(|row| match row.as_slice() {
                [key, value] => Some((key.clone(), value.clone())),
                _ => None,
            })
            .collect();
        *self.cache.write().expect("config cache lock poisoned") = values;
        Ok(())
    }
}

impl ConfigurationPersistence for WarehouseConfig {
    fn get_value(&self, key: &str) -> AgentResult<Option<String>> {
        Ok(self
            .cache
            .read()
            .expect("config cache lock poisoned")
            .get(key)
            .cloned())
    }

    fn set_value(&self, key: &str, value: &str) -> AgentResult<()> {
        let mut conn = self.pool.get()?;
        let query = QUERY_UPDATE_CONFIG.replace("{table}", &self.table_name);
        conn.execute(&query, &[key, value])?;
        self.reload()
    }

    fn get_all_values(&self) -> AgentResult<HashMap<String, String>> {
        Ok(self.cache.read().expect("config cache lock poisoned").clone())
    }
}

/// Typed accessors over a `ConfigurationPersistence` strategy, mirroring
/// `ConfigurationManager`'s `get_str_value`/`get_int_value`/`get_bool_value`.
pub struct ConfigurationManager {
    persistence: Box<dyn ConfigurationPersistence>,
}

impl ConfigurationManager {
    pub fn new(persistence: Box<dyn ConfigurationPersistence>) -> Self {
        Self { persistence }
    }

    pub fn get_str_value(&self, key: &str, default_value: &str) -> String {
        self.persistence
            .get_value(key)
            .ok()
            .flatten()
            .unwrap_or_else(|| default_value.to_owned())
    }

    pub fn get_optional_str_value(&self, key: &str) -> Option<String> {
        self.persistence.get_value(key).ok().flatten()
    }

    pub fn get_int_value(&self, key: &str, default_value: i64) -> i64 {
        self.persistence
            .get_value(key)
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_value)
    }

    pub fn get_bool_value(&self, key: &str, default_value: bool) -> bool {
        self.persistence
            .get_value(key)
            .ok()
            .flatten()
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(default_value)
    }

    pub fn set_values(&self, values: &HashMap<String, String>) -> AgentResult<()> {
        for (key, value) in values {
            self.persistence.set_value(key, value)?;
        }
        Ok(())
    }

    pub fn get_all_values(&self) -> AgentResult<HashMap<String, String>> {
        self.persistence.get_all_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryPersistence {
        values: Mutex<HashMap<String, String>>,
    }

    impl ConfigurationPersistence for InMemoryPersistence {
        fn get_value(&self, key: &str) -> AgentResult<Option<String>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }
        fn set_value(&self, key: &str, value: &str) -> AgentResult<()> {
            self.values.lock().unwrap().insert(key.to_owned(), value.to_owned());
            Ok(())
        }
        fn get_all_values(&self) -> AgentResult<HashMap<String, String>> {
            Ok(self.values.lock().unwrap().clone())
        }
    }

    fn manager_with(values: &[(&str, &str)]) -> ConfigurationManager {
        let persistence = InMemoryPersistence::default();
        for (k, v) in values {
            persistence.values.lock().unwrap().insert((*k).to_owned(), (*v).to_owned());
        }
        ConfigurationManager::new(Box::new(persistence))
    }

    #[test]
    fn missing_key_falls_back_to_default() {
        let manager = manager_with(&[]);
        assert_eq!(manager.get_str_value("MISSING", "fallback"), "fallback");
        assert_eq!(manager.get_int_value("MISSING", 7), 7);
        assert!(!manager.get_bool_value("MISSING", false));
        assert_eq!(manager.get_optional_str_value("MISSING"), None);
    }

    #[test]
    fn bool_parsing_is_case_insensitive() {
        let manager = manager_with(&[("A", "TRUE"), ("B", "false"), ("C", "tRuE")]);
        assert!(manager.get_bool_value("A", false));
        assert!(!manager.get_bool_value("B", true));
        assert!(manager.get_bool_value("C", false));
    }

    #[test]
    fn env_config_reads_prefixed_variables() {
        temp_env::with_var("SNA_UNIT_TEST_KEY", Some("value"), || {
            let config = EnvConfig;
            assert_eq!(config.get_value("UNIT_TEST_KEY").unwrap(), Some("value".to_owned()));
        });
    }

    #[test]
    fn env_config_rejects_writes() {
        let config = EnvConfig;
        assert!(config.set_value("UNIT_TEST_KEY", "x").is_err());
    }

    #[test]
    fn set_values_writes_through_persistence() {
        let manager = manager_with(&[]);
        let mut updates = HashMap::new();
        updates.insert("NEW_KEY".to_owned(), "42".to_owned());
        manager.set_values(&updates).unwrap();
        assert_eq!(manager.get_optional_str_value("NEW_KEY"), Some("42".to_owned()));
    }
}
