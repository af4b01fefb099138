// src/datasource.rs
use std::collections::HashMap;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DataSourceDef;
use crate::error::EngineError;

/// Immutable mapping from registry key ("anasaDbDataSource") to a live
/// connection pool. Built once at startup from configuration and passed by
/// reference into the runner; adding or removing a datasource requires a
/// restart.
pub struct DataSourceRegistry {
    pools: HashMap<String, PgPool>,
}

impl DataSourceRegistry {
    /// Build the registry from datasource definitions. Pools connect lazily,
    /// so construction never touches the network.
    pub fn from_defs(defs: &[DataSourceDef]) -> anyhow::Result<Self> {
        let mut pools = HashMap::with_capacity(defs.len());
        for def in defs {
            let key = lookup_key(&def.name);
            let pool = PgPoolOptions::new()
                .max_connections(def.max_connections)
                .connect_lazy(&def.url)?;
            info!(name = %def.name, key = %key, "📦 Registered datasource");
            pools.insert(key, pool);
        }
        Ok(Self { pools })
    }

    /// Resolve a logical kebab-case name to its pool.
    ///
    /// The error carries the requested name, the derived key, and the known
    /// keys so a miss is diagnosable from the history record alone.
    pub fn resolve(&self, logical: &str) -> Result<&PgPool, EngineError> {
        let key = lookup_key(logical);
        self.pools.get(&key).ok_or_else(|| {
            let mut known: Vec<String> = self.pools.keys().cloned().collect();
            known.sort();
            EngineError::DataSourceNotFound {
                name: logical.to_string(),
                key,
                known,
            }
        })
    }

    /// Operator-facing logical names, kebab-case, sorted. This is the reverse
    /// of `lookup_key` and feeds the dashboard collaborator's form.
    pub fn datasource_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.keys().map(|k| logical_name(k)).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

/// "anasa-db" -> "anasaDbDataSource": uppercase the letter after each hyphen,
/// drop the hyphens, append the fixed suffix.
pub fn lookup_key(logical: &str) -> String {
    let mut out = String::with_capacity(logical.len() + 10);
    let mut upper_next = false;
    for c in logical.chars() {
        if c == '-' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out.push_str("DataSource");
    out
}

/// "anasaDbDataSource" -> "anasa-db": strip the suffix, hyphenate at
/// lower-to-upper boundaries, lowercase.
fn logical_name(key: &str) -> String {
    let stem = key.strip_suffix("DataSource").unwrap_or(key);
    let mut out = String::with_capacity(stem.len() + 4);
    let mut prev_lower = false;
    for c in stem.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push('-');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        out.extend(c.to_lowercase());
    }
    out
}
