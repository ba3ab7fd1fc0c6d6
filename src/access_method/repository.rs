// Access method storage

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::types::{AccessMethodConfiguration, PersistentAccessMethod};
use crate::error::RepositoryError;

/// Persistent store of access methods
#[async_trait]
pub trait AccessMethodRepository: Send + Sync {
    /// Insert or replace the method with the same id
    async fn save(&self, method: PersistentAccessMethod) -> Result<(), RepositoryError>;

    /// Remove a method; unknown and built-in ids are left alone
    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<PersistentAccessMethod>, RepositoryError>;

    /// Built-in methods first, then custom methods by name
    async fn all(&self) -> Result<Vec<PersistentAccessMethod>, RepositoryError>;
}

fn sort_methods(methods: &mut [PersistentAccessMethod]) {
    methods.sort_by(|a, b| {
        b.configuration
            .is_builtin()
            .cmp(&a.configuration.is_builtin())
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Repository kept in memory, mainly for tests and ephemeral sessions
pub struct InMemoryAccessMethodRepository {
    methods: Arc<DashMap<Uuid, PersistentAccessMethod>>,
}

impl InMemoryAccessMethodRepository {
    /// Create a repository holding the built-in methods
    pub fn new() -> Self {
        let methods = DashMap::new();
        for method in PersistentAccessMethod::defaults() {
            methods.insert(method.id, method);
        }
        Self {
            methods: Arc::new(methods),
        }
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Default for InMemoryAccessMethodRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryAccessMethodRepository {
    fn clone(&self) -> Self {
        Self {
            methods: Arc::clone(&self.methods),
        }
    }
}

#[async_trait]
impl AccessMethodRepository for InMemoryAccessMethodRepository {
    async fn save(&self, method: PersistentAccessMethod) -> Result<(), RepositoryError> {
        tracing::debug!(id = %method.id, name = %method.name, "Saving access method");
        self.methods.insert(method.id, method);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        if PersistentAccessMethod::is_builtin_id(&id) {
            tracing::debug!(id = %id, "Refusing to delete built-in access method");
            return Ok(());
        }
        if self.methods.remove(&id).is_some() {
            tracing::debug!(id = %id, "Deleted access method");
        }
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<PersistentAccessMethod>, RepositoryError> {
        Ok(self.methods.get(&id).map(|entry| entry.value().clone()))
    }

    async fn all(&self) -> Result<Vec<PersistentAccessMethod>, RepositoryError> {
        let mut methods: Vec<_> = self
            .methods
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sort_methods(&mut methods);
        Ok(methods)
    }
}

/// Repository backed by a SQLite database
///
/// All statements run on the blocking pool.
pub struct SqliteAccessMethodRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAccessMethodRepository {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// Database that lives only as long as the repository
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS access_methods (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                configuration TEXT NOT NULL
            );",
        )
        .context("Failed to create access_methods table")?;

        for method in PersistentAccessMethod::defaults() {
            let configuration = serde_json::to_string(&method.configuration)
                .context("Failed to serialize built-in access method")?;
            conn.execute(
                "INSERT OR IGNORE INTO access_methods (id, name, enabled, configuration)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    method.id.to_string(),
                    method.name,
                    method.is_enabled,
                    configuration
                ],
            )
            .context("Failed to seed built-in access methods")?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("SQLite connection mutex poisoned"))?;
            f(&guard)
        })
        .await
        .context("SQLite task failed")?
    }
}

fn row_to_method(
    id: String,
    name: String,
    enabled: bool,
    configuration: String,
) -> Result<PersistentAccessMethod, RepositoryError> {
    let id = Uuid::parse_str(&id).context("Stored access method id is not a UUID")?;
    let configuration: AccessMethodConfiguration = serde_json::from_str(&configuration)?;
    Ok(PersistentAccessMethod {
        id,
        name,
        is_enabled: enabled,
        configuration,
    })
}

#[async_trait]
impl AccessMethodRepository for SqliteAccessMethodRepository {
    async fn save(&self, method: PersistentAccessMethod) -> Result<(), RepositoryError> {
        tracing::debug!(id = %method.id, name = %method.name, "Saving access method to SQLite");
        let configuration = serde_json::to_string(&method.configuration)?;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO access_methods (id, name, enabled, configuration)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    enabled = excluded.enabled,
                    configuration = excluded.configuration",
                params![
                    method.id.to_string(),
                    method.name,
                    method.is_enabled,
                    configuration
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        if PersistentAccessMethod::is_builtin_id(&id) {
            tracing::debug!(id = %id, "Refusing to delete built-in access method");
            return Ok(());
        }

        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM access_methods WHERE id = ?1",
                params![id.to_string()],
            )?;
            if removed > 0 {
                tracing::debug!(id = %id, "Deleted access method from SQLite");
            }
            Ok(())
        })
        .await
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<PersistentAccessMethod>, RepositoryError> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, enabled, configuration FROM access_methods WHERE id = ?1",
                    params![id.to_string()],
                    |row| -> rusqlite::Result<(String, String, bool, String)> {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    },
                )
                .optional()?;

            row.map(|(id, name, enabled, configuration)| {
                row_to_method(id, name, enabled, configuration)
            })
            .transpose()
        })
        .await
    }

    async fn all(&self) -> Result<Vec<PersistentAccessMethod>, RepositoryError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, enabled, configuration FROM access_methods")?;
            let rows = stmt.query_map([], |row| -> rusqlite::Result<(String, String, bool, String)> {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;

            let mut methods = Vec::new();
            for row in rows {
                let (id, name, enabled, configuration) = row?;
                methods.push(row_to_method(id, name, enabled, configuration)?);
            }
            sort_methods(&mut methods);
            Ok(methods)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_method::types::{
        ProxyEndpoint, ProxyKind, BRIDGES_METHOD_ID, DIRECT_METHOD_ID,
    };

    fn socks_method(name: &str) -> PersistentAccessMethod {
        PersistentAccessMethod {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_enabled: true,
            configuration: AccessMethodConfiguration::Proxy(ProxyEndpoint {
                kind: ProxyKind::Socks5,
                host: "203.0.113.5".parse().unwrap(),
                port: 1080,
                credentials: None,
            }),
        }
    }

    #[tokio::test]
    async fn test_in_memory_upsert_and_delete() {
        let repo = InMemoryAccessMethodRepository::new();
        assert_eq!(repo.len(), 2);

        let mut method = socks_method("Office");
        repo.save(method.clone()).await.unwrap();
        method.name = "Office (renamed)".to_string();
        repo.save(method.clone()).await.unwrap();
        assert_eq!(repo.len(), 3);
        assert_eq!(repo.fetch(method.id).await.unwrap(), Some(method.clone()));

        repo.delete(method.id).await.unwrap();
        repo.delete(method.id).await.unwrap();
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_builtins_survive_delete() {
        let repo = InMemoryAccessMethodRepository::new();
        repo.delete(DIRECT_METHOD_ID).await.unwrap();
        repo.delete(BRIDGES_METHOD_ID).await.unwrap();
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_all_lists_builtins_first() {
        let repo = InMemoryAccessMethodRepository::new();
        repo.save(socks_method("Zeta")).await.unwrap();
        repo.save(socks_method("Alpha")).await.unwrap();

        let names: Vec<_> = repo
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["Direct", "Mullvad bridges", "Alpha", "Zeta"]);
    }

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let repo = SqliteAccessMethodRepository::open_in_memory().unwrap();
        assert_eq!(repo.all().await.unwrap().len(), 2);

        let mut method = socks_method("Office");
        repo.save(method.clone()).await.unwrap();
        assert_eq!(repo.fetch(method.id).await.unwrap(), Some(method.clone()));

        method.is_enabled = false;
        repo.save(method.clone()).await.unwrap();
        assert_eq!(repo.fetch(method.id).await.unwrap(), Some(method.clone()));
        assert_eq!(repo.all().await.unwrap().len(), 3);

        repo.delete(method.id).await.unwrap();
        assert_eq!(repo.fetch(method.id).await.unwrap(), None);
        repo.delete(DIRECT_METHOD_ID).await.unwrap();
        assert_eq!(repo.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_reopen_keeps_methods() {
        let dir = std::env::temp_dir().join(format!("api-access-test-{}", Uuid::new_v4()));
        let path = dir.join("methods.db");
        let method = socks_method("Persisted");

        {
            let repo = SqliteAccessMethodRepository::open(&path).unwrap();
            repo.save(method.clone()).await.unwrap();
        }

        let repo = SqliteAccessMethodRepository::open(&path).unwrap();
        assert_eq!(repo.fetch(method.id).await.unwrap(), Some(method));
        assert_eq!(repo.all().await.unwrap().len(), 3);

        let _ = std::fs::remove_dir_all(dir);
    }
}
