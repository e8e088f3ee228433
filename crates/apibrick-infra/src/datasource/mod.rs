//! Backend data-source implementations.
//!
//! | type      | implementation          | driver          |
//! |-----------|-------------------------|-----------------|
//! | `MYSQL`   | [`mysql::MySqlDataSource`]   | `sqlx` (mysql)  |
//! | `SQLITE`  | [`sqlite::SqliteDataSource`] | `sqlx` (sqlite) |
//! | `MONGODB` | [`mongo::MongoDataSource`]   | `mongodb`       |

pub mod mongo;
pub mod mysql;
pub mod sql;
pub mod sqlite;

use std::time::Duration;

use apibrick_core::datasource::manager::DataSourceManager;
use apibrick_core::datasource::source::InitFactory;

/// A manager with a factory registered for every built-in backend.
pub fn default_manager(probe_timeout: Duration) -> DataSourceManager {
    DataSourceManager::new()
        .with_factory(InitFactory::<mysql::MySqlDataSource>::new())
        .with_factory(InitFactory::<sqlite::SqliteDataSource>::new())
        .with_factory(InitFactory::<mongo::MongoDataSource>::new())
        .with_probe_timeout(probe_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apibrick_types::ValueMap;
    use apibrick_types::datasource::DataSourceType;
    use serde_json::json;

    #[test]
    fn all_backends_registered() {
        let manager = default_manager(Duration::from_secs(1));
        let mut types = manager.supported_types();
        types.sort_by_key(|t| t.as_str());
        assert_eq!(
            types,
            vec![DataSourceType::Mongodb, DataSourceType::Mysql, DataSourceType::Sqlite]
        );
    }

    #[tokio::test]
    async fn sqlite_end_to_end_through_manager() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        let seed = sqlx::SqlitePool::connect(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .unwrap();
        sqlx::query("CREATE TABLE kv (k TEXT, v INTEGER)").execute(&seed).await.unwrap();
        sqlx::query("INSERT INTO kv VALUES ('a', 1)").execute(&seed).await.unwrap();
        seed.close().await;

        let manager = default_manager(Duration::from_secs(2));
        let config: ValueMap = json!({"path": path.display().to_string()})
            .as_object()
            .cloned()
            .unwrap();

        assert!(manager.test_connection(DataSourceType::Sqlite, &config, "acme", "DEV").await);
        assert!(manager.is_empty());

        let source = manager
            .get_or_create("kv", DataSourceType::Sqlite, &config, "acme", "DEV")
            .await
            .unwrap();
        let query: ValueMap = json!({"sql": "SELECT k, v FROM kv"}).as_object().cloned().unwrap();
        assert_eq!(source.execute_query(&query).await.unwrap(), json!({"k": "a", "v": 1}));

        manager.close_all().await;
        assert!(manager.is_empty());
    }
}
