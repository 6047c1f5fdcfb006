use modcore::prelude::*;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory table store standing in for a real connection pool.
#[derive(Default)]
pub struct Database {
    // Key: format!("{}:{}", table, id)
    storage: Mutex<HashMap<String, String>>,
}

impl Database {
    pub fn insert(&self, table: &str, id: &str, data: String) {
        let mut storage = self.storage.lock().unwrap();
        storage.insert(format!("{}:{}", table, id), data);
    }

    pub fn get(&self, table: &str, id: &str) -> Option<String> {
        let storage = self.storage.lock().unwrap();
        storage.get(&format!("{}:{}", table, id)).cloned()
    }

    pub fn scan(&self, table: &str) -> Vec<String> {
        let storage = self.storage.lock().unwrap();
        let prefix = format!("{}:", table);
        storage
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.storage.lock().unwrap().len()
    }
}

/// Installs the shared `db` core property.
pub async fn database(setup: SetupHandle) -> anyhow::Result<()> {
    tracing::info!("📦 Database: Initializing connection pool...");
    // Simulate connection delay
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let db = setup.define_core_property("db", PropertyDescriptor::value(Database::default()))?;
    tracing::info!("✅ Database: Connected");

    let app = setup.app().clone();
    setup.destroy(move || async move {
        let rows = db.get(&app).map(|db| db.len()).unwrap_or_default();
        tracing::info!(rows, "🔌 Database: Closing connections...");
        anyhow::Ok(())
    });
    Ok(())
}
