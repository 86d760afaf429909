//! Router fixtures backed by a temporary data directory.

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tempfile::TempDir;

use helios_tenancy::backends::sqlite::{SqliteEngine, SqliteTenantDirectory};
use helios_tenancy::{TenancyConfig, TenantRouter};

use super::engine::FaultyEngine;

/// A router over a fresh data directory; the directory lives as long as this.
pub struct TestRouter {
    pub dir: TempDir,
    pub router: TenantRouter<FaultyEngine>,
}

impl TestRouter {
    pub fn engine(&self) -> &FaultyEngine {
        self.router.provisioner().engine()
    }

    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Returns `true` if the database file for `instance` exists.
    pub fn instance_file_exists(&self, instance: &str) -> bool {
        self.data_dir().join(format!("{}.db", instance)).exists()
    }

    /// Reads every `user_data.data` value straight from an instance file.
    pub fn user_data(&self, instance: &str) -> Vec<String> {
        let conn = Connection::open(self.data_dir().join(format!("{}.db", instance)))
            .expect("Failed to open tenant database");
        let mut stmt = conn
            .prepare("SELECT data FROM user_data ORDER BY id")
            .expect("Failed to prepare query");
        stmt.query_map([], |row| row.get(0))
            .expect("Failed to query user_data")
            .collect::<Result<Vec<String>, _>>()
            .expect("Failed to read user_data")
    }
}

/// Creates a router with the default configuration.
pub fn create_router() -> TestRouter {
    create_router_with(TenancyConfig::default())
}

/// Creates a router with the given configuration.
pub fn create_router_with(config: TenancyConfig) -> TestRouter {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let engine = SqliteEngine::open(dir.path()).expect("Failed to create SQLite engine");
    let directory = SqliteTenantDirectory::open(&engine, &config.control_plane_instance)
        .expect("Failed to open tenant directory");

    let router = TenantRouter::new(FaultyEngine::new(engine), Arc::new(directory), config)
        .expect("Failed to create router");

    TestRouter { dir, router }
}
