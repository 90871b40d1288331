//! Versioned schema of the `proxy_routes` table.
//!
//! Older deployments created the table once and then bolted columns on with
//! unconditional `ALTER TABLE` calls, so a legacy database may already carry
//! some of the columns a step adds. Add-column steps therefore check first.

pub const TABLE: &str = "proxy_routes";

/// Version after every step in [`MIGRATIONS`] has run.
pub const SCHEMA_VERSION: u32 = 5;

/// Columns every reader and writer relies on, in select order.
pub const COLUMNS: &[&str] = &[
    "id",
    "path",
    "target_url",
    "enabled",
    "cost_usdc",
    "auth_header",
    "is_test",
    "created_at",
    "updated_at",
];

#[derive(Debug, Clone, Copy)]
pub enum Step {
    Sql(&'static str),
    AddColumn {
        name: &'static str,
        definition: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub step: Step,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create proxy_routes",
        step: Step::Sql(
            r#"
            CREATE TABLE IF NOT EXISTS proxy_routes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT UNIQUE NOT NULL,
                target_url TEXT NOT NULL,
                enabled BOOLEAN DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        ),
    },
    Migration {
        version: 2,
        description: "add cost_usdc",
        step: Step::AddColumn {
            name: "cost_usdc",
            definition: "REAL DEFAULT 0",
        },
    },
    Migration {
        version: 3,
        description: "add auth_header",
        step: Step::AddColumn {
            name: "auth_header",
            definition: "TEXT",
        },
    },
    Migration {
        version: 4,
        description: "add is_test",
        step: Step::AddColumn {
            name: "is_test",
            definition: "BOOLEAN DEFAULT 1",
        },
    },
    Migration {
        version: 5,
        description: "index enabled routes by path",
        step: Step::Sql(
            "CREATE INDEX IF NOT EXISTS idx_proxy_routes_enabled_path ON proxy_routes(enabled, path)",
        ),
    },
];

/// Steps still to run for a database at `current`.
pub fn pending(current: u32) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS.iter().filter(move |m| m.version > current)
}

/// Comma-separated column list for SELECTs.
pub fn select_list() -> String {
    COLUMNS.join(", ")
}
