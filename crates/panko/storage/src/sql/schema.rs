use super::dialect::Dialect;
use crate::model::TraitType;

/// Per-dtype trait tables, in the order reads visit them.
pub const TRAIT_TABLES: [(&str, TraitType); 4] = [
    ("trait_text", TraitType::Text),
    ("trait_int", TraitType::Int),
    ("trait_float", TraitType::Float),
    ("trait_datetime", TraitType::Datetime),
];

/// Table holding traits of `dtype`. Untyped traits live in `trait_text` with a
/// NULL value.
pub fn trait_table(dtype: TraitType) -> &'static str {
    match dtype {
        TraitType::None | TraitType::Text => "trait_text",
        TraitType::Int => "trait_int",
        TraitType::Float => "trait_float",
        TraitType::Datetime => "trait_datetime",
    }
}

fn value_column(dialect: Dialect, dtype: TraitType) -> &'static str {
    match (dialect, dtype) {
        (_, TraitType::None | TraitType::Text) => "VARCHAR(255)",
        (_, TraitType::Int | TraitType::Datetime) => "BIGINT",
        (Dialect::Postgres, TraitType::Float) => "DOUBLE PRECISION",
        (Dialect::Mysql, TraitType::Float) => "DOUBLE",
        (Dialect::Sqlite, TraitType::Float) => "REAL",
    }
}

/// Idempotent DDL bringing the schema up to date.
pub fn ddl(dialect: Dialect) -> Vec<String> {
    match dialect {
        Dialect::Mysql => mysql_ddl(),
        Dialect::Postgres | Dialect::Sqlite => portable_ddl(dialect),
    }
}

fn portable_ddl(dialect: Dialect) -> Vec<String> {
    let pk = match dialect {
        Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
        _ => "INTEGER PRIMARY KEY AUTOINCREMENT",
    };
    let mut stmts = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS event_type (
                id {pk},
                name VARCHAR(255) NOT NULL UNIQUE
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS event (
                id {pk},
                message_id VARCHAR(255) NOT NULL UNIQUE,
                generated BIGINT NOT NULL,
                event_type_id BIGINT NOT NULL REFERENCES event_type (id),
                raw TEXT
            )"
        ),
        "CREATE INDEX IF NOT EXISTS ix_event_generated ON event (generated)".to_string(),
        "CREATE INDEX IF NOT EXISTS ix_event_type_id ON event (event_type_id)".to_string(),
    ];
    for (table, dtype) in TRAIT_TABLES {
        stmts.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                event_id BIGINT NOT NULL REFERENCES event (id),
                name VARCHAR(255) NOT NULL,
                value {}
            )",
            value_column(dialect, dtype)
        ));
        stmts.push(format!(
            "CREATE INDEX IF NOT EXISTS ix_{table}_event_id_name ON {table} (event_id, name)"
        ));
        stmts.push(format!(
            "CREATE INDEX IF NOT EXISTS ix_{table}_name_value ON {table} (name, value)"
        ));
    }
    stmts
}

// MySQL has no CREATE INDEX IF NOT EXISTS, so indexes are declared inline.
fn mysql_ddl() -> Vec<String> {
    let mut stmts = vec![
        "CREATE TABLE IF NOT EXISTS event_type (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
            .to_string(),
        "CREATE TABLE IF NOT EXISTS event (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            message_id VARCHAR(255) NOT NULL UNIQUE,
            generated BIGINT NOT NULL,
            event_type_id BIGINT NOT NULL,
            raw TEXT,
            INDEX ix_event_generated (generated),
            INDEX ix_event_type_id (event_type_id),
            FOREIGN KEY (event_type_id) REFERENCES event_type (id)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
            .to_string(),
    ];
    for (table, dtype) in TRAIT_TABLES {
        stmts.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                event_id BIGINT NOT NULL,
                name VARCHAR(255) NOT NULL,
                value {},
                INDEX ix_{table}_event_id_name (event_id, name),
                INDEX ix_{table}_name_value (name, value),
                FOREIGN KEY (event_id) REFERENCES event (id)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            value_column(Dialect::Mysql, dtype)
        ));
    }
    stmts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_dialect_creates_all_tables() {
        for dialect in [Dialect::Postgres, Dialect::Mysql, Dialect::Sqlite] {
            let ddl = ddl(dialect).join("\n");
            for table in ["event_type", "event (", "trait_text", "trait_int", "trait_float", "trait_datetime"] {
                assert!(ddl.contains(table), "{dialect:?} is missing {table}");
            }
        }
        assert!(ddl(Dialect::Sqlite).join("").contains("AUTOINCREMENT"));
        assert!(!ddl(Dialect::Mysql).join("").contains("IF NOT EXISTS ix_"));
    }

    #[test]
    fn untyped_traits_share_the_text_table() {
        assert_eq!(trait_table(TraitType::None), "trait_text");
        assert_eq!(trait_table(TraitType::Datetime), "trait_datetime");
    }
}
