use anyhow::{bail, Result};
use rusqlite::{params, Connection};

/// Offset added to `PRAGMA user_version` so that a database created by some
/// other program is never mistaken for one of ours.
pub const BASE_DB_VERSION: usize = 77000;

#[macro_export]
macro_rules! sql_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // unused_mut fires when no optional field assignments are passed
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                is_unique: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Blob,
}

impl SqlType {
    fn ddl(self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }

    fn from_ddl(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(SqlType::Text),
            "INTEGER" => Some(SqlType::Integer),
            "REAL" => Some(SqlType::Real),
            "BLOB" => Some(SqlType::Blob),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeyOnChange {
    NoAction,
    Restrict,
    SetNull,
    SetDefault,
    Cascade,
}

impl ForeignKeyOnChange {
    fn ddl(self) -> &'static str {
        match self {
            ForeignKeyOnChange::NoAction => "NO ACTION",
            ForeignKeyOnChange::Restrict => "RESTRICT",
            ForeignKeyOnChange::SetNull => "SET NULL",
            ForeignKeyOnChange::SetDefault => "SET DEFAULT",
            ForeignKeyOnChange::Cascade => "CASCADE",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub is_unique: bool,
    pub default_value: Option<S>,
    pub foreign_key: Option<&'a ForeignKey>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let mut columns_ddl = Vec::with_capacity(self.columns.len());
        for column in self.columns {
            let mut ddl = format!("{} {}", column.name, column.sql_type.ddl());
            if column.is_primary_key {
                ddl.push_str(" PRIMARY KEY");
            }
            if column.non_null {
                ddl.push_str(" NOT NULL");
            }
            if column.is_unique {
                ddl.push_str(" UNIQUE");
            }
            if let Some(default_value) = column.default_value {
                ddl.push_str(&format!(" DEFAULT {}", default_value));
            }
            if let Some(fk) = column.foreign_key {
                ddl.push_str(&format!(
                    " REFERENCES {}({}) ON DELETE {}",
                    fk.foreign_table,
                    fk.foreign_column,
                    fk.on_delete.ddl()
                ));
            }
            columns_ddl.push(ddl);
        }
        for unique_constraint in self.unique_constraints {
            columns_ddl.push(format!("UNIQUE ({})", unique_constraint.join(", ")));
        }

        conn.execute(
            &format!("CREATE TABLE {} ({});", self.name, columns_ddl.join(", ")),
            params![],
        )?;

        for (index_name, column_names) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX {} ON {}({});",
                    index_name, self.name, column_names
                ),
                params![],
            )?;
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    /// Checks that the live database matches this schema revision, failing
    /// with a message naming the first mismatch found.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            validate_columns(conn, table)?;
            validate_indices(conn, table)?;
            validate_unique_constraints(conn, table)?;
            validate_foreign_keys(conn, table)?;
        }
        Ok(())
    }
}

struct LiveColumn {
    name: String,
    sql_type: Option<SqlType>,
    type_ddl: String,
    non_null: bool,
    default_value: Option<String>,
    is_primary_key: bool,
}

// PRAGMA table_info reports expression defaults wrapped in parentheses,
// so comparisons strip one outer pair.
fn strip_outer_parens(s: &str) -> &str {
    if s.starts_with('(') && s.ends_with(')') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn validate_columns(conn: &Connection, table: &Table) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", table.name))?;
    let live_columns = stmt
        .query_map(params![], |row| {
            let type_ddl: String = row.get(2)?;
            Ok(LiveColumn {
                name: row.get(1)?,
                sql_type: SqlType::from_ddl(&type_ddl),
                type_ddl,
                non_null: row.get::<_, i32>(3)? == 1,
                default_value: row.get(4)?,
                is_primary_key: row.get::<_, i32>(5)? == 1,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    if live_columns.len() != table.columns.len() {
        bail!(
            "Table {} has {} columns, expected {}. Found: [{}], expected: [{}]",
            table.name,
            live_columns.len(),
            table.columns.len(),
            live_columns
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            table
                .columns
                .iter()
                .map(|c| c.name)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    for (live, expected) in live_columns.iter().zip(table.columns.iter()) {
        if live.name != expected.name {
            bail!(
                "Table {} column name mismatch: expected {}, got {}",
                table.name,
                expected.name,
                live.name
            );
        }
        if live.sql_type != Some(expected.sql_type) {
            bail!(
                "Table {} column {} type mismatch: expected {:?}, got {}",
                table.name,
                expected.name,
                expected.sql_type,
                live.type_ddl
            );
        }
        if live.non_null != expected.non_null {
            bail!(
                "Table {} column {} non-null mismatch: expected {}, got {}",
                table.name,
                expected.name,
                expected.non_null,
                live.non_null
            );
        }
        let live_default = live.default_value.as_deref().map(strip_outer_parens);
        let expected_default = expected.default_value.map(strip_outer_parens);
        if live_default != expected_default {
            bail!(
                "Table {} column {} default mismatch: expected {:?}, got {:?}",
                table.name,
                expected.name,
                expected.default_value,
                live.default_value
            );
        }
        if live.is_primary_key != expected.is_primary_key {
            bail!(
                "Table {} column {} primary key mismatch: expected {}, got {}",
                table.name,
                expected.name,
                expected.is_primary_key,
                live.is_primary_key
            );
        }
    }
    Ok(())
}

fn validate_indices(conn: &Connection, table: &Table) -> Result<()> {
    for (index_name, _) in table.indices {
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                params![index_name, table.name],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if !exists {
            bail!("Table {} is missing index '{}'", table.name, index_name);
        }
    }
    Ok(())
}

fn validate_unique_constraints(conn: &Connection, table: &Table) -> Result<()> {
    if table.unique_constraints.is_empty() {
        return Ok(());
    }

    // SQLite surfaces table-level UNIQUE constraints as unique indices.
    let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", table.name))?;
    let unique_indices = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i32>(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .filter(|(_, is_unique)| *is_unique == 1)
        .map(|(name, _)| name)
        .collect::<Vec<_>>();

    let mut live_column_sets = Vec::with_capacity(unique_indices.len());
    for index_name in &unique_indices {
        let mut stmt = conn.prepare(&format!("PRAGMA index_info({})", index_name))?;
        let mut columns = stmt
            .query_map([], |row| row.get::<_, String>(2))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        columns.sort();
        live_column_sets.push(columns);
    }

    for expected_columns in table.unique_constraints {
        let mut expected_sorted: Vec<&str> = expected_columns.to_vec();
        expected_sorted.sort_unstable();
        let found = live_column_sets.iter().any(|live| {
            live.iter()
                .map(String::as_str)
                .eq(expected_sorted.iter().copied())
        });
        if !found {
            bail!(
                "Table {} is missing unique constraint on columns ({})",
                table.name,
                expected_columns.join(", ")
            );
        }
    }
    Ok(())
}

fn validate_foreign_keys(conn: &Connection, table: &Table) -> Result<()> {
    struct LiveFk {
        from_column: String,
        to_table: String,
        to_column: String,
        on_delete: String,
    }

    // PRAGMA foreign_key_list columns: id, seq, table, from, to, on_update, on_delete, match
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", table.name))?;
    let live_fks = stmt
        .query_map([], |row| {
            Ok(LiveFk {
                from_column: row.get(3)?,
                to_table: row.get(2)?,
                to_column: row.get(4)?,
                on_delete: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for column in table.columns {
        let Some(expected) = column.foreign_key else {
            continue;
        };
        let expected_on_delete = expected.on_delete.ddl();
        let found = live_fks.iter().any(|live| {
            live.from_column == column.name
                && live.to_table == expected.foreign_table
                && live.to_column == expected.foreign_column
                && live.on_delete == expected_on_delete
        });
        if found {
            continue;
        }

        if let Some(live) = live_fks.iter().find(|live| live.from_column == column.name) {
            bail!(
                "Table {} column {} foreign key mismatch: expected REFERENCES {}({}) ON DELETE {}, got REFERENCES {}({}) ON DELETE {}",
                table.name,
                column.name,
                expected.foreign_table,
                expected.foreign_column,
                expected_on_delete,
                live.to_table,
                live.to_column,
                live.on_delete
            );
        }
        bail!(
            "Table {} column {} is missing foreign key: expected REFERENCES {}({}) ON DELETE {}",
            table.name,
            column.name,
            expected.foreign_table,
            expected.foreign_column,
            expected_on_delete
        );
    }
    Ok(())
}
