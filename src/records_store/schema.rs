//! SQLite schema revisions for the records database.
//!
//! Each revision lists the full expected table set at that version plus the
//! migration from the previous one. The attachment table changes shape in V4:
//! per-parent foreign key columns give way to a polymorphic
//! `parent_kind`/`parent_id` reference.

use crate::sql_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};
use rusqlite::params;

const ACCOUNT_FK: ForeignKey = ForeignKey {
    foreign_table: "accounts",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const CONTACT_FK: ForeignKey = ForeignKey {
    foreign_table: "contacts",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const WORK_ORDER_FK: ForeignKey = ForeignKey {
    foreign_table: "work_orders",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

// =============================================================================
// Version 1 - Accounts and contacts
// =============================================================================

const ACCOUNTS_TABLE_V1: Table = Table {
    name: "accounts",
    columns: &[
        sql_column!("id", SqlType::Text, is_primary_key = true), // UUID
        sql_column!("date_entered", SqlType::Text, non_null = true), // RFC 3339
        sql_column!("name", SqlType::Text, non_null = true),
        sql_column!("account_type", SqlType::Text),
        sql_column!("billing_address_city", SqlType::Text),
        sql_column!("phone_office", SqlType::Text),
        sql_column!("ruc_code", SqlType::Text, non_null = true, is_unique = true),
        sql_column!("shipping_address_street", SqlType::Text),
        sql_column!(
            "deleted",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[("idx_accounts_ruc_code", "ruc_code")],
    unique_constraints: &[],
};

const CONTACTS_TABLE_V1: Table = Table {
    name: "contacts",
    columns: &[
        sql_column!("id", SqlType::Text, is_primary_key = true), // UUID
        sql_column!(
            "account_id",
            SqlType::Text,
            non_null = true,
            foreign_key = Some(&ACCOUNT_FK)
        ),
        sql_column!("date_entered", SqlType::Text, non_null = true),
        sql_column!("first_name", SqlType::Text, non_null = true),
        sql_column!("last_name", SqlType::Text, non_null = true),
        sql_column!("title", SqlType::Text),
        sql_column!("department", SqlType::Text),
        sql_column!("birthdate", SqlType::Text), // YYYY-MM-DD
        sql_column!("phone_mobile", SqlType::Text),
        sql_column!("phone_work", SqlType::Text),
        sql_column!("email", SqlType::Text, non_null = true),
        sql_column!("primary_address_street", SqlType::Text),
        sql_column!(
            "deleted",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[("idx_contacts_account_id", "account_id")],
    unique_constraints: &[],
};

// =============================================================================
// Version 2 - Work orders and the ODT counter
// =============================================================================

const WORK_ORDERS_TABLE_V2: Table = Table {
    name: "work_orders",
    columns: &[
        sql_column!("id", SqlType::Text, is_primary_key = true), // UUID
        sql_column!("number", SqlType::Integer, non_null = true, is_unique = true),
        sql_column!(
            "account_id",
            SqlType::Text,
            non_null = true,
            foreign_key = Some(&ACCOUNT_FK)
        ),
        sql_column!(
            "contact_id",
            SqlType::Text,
            non_null = true,
            foreign_key = Some(&CONTACT_FK)
        ),
        sql_column!("description", SqlType::Text),
        sql_column!("total_cents", SqlType::Integer, non_null = true),
        sql_column!("status", SqlType::Text, non_null = true),
        sql_column!("date_entered", SqlType::Text, non_null = true),
        sql_column!(
            "deleted",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[
        ("idx_work_orders_account_id", "account_id"),
        ("idx_work_orders_contact_id", "contact_id"),
    ],
    unique_constraints: &[],
};

/// Single-row table holding the last issued ODT number. The row with id 0 is
/// seeded by the V2 migration and is the only row that ever exists.
const ODT_COUNTER_TABLE_V2: Table = Table {
    name: "odt_counter",
    columns: &[
        sql_column!("id", SqlType::Integer, is_primary_key = true),
        sql_column!("last_number", SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    WORK_ORDERS_TABLE_V2.create(conn)?;
    ODT_COUNTER_TABLE_V2.create(conn)?;
    conn.execute(
        "INSERT INTO odt_counter (id, last_number) VALUES (0, 0)",
        [],
    )?;
    Ok(())
}

// =============================================================================
// Version 3 - File attachments, one nullable FK column per parent table
// =============================================================================

const FILE_ATTACHMENTS_TABLE_V3: Table = Table {
    name: "file_attachments",
    columns: &[
        sql_column!("id", SqlType::Integer, is_primary_key = true),
        sql_column!(
            "account_id",
            SqlType::Text,
            foreign_key = Some(&ACCOUNT_FK)
        ),
        sql_column!(
            "contact_id",
            SqlType::Text,
            foreign_key = Some(&CONTACT_FK)
        ),
        sql_column!(
            "work_order_id",
            SqlType::Text,
            foreign_key = Some(&WORK_ORDER_FK)
        ),
        sql_column!("category", SqlType::Text, non_null = true),
        sql_column!("file_name", SqlType::Text, non_null = true),
        sql_column!("date_entered", SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

fn migrate_v2_to_v3(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    FILE_ATTACHMENTS_TABLE_V3.create(conn)?;
    Ok(())
}

// =============================================================================
// Version 4 - File attachments reworked to a polymorphic parent reference
// =============================================================================

const FILE_ATTACHMENTS_TABLE_V4: Table = Table {
    name: "file_attachments",
    columns: &[
        sql_column!("id", SqlType::Integer, is_primary_key = true),
        sql_column!("parent_kind", SqlType::Text, non_null = true),
        sql_column!("parent_id", SqlType::Text, non_null = true),
        sql_column!("category", SqlType::Text, non_null = true),
        sql_column!("file_name", SqlType::Text, non_null = true),
        sql_column!("date_entered", SqlType::Text, non_null = true),
    ],
    indices: &[("idx_file_attachments_parent", "parent_kind, parent_id")],
    unique_constraints: &[],
};

fn migrate_v3_to_v4(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute(
        "ALTER TABLE file_attachments RENAME TO file_attachments_backup;",
        [],
    )?;
    FILE_ATTACHMENTS_TABLE_V4.create(conn)?;

    // Each backup row has exactly one of the three parent columns set; that
    // column becomes the polymorphic (parent_kind, parent_id) pair.
    let mut stmt = conn.prepare(
        "SELECT id, account_id, contact_id, work_order_id, category, file_name, date_entered
         FROM file_attachments_backup;",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;

    for row in rows {
        let (id, account_id, contact_id, work_order_id, category, file_name, date_entered) = row?;
        let (parent_kind, parent_id) = if let Some(account_id) = account_id {
            ("account", account_id)
        } else if let Some(contact_id) = contact_id {
            ("contact", contact_id)
        } else if let Some(work_order_id) = work_order_id {
            ("work_order", work_order_id)
        } else {
            // Orphan rows cannot be expressed in the new shape; drop them.
            continue;
        };
        conn.execute(
            "INSERT INTO file_attachments (id, parent_kind, parent_id, category, file_name, date_entered)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, parent_kind, parent_id, category, file_name, date_entered],
        )?;
    }
    drop(stmt);

    conn.execute("DROP TABLE file_attachments_backup;", [])?;
    Ok(())
}

// =============================================================================
// Versioned schema definition
// =============================================================================

/// All schema revisions of the records database.
///
/// Version 1: accounts and contacts
/// Version 2: work orders and the ODT counter
/// Version 3: file attachments, one FK column per possible parent
/// Version 4: file attachments reworked to parent_kind/parent_id
pub const RECORDS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[ACCOUNTS_TABLE_V1, CONTACTS_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            ACCOUNTS_TABLE_V1,
            CONTACTS_TABLE_V1,
            WORK_ORDERS_TABLE_V2,
            ODT_COUNTER_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
    VersionedSchema {
        version: 3,
        tables: &[
            ACCOUNTS_TABLE_V1,
            CONTACTS_TABLE_V1,
            WORK_ORDERS_TABLE_V2,
            ODT_COUNTER_TABLE_V2,
            FILE_ATTACHMENTS_TABLE_V3,
        ],
        migration: Some(migrate_v2_to_v3),
    },
    VersionedSchema {
        version: 4,
        tables: &[
            ACCOUNTS_TABLE_V1,
            CONTACTS_TABLE_V1,
            WORK_ORDERS_TABLE_V2,
            ODT_COUNTER_TABLE_V2,
            FILE_ATTACHMENTS_TABLE_V4,
        ],
        migration: Some(migrate_v3_to_v4),
    },
];
