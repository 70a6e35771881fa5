use super::models::{
    Account, AttachmentCategory, Contact, FileAttachment, NewAccount, NewContact, NewWorkOrder,
    ParentKind, RecordCounts, WorkOrder, WorkOrderStatus,
};
use super::schema::RECORDS_VERSIONED_SCHEMAS;
use super::RecordsStore;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct SqliteRecordsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordsStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open records database")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        if is_new_db {
            info!("Creating new records database at {:?}", path);
            RECORDS_VERSIONED_SCHEMAS.last().unwrap().create(&conn)?;
            // The counter row otherwise only comes from the V2 migration.
            conn.execute(
                "INSERT INTO odt_counter (id, last_number) VALUES (0, 0)",
                [],
            )?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;

            if db_version < 1 {
                bail!(
                    "Records database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let version_index = RECORDS_VERSIONED_SCHEMAS
                .iter()
                .position(|s| s.version == db_version as usize)
                .with_context(|| format!("Unknown records database version {}", db_version))?;
            RECORDS_VERSIONED_SCHEMAS[version_index]
                .validate(&conn)
                .with_context(|| {
                    format!(
                        "Records database schema validation failed for version {}",
                        db_version
                    )
                })?;

            let current_schema_version = RECORDS_VERSIONED_SCHEMAS.last().unwrap().version as i64;
            if db_version < current_schema_version {
                info!(
                    "Migrating records database from version {} to {}",
                    db_version, current_schema_version
                );
                Self::migrate_if_needed(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut latest_from = from_version;
        for schema in RECORDS_VERSIONED_SCHEMAS.iter() {
            if schema.version > from_version {
                info!(
                    "Running records database migration from version {} to {}",
                    latest_from, schema.version
                );
                if let Some(migration_fn) = schema.migration {
                    migration_fn(&tx).with_context(|| {
                        format!("Failed to run migration to version {}", schema.version)
                    })?;
                }
                latest_from = schema.version;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Schema version of the open database, without the base offset.
    pub fn schema_version(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        Ok((raw_version - BASE_DB_VERSION as i64) as usize)
    }

    /// Row counts per table, soft-deleted rows included.
    pub fn record_counts(&self) -> Result<RecordCounts> {
        let conn = self.conn.lock().unwrap();
        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
            Ok(n as usize)
        };
        Ok(RecordCounts {
            accounts: count("accounts")?,
            contacts: count("contacts")?,
            work_orders: count("work_orders")?,
            file_attachments: count("file_attachments")?,
        })
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
        let date_entered_str: String = row.get("date_entered")?;
        let deleted: i64 = row.get("deleted")?;
        Ok(Account {
            id: row.get("id")?,
            date_entered: Self::parse_datetime(&date_entered_str),
            name: row.get("name")?,
            account_type: row.get("account_type")?,
            billing_address_city: row.get("billing_address_city")?,
            phone_office: row.get("phone_office")?,
            ruc_code: row.get("ruc_code")?,
            shipping_address_street: row.get("shipping_address_street")?,
            deleted: deleted != 0,
        })
    }

    fn row_to_contact(row: &rusqlite::Row) -> rusqlite::Result<Contact> {
        let date_entered_str: String = row.get("date_entered")?;
        let birthdate_str: Option<String> = row.get("birthdate")?;
        let deleted: i64 = row.get("deleted")?;
        Ok(Contact {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            date_entered: Self::parse_datetime(&date_entered_str),
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
            title: row.get("title")?,
            department: row.get("department")?,
            birthdate: birthdate_str.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            phone_mobile: row.get("phone_mobile")?,
            phone_work: row.get("phone_work")?,
            email: row.get("email")?,
            primary_address_street: row.get("primary_address_street")?,
            deleted: deleted != 0,
        })
    }

    fn row_to_work_order(row: &rusqlite::Row) -> rusqlite::Result<WorkOrder> {
        let date_entered_str: String = row.get("date_entered")?;
        let status_str: String = row.get("status")?;
        let deleted: i64 = row.get("deleted")?;
        Ok(WorkOrder {
            id: row.get("id")?,
            number: row.get("number")?,
            account_id: row.get("account_id")?,
            contact_id: row.get("contact_id")?,
            description: row.get("description")?,
            total_cents: row.get("total_cents")?,
            status: WorkOrderStatus::parse(&status_str).unwrap_or(WorkOrderStatus::Open),
            date_entered: Self::parse_datetime(&date_entered_str),
            deleted: deleted != 0,
        })
    }

    fn row_to_attachment(row: &rusqlite::Row) -> rusqlite::Result<FileAttachment> {
        let date_entered_str: String = row.get("date_entered")?;
        let parent_kind_str: String = row.get("parent_kind")?;
        let category_str: String = row.get("category")?;
        Ok(FileAttachment {
            id: row.get("id")?,
            parent_kind: ParentKind::parse(&parent_kind_str).unwrap_or(ParentKind::Account),
            parent_id: row.get("parent_id")?,
            category: AttachmentCategory::parse(&category_str)
                .unwrap_or(AttachmentCategory::Budget),
            file_name: row.get("file_name")?,
            date_entered: Self::parse_datetime(&date_entered_str),
        })
    }

    fn parent_table(parent_kind: ParentKind) -> &'static str {
        match parent_kind {
            ParentKind::Account => "accounts",
            ParentKind::Contact => "contacts",
            ParentKind::WorkOrder => "work_orders",
        }
    }
}

const ACCOUNT_COLUMNS: &str = "id, date_entered, name, account_type, billing_address_city, \
     phone_office, ruc_code, shipping_address_street, deleted";

const CONTACT_COLUMNS: &str = "id, account_id, date_entered, first_name, last_name, title, \
     department, birthdate, phone_mobile, phone_work, email, primary_address_street, deleted";

const WORK_ORDER_COLUMNS: &str = "id, number, account_id, contact_id, description, total_cents, \
     status, date_entered, deleted";

const ATTACHMENT_COLUMNS: &str = "id, parent_kind, parent_id, category, file_name, date_entered";

impl RecordsStore for SqliteRecordsStore {
    fn create_account(&self, new_account: NewAccount) -> Result<Account> {
        new_account.validate()?;
        let conn = self.conn.lock().unwrap();

        let ruc_taken: Option<String> = conn
            .query_row(
                "SELECT id FROM accounts WHERE ruc_code = ?1",
                params![new_account.ruc_code],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing_id) = ruc_taken {
            bail!(
                "RUC {} already registered to account {}",
                new_account.ruc_code,
                existing_id
            );
        }

        let account = Account {
            id: Uuid::new_v4().to_string(),
            date_entered: Utc::now(),
            name: new_account.name,
            account_type: new_account.account_type,
            billing_address_city: new_account.billing_address_city,
            phone_office: new_account.phone_office,
            ruc_code: new_account.ruc_code,
            shipping_address_street: new_account.shipping_address_street,
            deleted: false,
        };
        conn.execute(
            "INSERT INTO accounts (id, date_entered, name, account_type, billing_address_city,
                                   phone_office, ruc_code, shipping_address_street, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                account.id,
                Self::format_datetime(&account.date_entered),
                account.name,
                account.account_type,
                account.billing_address_city,
                account.phone_office,
                account.ruc_code,
                account.shipping_address_street,
            ],
        )?;
        Ok(account)
    }

    fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let account = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS),
                params![account_id],
                Self::row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    fn find_account_by_ruc(&self, ruc_code: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let account = conn
            .query_row(
                &format!(
                    "SELECT {} FROM accounts WHERE ruc_code = ?1",
                    ACCOUNT_COLUMNS
                ),
                params![ruc_code],
                Self::row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    fn list_accounts(&self, include_deleted: bool) -> Result<Vec<Account>> {
        let conn = self.conn.lock().unwrap();
        let sql = if include_deleted {
            format!("SELECT {} FROM accounts ORDER BY date_entered", ACCOUNT_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM accounts WHERE deleted = 0 ORDER BY date_entered",
                ACCOUNT_COLUMNS
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([], Self::row_to_account)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    fn soft_delete_account(&self, account_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE accounts SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![account_id],
        )?;
        Ok(changed > 0)
    }

    fn create_contact(&self, new_contact: NewContact) -> Result<Contact> {
        new_contact.validate()?;
        let conn = self.conn.lock().unwrap();

        let account_deleted: Option<i64> = conn
            .query_row(
                "SELECT deleted FROM accounts WHERE id = ?1",
                params![new_contact.account_id],
                |row| row.get(0),
            )
            .optional()?;
        match account_deleted {
            None => bail!("Account {} not found", new_contact.account_id),
            Some(d) if d != 0 => bail!("Account {} is deleted", new_contact.account_id),
            Some(_) => {}
        }

        let contact = Contact {
            id: Uuid::new_v4().to_string(),
            account_id: new_contact.account_id,
            date_entered: Utc::now(),
            first_name: new_contact.first_name,
            last_name: new_contact.last_name,
            title: new_contact.title,
            department: new_contact.department,
            birthdate: new_contact.birthdate,
            phone_mobile: new_contact.phone_mobile,
            phone_work: new_contact.phone_work,
            email: new_contact.email,
            primary_address_street: new_contact.primary_address_street,
            deleted: false,
        };
        conn.execute(
            "INSERT INTO contacts (id, account_id, date_entered, first_name, last_name, title,
                                   department, birthdate, phone_mobile, phone_work, email,
                                   primary_address_street, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0)",
            params![
                contact.id,
                contact.account_id,
                Self::format_datetime(&contact.date_entered),
                contact.first_name,
                contact.last_name,
                contact.title,
                contact.department,
                contact.birthdate.map(|d| d.format("%Y-%m-%d").to_string()),
                contact.phone_mobile,
                contact.phone_work,
                contact.email,
                contact.primary_address_street,
            ],
        )?;
        Ok(contact)
    }

    fn get_contact(&self, contact_id: &str) -> Result<Option<Contact>> {
        let conn = self.conn.lock().unwrap();
        let contact = conn
            .query_row(
                &format!("SELECT {} FROM contacts WHERE id = ?1", CONTACT_COLUMNS),
                params![contact_id],
                Self::row_to_contact,
            )
            .optional()?;
        Ok(contact)
    }

    fn list_account_contacts(&self, account_id: &str) -> Result<Vec<Contact>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM contacts WHERE account_id = ?1 AND deleted = 0 ORDER BY date_entered",
            CONTACT_COLUMNS
        ))?;
        let contacts = stmt
            .query_map(params![account_id], Self::row_to_contact)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contacts)
    }

    fn soft_delete_contact(&self, contact_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE contacts SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![contact_id],
        )?;
        Ok(changed > 0)
    }

    fn create_work_order(&self, new_work_order: NewWorkOrder) -> Result<WorkOrder> {
        new_work_order.validate()?;
        let mut conn = self.conn.lock().unwrap();

        // The write lock is taken up front and held until commit: parent
        // checks, the counter increment and the insert see one consistent
        // database state, and no two transactions can read the same number.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let account_deleted: Option<i64> = tx
            .query_row(
                "SELECT deleted FROM accounts WHERE id = ?1",
                params![new_work_order.account_id],
                |row| row.get(0),
            )
            .optional()?;
        match account_deleted {
            None => bail!("Account {} not found", new_work_order.account_id),
            Some(d) if d != 0 => bail!("Account {} is deleted", new_work_order.account_id),
            Some(_) => {}
        }

        let contact_row: Option<(String, i64)> = tx
            .query_row(
                "SELECT account_id, deleted FROM contacts WHERE id = ?1",
                params![new_work_order.contact_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match contact_row {
            None => bail!("Contact {} not found", new_work_order.contact_id),
            Some((_, d)) if d != 0 => bail!("Contact {} is deleted", new_work_order.contact_id),
            Some((contact_account_id, _)) if contact_account_id != new_work_order.account_id => {
                bail!(
                    "Contact {} does not belong to account {}",
                    new_work_order.contact_id,
                    new_work_order.account_id
                )
            }
            Some(_) => {}
        }

        tx.execute(
            "UPDATE odt_counter SET last_number = last_number + 1 WHERE id = 0",
            [],
        )?;
        let number: i64 = tx.query_row(
            "SELECT last_number FROM odt_counter WHERE id = 0",
            [],
            |row| row.get(0),
        )?;

        let work_order = WorkOrder {
            id: Uuid::new_v4().to_string(),
            number,
            account_id: new_work_order.account_id,
            contact_id: new_work_order.contact_id,
            description: new_work_order.description,
            total_cents: new_work_order.total_cents,
            status: new_work_order.status,
            date_entered: Utc::now(),
            deleted: false,
        };
        tx.execute(
            "INSERT INTO work_orders (id, number, account_id, contact_id, description,
                                      total_cents, status, date_entered, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                work_order.id,
                work_order.number,
                work_order.account_id,
                work_order.contact_id,
                work_order.description,
                work_order.total_cents,
                work_order.status.as_str(),
                Self::format_datetime(&work_order.date_entered),
            ],
        )?;
        tx.commit()?;
        Ok(work_order)
    }

    fn get_work_order(&self, work_order_id: &str) -> Result<Option<WorkOrder>> {
        let conn = self.conn.lock().unwrap();
        let work_order = conn
            .query_row(
                &format!(
                    "SELECT {} FROM work_orders WHERE id = ?1",
                    WORK_ORDER_COLUMNS
                ),
                params![work_order_id],
                Self::row_to_work_order,
            )
            .optional()?;
        Ok(work_order)
    }

    fn find_work_order_by_number(&self, number: i64) -> Result<Option<WorkOrder>> {
        let conn = self.conn.lock().unwrap();
        let work_order = conn
            .query_row(
                &format!(
                    "SELECT {} FROM work_orders WHERE number = ?1",
                    WORK_ORDER_COLUMNS
                ),
                params![number],
                Self::row_to_work_order,
            )
            .optional()?;
        Ok(work_order)
    }

    fn list_account_work_orders(
        &self,
        account_id: &str,
        include_deleted: bool,
    ) -> Result<Vec<WorkOrder>> {
        let conn = self.conn.lock().unwrap();
        let sql = if include_deleted {
            format!(
                "SELECT {} FROM work_orders WHERE account_id = ?1 ORDER BY number",
                WORK_ORDER_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM work_orders WHERE account_id = ?1 AND deleted = 0 ORDER BY number",
                WORK_ORDER_COLUMNS
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let work_orders = stmt
            .query_map(params![account_id], Self::row_to_work_order)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(work_orders)
    }

    fn soft_delete_work_order(&self, work_order_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE work_orders SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![work_order_id],
        )?;
        Ok(changed > 0)
    }

    fn last_odt_number(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let number = conn.query_row(
            "SELECT last_number FROM odt_counter WHERE id = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(number)
    }

    fn add_attachment(
        &self,
        parent_kind: ParentKind,
        parent_id: &str,
        category: AttachmentCategory,
        file_name: &str,
    ) -> Result<FileAttachment> {
        let conn = self.conn.lock().unwrap();

        let parent_exists: bool = conn
            .query_row(
                &format!(
                    "SELECT 1 FROM {} WHERE id = ?1",
                    Self::parent_table(parent_kind)
                ),
                params![parent_id],
                |_| Ok(true),
            )
            .optional()?
            .is_some();
        if !parent_exists {
            bail!("{} {} not found", Self::parent_table(parent_kind), parent_id);
        }

        let date_entered = Utc::now();
        conn.execute(
            "INSERT INTO file_attachments (parent_kind, parent_id, category, file_name, date_entered)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                parent_kind.as_str(),
                parent_id,
                category.as_str(),
                file_name,
                Self::format_datetime(&date_entered),
            ],
        )?;
        Ok(FileAttachment {
            id: conn.last_insert_rowid(),
            parent_kind,
            parent_id: parent_id.to_string(),
            category,
            file_name: file_name.to_string(),
            date_entered,
        })
    }

    fn get_attachment(&self, attachment_id: i64) -> Result<Option<FileAttachment>> {
        let conn = self.conn.lock().unwrap();
        let attachment = conn
            .query_row(
                &format!(
                    "SELECT {} FROM file_attachments WHERE id = ?1",
                    ATTACHMENT_COLUMNS
                ),
                params![attachment_id],
                Self::row_to_attachment,
            )
            .optional()?;
        Ok(attachment)
    }

    fn list_attachments(
        &self,
        parent_kind: ParentKind,
        parent_id: &str,
    ) -> Result<Vec<FileAttachment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM file_attachments WHERE parent_kind = ?1 AND parent_id = ?2 ORDER BY id",
            ATTACHMENT_COLUMNS
        ))?;
        let attachments = stmt
            .query_map(
                params![parent_kind.as_str(), parent_id],
                Self::row_to_attachment,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attachments)
    }

    fn list_attachments_by_category(
        &self,
        parent_kind: ParentKind,
        parent_id: &str,
        category: AttachmentCategory,
    ) -> Result<Vec<FileAttachment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM file_attachments
             WHERE parent_kind = ?1 AND parent_id = ?2 AND category = ?3 ORDER BY id",
            ATTACHMENT_COLUMNS
        ))?;
        let attachments = stmt
            .query_map(
                params![parent_kind.as_str(), parent_id, category.as_str()],
                Self::row_to_attachment,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attachments)
    }

    fn remove_attachment(&self, attachment_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM file_attachments WHERE id = ?1",
            params![attachment_id],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_tmp_store() -> (SqliteRecordsStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let temp_file_path = temp_dir.path().join("records.db");
        let store = SqliteRecordsStore::new(&temp_file_path).unwrap();
        (store, temp_dir)
    }

    fn sample_account(ruc_code: &str) -> NewAccount {
        NewAccount {
            name: "Taller Norte SAC".to_string(),
            ruc_code: ruc_code.to_string(),
            account_type: Some("customer".to_string()),
            billing_address_city: Some("Lima".to_string()),
            ..Default::default()
        }
    }

    fn sample_contact(account_id: &str) -> NewContact {
        NewContact {
            account_id: account_id.to_string(),
            first_name: "Rosa".to_string(),
            last_name: "Quispe".to_string(),
            email: "rosa@example.com".to_string(),
            ..Default::default()
        }
    }

    fn sample_work_order(account_id: &str, contact_id: &str) -> NewWorkOrder {
        NewWorkOrder {
            account_id: account_id.to_string(),
            contact_id: contact_id.to_string(),
            description: Some("Engine overhaul".to_string()),
            total_cents: 250_000,
            status: WorkOrderStatus::Open,
        }
    }

    #[test]
    fn creates_and_fetches_account() {
        let (store, _temp_dir) = create_tmp_store();

        let created = store.create_account(sample_account("20123456789")).unwrap();
        let fetched = store.get_account(&created.id).unwrap().unwrap();
        assert_eq!(fetched.name, "Taller Norte SAC");
        assert_eq!(fetched.ruc_code, "20123456789");
        assert!(!fetched.deleted);

        let by_ruc = store.find_account_by_ruc("20123456789").unwrap().unwrap();
        assert_eq!(by_ruc.id, created.id);
    }

    #[test]
    fn rejects_duplicate_ruc() {
        let (store, _temp_dir) = create_tmp_store();

        store.create_account(sample_account("20123456789")).unwrap();
        let err = store
            .create_account(sample_account("20123456789"))
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn rejects_invalid_ruc() {
        let (store, _temp_dir) = create_tmp_store();
        assert!(store.create_account(sample_account("123")).is_err());
    }

    #[test]
    fn soft_delete_hides_account_from_default_listing() {
        let (store, _temp_dir) = create_tmp_store();

        let account = store.create_account(sample_account("20123456789")).unwrap();
        assert!(store.soft_delete_account(&account.id).unwrap());
        // Second soft delete is a no-op.
        assert!(!store.soft_delete_account(&account.id).unwrap());

        assert!(store.list_accounts(false).unwrap().is_empty());
        let all = store.list_accounts(true).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].deleted);
    }

    #[test]
    fn contact_requires_live_account() {
        let (store, _temp_dir) = create_tmp_store();

        let err = store.create_contact(sample_contact("missing")).unwrap_err();
        assert!(err.to_string().contains("not found"));

        let account = store.create_account(sample_account("20123456789")).unwrap();
        store.soft_delete_account(&account.id).unwrap();
        let err = store.create_contact(sample_contact(&account.id)).unwrap_err();
        assert!(err.to_string().contains("is deleted"));
    }

    #[test]
    fn lists_contacts_per_account() {
        let (store, _temp_dir) = create_tmp_store();

        let account = store.create_account(sample_account("20123456789")).unwrap();
        let other = store.create_account(sample_account("20987654321")).unwrap();

        let contact = store.create_contact(sample_contact(&account.id)).unwrap();
        store.create_contact(sample_contact(&other.id)).unwrap();

        let contacts = store.list_account_contacts(&account.id).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, contact.id);

        store.soft_delete_contact(&contact.id).unwrap();
        assert!(store.list_account_contacts(&account.id).unwrap().is_empty());
    }

    #[test]
    fn work_order_numbers_start_at_one_and_increase() {
        let (store, _temp_dir) = create_tmp_store();

        let account = store.create_account(sample_account("20123456789")).unwrap();
        let contact = store.create_contact(sample_contact(&account.id)).unwrap();

        assert_eq!(store.last_odt_number().unwrap(), 0);

        let first = store
            .create_work_order(sample_work_order(&account.id, &contact.id))
            .unwrap();
        let second = store
            .create_work_order(sample_work_order(&account.id, &contact.id))
            .unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);
        assert_eq!(store.last_odt_number().unwrap(), 2);

        let by_number = store.find_work_order_by_number(2).unwrap().unwrap();
        assert_eq!(by_number.id, second.id);
    }

    #[test]
    fn work_order_contact_must_belong_to_account() {
        let (store, _temp_dir) = create_tmp_store();

        let account = store.create_account(sample_account("20123456789")).unwrap();
        let other = store.create_account(sample_account("20987654321")).unwrap();
        let foreign_contact = store.create_contact(sample_contact(&other.id)).unwrap();

        let err = store
            .create_work_order(sample_work_order(&account.id, &foreign_contact.id))
            .unwrap_err();
        assert!(err.to_string().contains("does not belong"));
    }

    #[test]
    fn soft_deleted_work_order_keeps_its_number() {
        let (store, _temp_dir) = create_tmp_store();

        let account = store.create_account(sample_account("20123456789")).unwrap();
        let contact = store.create_contact(sample_contact(&account.id)).unwrap();

        let first = store
            .create_work_order(sample_work_order(&account.id, &contact.id))
            .unwrap();
        store.soft_delete_work_order(&first.id).unwrap();

        // The number is not reissued.
        let second = store
            .create_work_order(sample_work_order(&account.id, &contact.id))
            .unwrap();
        assert_eq!(second.number, 2);

        let visible = store.list_account_work_orders(&account.id, false).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].number, 2);

        let all = store.list_account_work_orders(&account.id, true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn attachments_attach_to_each_parent_kind() {
        let (store, _temp_dir) = create_tmp_store();

        let account = store.create_account(sample_account("20123456789")).unwrap();
        let contact = store.create_contact(sample_contact(&account.id)).unwrap();
        let work_order = store
            .create_work_order(sample_work_order(&account.id, &contact.id))
            .unwrap();

        store
            .add_attachment(
                ParentKind::Account,
                &account.id,
                AttachmentCategory::ComplianceDoc,
                "ruc.pdf",
            )
            .unwrap();
        store
            .add_attachment(
                ParentKind::Contact,
                &contact.id,
                AttachmentCategory::ReferenceImage,
                "dni.jpg",
            )
            .unwrap();
        let budget = store
            .add_attachment(
                ParentKind::WorkOrder,
                &work_order.id,
                AttachmentCategory::Budget,
                "presupuesto.pdf",
            )
            .unwrap();

        let on_work_order = store
            .list_attachments(ParentKind::WorkOrder, &work_order.id)
            .unwrap();
        assert_eq!(on_work_order.len(), 1);
        assert_eq!(on_work_order[0].id, budget.id);
        assert_eq!(on_work_order[0].file_name, "presupuesto.pdf");

        let on_account = store
            .list_attachments(ParentKind::Account, &account.id)
            .unwrap();
        assert_eq!(on_account.len(), 1);
        assert_eq!(on_account[0].category, AttachmentCategory::ComplianceDoc);
    }

    #[test]
    fn attachment_requires_existing_parent() {
        let (store, _temp_dir) = create_tmp_store();
        let err = store
            .add_attachment(
                ParentKind::WorkOrder,
                "missing",
                AttachmentCategory::Budget,
                "x.pdf",
            )
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn attachments_filter_by_category() {
        let (store, _temp_dir) = create_tmp_store();

        let account = store.create_account(sample_account("20123456789")).unwrap();
        store
            .add_attachment(
                ParentKind::Account,
                &account.id,
                AttachmentCategory::Budget,
                "a.pdf",
            )
            .unwrap();
        store
            .add_attachment(
                ParentKind::Account,
                &account.id,
                AttachmentCategory::ComplianceDoc,
                "b.pdf",
            )
            .unwrap();

        let budgets = store
            .list_attachments_by_category(
                ParentKind::Account,
                &account.id,
                AttachmentCategory::Budget,
            )
            .unwrap();
        assert_eq!(budgets.len(), 1);
        assert_eq!(budgets[0].file_name, "a.pdf");
    }

    #[test]
    fn remove_attachment_reports_presence() {
        let (store, _temp_dir) = create_tmp_store();

        let account = store.create_account(sample_account("20123456789")).unwrap();
        let attachment = store
            .add_attachment(
                ParentKind::Account,
                &account.id,
                AttachmentCategory::Budget,
                "a.pdf",
            )
            .unwrap();

        assert!(store.remove_attachment(attachment.id).unwrap());
        assert!(!store.remove_attachment(attachment.id).unwrap());
        assert!(store.get_attachment(attachment.id).unwrap().is_none());
    }

    #[test]
    fn opening_v1_database_migrates_to_latest() {
        use rusqlite::Connection;

        let temp_dir = TempDir::new().unwrap();
        let temp_file_path = temp_dir.path().join("records.db");

        {
            let conn = Connection::open(&temp_file_path).unwrap();
            RECORDS_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
            conn.execute(
                "INSERT INTO accounts (id, date_entered, name, ruc_code)
                 VALUES ('acc-1', '2024-03-01T10:00:00+00:00', 'Taller Norte', '20123456789')",
                [],
            )
            .unwrap();

            let db_version: i64 = conn
                .query_row("PRAGMA user_version;", [], |row| row.get(0))
                .unwrap();
            assert_eq!(db_version, BASE_DB_VERSION as i64 + 1);
        }

        let store = SqliteRecordsStore::new(&temp_file_path).unwrap();

        {
            let conn = store.conn.lock().unwrap();
            let db_version: i64 = conn
                .query_row("PRAGMA user_version;", [], |row| row.get(0))
                .unwrap();
            assert_eq!(db_version, BASE_DB_VERSION as i64 + 4);
            RECORDS_VERSIONED_SCHEMAS
                .last()
                .unwrap()
                .validate(&conn)
                .unwrap();
        }

        // Old data survives and the migrated database is fully usable.
        let account = store.get_account("acc-1").unwrap().unwrap();
        assert_eq!(account.ruc_code, "20123456789");

        let contact = store.create_contact(sample_contact("acc-1")).unwrap();
        let work_order = store
            .create_work_order(sample_work_order("acc-1", &contact.id))
            .unwrap();
        assert_eq!(work_order.number, 1);
    }

    #[test]
    fn rejects_foreign_database() {
        use rusqlite::Connection;

        let temp_dir = TempDir::new().unwrap();
        let temp_file_path = temp_dir.path().join("records.db");
        {
            let conn = Connection::open(&temp_file_path).unwrap();
            conn.execute("CREATE TABLE other (id INTEGER PRIMARY KEY)", [])
                .unwrap();
        }

        let err = SqliteRecordsStore::new(&temp_file_path).unwrap_err();
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn concurrent_work_order_numbers_are_contiguous() {
        const THREADS: usize = 8;
        const ORDERS_PER_THREAD: usize = 5;

        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("records.db");

        let setup_store = SqliteRecordsStore::new(&db_path).unwrap();
        let account = setup_store
            .create_account(sample_account("20123456789"))
            .unwrap();
        let contact = setup_store.create_contact(sample_contact(&account.id)).unwrap();
        drop(setup_store);

        // Every thread opens its own connection on the same file, so the
        // counter increments really do contend on the database write lock.
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let db_path = db_path.clone();
                let account_id = account.id.clone();
                let contact_id = contact.id.clone();
                std::thread::spawn(move || {
                    let store = SqliteRecordsStore::new(&db_path).unwrap();
                    (0..ORDERS_PER_THREAD)
                        .map(|_| {
                            store
                                .create_work_order(sample_work_order(&account_id, &contact_id))
                                .unwrap()
                                .number
                        })
                        .collect::<Vec<i64>>()
                })
            })
            .collect();

        let mut numbers: Vec<i64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        numbers.sort_unstable();

        let expected: Vec<i64> = (1..=(THREADS * ORDERS_PER_THREAD) as i64).collect();
        assert_eq!(numbers, expected);
    }
}
