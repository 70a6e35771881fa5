mod models;
mod schema;
mod sqlite_records_store;

pub use models::*;
pub use schema::RECORDS_VERSIONED_SCHEMAS;
pub use sqlite_records_store::SqliteRecordsStore;

use anyhow::Result;

pub trait RecordsStore: Send + Sync {
    // Accounts
    fn create_account(&self, new_account: NewAccount) -> Result<Account>;
    fn get_account(&self, account_id: &str) -> Result<Option<Account>>;
    fn find_account_by_ruc(&self, ruc_code: &str) -> Result<Option<Account>>;
    fn list_accounts(&self, include_deleted: bool) -> Result<Vec<Account>>;
    fn soft_delete_account(&self, account_id: &str) -> Result<bool>;

    // Contacts
    fn create_contact(&self, new_contact: NewContact) -> Result<Contact>;
    fn get_contact(&self, contact_id: &str) -> Result<Option<Contact>>;
    fn list_account_contacts(&self, account_id: &str) -> Result<Vec<Contact>>;
    fn soft_delete_contact(&self, contact_id: &str) -> Result<bool>;

    // Work orders
    /// Creates a work order, assigning the next ODT number. The counter
    /// increment and the insert commit atomically, so committed numbers form
    /// a contiguous run with no duplicates and no gaps.
    fn create_work_order(&self, new_work_order: NewWorkOrder) -> Result<WorkOrder>;
    fn get_work_order(&self, work_order_id: &str) -> Result<Option<WorkOrder>>;
    fn find_work_order_by_number(&self, number: i64) -> Result<Option<WorkOrder>>;
    fn list_account_work_orders(
        &self,
        account_id: &str,
        include_deleted: bool,
    ) -> Result<Vec<WorkOrder>>;
    fn soft_delete_work_order(&self, work_order_id: &str) -> Result<bool>;
    /// The last ODT number issued, 0 if none ever was.
    fn last_odt_number(&self) -> Result<i64>;

    // File attachments
    fn add_attachment(
        &self,
        parent_kind: ParentKind,
        parent_id: &str,
        category: AttachmentCategory,
        file_name: &str,
    ) -> Result<FileAttachment>;
    fn get_attachment(&self, attachment_id: i64) -> Result<Option<FileAttachment>>;
    fn list_attachments(
        &self,
        parent_kind: ParentKind,
        parent_id: &str,
    ) -> Result<Vec<FileAttachment>>;
    fn list_attachments_by_category(
        &self,
        parent_kind: ParentKind,
        parent_id: &str,
        category: AttachmentCategory,
    ) -> Result<Vec<FileAttachment>>;
    fn remove_attachment(&self, attachment_id: i64) -> Result<bool>;
}
