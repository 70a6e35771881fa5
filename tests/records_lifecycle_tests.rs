//! End-to-end tests over the records store and the attachment vault
//!
//! Drives a full business flow through the public library surface: account,
//! contact, work order with its ODT number, attachments on disk, soft
//! deletes.

use taller_records::records_store::{
    AttachmentCategory, NewAccount, NewContact, NewWorkOrder, ParentKind, WorkOrderStatus,
};
use taller_records::{FileVault, RecordsStore, SqliteRecordsStore};
use tempfile::TempDir;

struct TestEnv {
    store: SqliteRecordsStore,
    vault: FileVault,
    _temp_dir: TempDir,
}

fn test_env() -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteRecordsStore::new(temp_dir.path().join("records.db")).unwrap();
    let vault = FileVault::new(temp_dir.path().join("attachments"));
    vault.init().unwrap();
    TestEnv {
        store,
        vault,
        _temp_dir: temp_dir,
    }
}

#[test]
fn test_full_work_order_flow() {
    let env = test_env();

    let account = env
        .store
        .create_account(NewAccount {
            name: "Servicios Andinos EIRL".to_string(),
            ruc_code: "20456789012".to_string(),
            account_type: Some("customer".to_string()),
            billing_address_city: Some("Arequipa".to_string()),
            ..Default::default()
        })
        .unwrap();

    let contact = env
        .store
        .create_contact(NewContact {
            account_id: account.id.clone(),
            first_name: "Julio".to_string(),
            last_name: "Mamani".to_string(),
            email: "julio@serviciosandinos.pe".to_string(),
            ..Default::default()
        })
        .unwrap();

    let work_order = env
        .store
        .create_work_order(NewWorkOrder {
            account_id: account.id.clone(),
            contact_id: contact.id.clone(),
            description: Some("Brake service".to_string()),
            total_cents: 89_900,
            status: WorkOrderStatus::Open,
        })
        .unwrap();
    assert_eq!(work_order.number, 1);
    assert_eq!(env.store.last_odt_number().unwrap(), 1);

    // Attach a budget document to the work order and park the bytes.
    let attachment = env
        .store
        .add_attachment(
            ParentKind::WorkOrder,
            &work_order.id,
            AttachmentCategory::Budget,
            "presupuesto.pdf",
        )
        .unwrap();
    let stored_path = env
        .vault
        .store(attachment.id, &attachment.file_name, b"%PDF-1.4 fake")
        .unwrap();
    assert!(stored_path.exists());

    let listed = env
        .store
        .list_attachments(ParentKind::WorkOrder, &work_order.id)
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].file_name, "presupuesto.pdf");

    // Removing the row and the payload leaves nothing behind.
    assert!(env.store.remove_attachment(attachment.id).unwrap());
    env.vault.remove(attachment.id).unwrap();
    assert!(!stored_path.exists());
    assert!(env
        .store
        .list_attachments(ParentKind::WorkOrder, &work_order.id)
        .unwrap()
        .is_empty());
}

#[test]
fn test_soft_delete_cascade_visibility() {
    let env = test_env();

    let account = env
        .store
        .create_account(NewAccount {
            name: "Taller Central".to_string(),
            ruc_code: "20111222333".to_string(),
            ..Default::default()
        })
        .unwrap();
    let contact = env
        .store
        .create_contact(NewContact {
            account_id: account.id.clone(),
            first_name: "Ana".to_string(),
            last_name: "Torres".to_string(),
            email: "ana@tallercentral.pe".to_string(),
            ..Default::default()
        })
        .unwrap();
    env.store
        .create_work_order(NewWorkOrder {
            account_id: account.id.clone(),
            contact_id: contact.id.clone(),
            description: None,
            total_cents: 10_000,
            status: WorkOrderStatus::Open,
        })
        .unwrap();

    env.store.soft_delete_account(&account.id).unwrap();

    // The account disappears from the default listing but nothing under it
    // is destroyed.
    assert!(env.store.list_accounts(false).unwrap().is_empty());
    assert_eq!(env.store.list_account_contacts(&account.id).unwrap().len(), 1);
    assert_eq!(
        env.store
            .list_account_work_orders(&account.id, false)
            .unwrap()
            .len(),
        1
    );

    // New work under the dead account is refused.
    assert!(env
        .store
        .create_work_order(NewWorkOrder {
            account_id: account.id.clone(),
            contact_id: contact.id,
            description: None,
            total_cents: 5_000,
            status: WorkOrderStatus::Open,
        })
        .is_err());
}

#[test]
fn test_reopened_database_keeps_counter_position() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("records.db");

    let (account_id, contact_id) = {
        let store = SqliteRecordsStore::new(&db_path).unwrap();
        let account = store
            .create_account(NewAccount {
                name: "Taller Sur".to_string(),
                ruc_code: "20999888777".to_string(),
                ..Default::default()
            })
            .unwrap();
        let contact = store
            .create_contact(NewContact {
                account_id: account.id.clone(),
                first_name: "Luis".to_string(),
                last_name: "Paredes".to_string(),
                email: "luis@tallersur.pe".to_string(),
                ..Default::default()
            })
            .unwrap();
        for _ in 0..3 {
            store
                .create_work_order(NewWorkOrder {
                    account_id: account.id.clone(),
                    contact_id: contact.id.clone(),
                    description: None,
                    total_cents: 1_000,
                    status: WorkOrderStatus::Open,
                })
                .unwrap();
        }
        (account.id, contact.id)
    };

    // A fresh process picks up where the counter left off.
    let store = SqliteRecordsStore::new(&db_path).unwrap();
    assert_eq!(store.last_odt_number().unwrap(), 3);
    let next = store
        .create_work_order(NewWorkOrder {
            account_id,
            contact_id,
            description: None,
            total_cents: 1_000,
            status: WorkOrderStatus::Open,
        })
        .unwrap();
    assert_eq!(next.number, 4);
}
