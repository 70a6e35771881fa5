use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod attachments;
mod config;
mod records_store;
mod sqlite_persistence;

use attachments::FileVault;
use config::{AppConfig, CliConfig, FileConfig};
use records_store::{
    AttachmentCategory, NewAccount, NewContact, NewWorkOrder, ParentKind, RecordsStore,
    SqliteRecordsStore, WorkOrderStatus,
};

const GIT_HASH: &str = env!("GIT_HASH");

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_parent(s: &str) -> Result<(ParentKind, String)> {
    let (kind_str, id) = s
        .split_once(':')
        .with_context(|| format!("Expected <kind>:<id>, e.g. work_order:<uuid>, got '{}'", s))?;
    let kind = ParentKind::parse(kind_str).with_context(|| {
        format!(
            "Unknown parent kind '{}', expected account, contact or work_order",
            kind_str
        )
    })?;
    if id.is_empty() {
        bail!("Empty parent id in '{}'", s);
    }
    Ok((kind, id.to_string()))
}

fn parse_category(s: &str) -> Result<AttachmentCategory> {
    AttachmentCategory::parse(s).with_context(|| {
        format!(
            "Unknown category '{}', expected budget, compliance_doc or reference_image",
            s
        )
    })
}

fn parse_status(s: &str) -> Result<WorkOrderStatus> {
    WorkOrderStatus::parse(s)
        .with_context(|| format!("Unknown status '{}', expected open, invoiced or closed", s))
}

#[derive(Parser, Debug)]
#[command(name = "taller-records", version)]
struct CliArgs {
    /// Directory holding the records database.
    #[clap(long, value_parser = parse_path)]
    db_dir: Option<PathBuf>,

    /// Directory holding attachment payloads. Defaults to <db-dir>/attachments.
    #[clap(long, value_parser = parse_path)]
    attachments_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in it override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    config: Option<PathBuf>,

    /// Print results as JSON instead of text.
    #[clap(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates the records database if missing and runs pending migrations.
    Init,

    /// Shows the schema version, record counts and the last issued ODT number.
    Status,

    /// Account operations.
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },

    /// Contact operations.
    Contact {
        #[command(subcommand)]
        command: ContactCommand,
    },

    /// Work order (ODT) operations.
    Odt {
        #[command(subcommand)]
        command: OdtCommand,
    },

    /// File attachment operations.
    Attach {
        #[command(subcommand)]
        command: AttachCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Creates an account.
    Add {
        name: String,
        /// 11-digit RUC code, unique across accounts.
        ruc_code: String,
        #[clap(long)]
        account_type: Option<String>,
        #[clap(long)]
        city: Option<String>,
        #[clap(long)]
        phone: Option<String>,
        #[clap(long)]
        shipping_street: Option<String>,
    },

    /// Lists accounts, skipping soft-deleted ones unless --all is given.
    List {
        #[clap(long)]
        all: bool,
    },

    /// Soft-deletes an account.
    Rm { account_id: String },
}

#[derive(Subcommand, Debug)]
enum ContactCommand {
    /// Creates a contact under an account.
    Add {
        account_id: String,
        first_name: String,
        last_name: String,
        email: String,
        #[clap(long)]
        title: Option<String>,
        #[clap(long)]
        department: Option<String>,
        #[clap(long)]
        phone_mobile: Option<String>,
        #[clap(long)]
        phone_work: Option<String>,
        #[clap(long)]
        street: Option<String>,
    },

    /// Lists the live contacts of an account.
    List { account_id: String },

    /// Soft-deletes a contact.
    Rm { contact_id: String },
}

#[derive(Subcommand, Debug)]
enum OdtCommand {
    /// Creates a work order; the ODT number is assigned automatically.
    Add {
        account_id: String,
        contact_id: String,
        /// Amount in cents.
        total_cents: i64,
        #[clap(long)]
        description: Option<String>,
        #[clap(long, default_value = "open", value_parser = parse_status)]
        status: WorkOrderStatus,
    },

    /// Lists the work orders of an account.
    List {
        account_id: String,
        #[clap(long)]
        all: bool,
    },

    /// Soft-deletes a work order. Its number is never reissued.
    Rm { work_order_id: String },
}

#[derive(Subcommand, Debug)]
enum AttachCommand {
    /// Attaches a file to a record, e.g. --to work_order:<uuid>.
    Add {
        #[clap(long, value_parser = parse_parent)]
        to: (ParentKind, String),
        #[clap(long, value_parser = parse_category)]
        category: AttachmentCategory,
        #[clap(value_parser = parse_path)]
        file: PathBuf,
    },

    /// Lists attachments of a record.
    List {
        #[clap(long, value_parser = parse_parent)]
        to: (ParentKind, String),
        #[clap(long, value_parser = parse_category)]
        category: Option<AttachmentCategory>,
    },

    /// Removes an attachment and its stored payload.
    Rm { attachment_id: i64 },
}

fn print_records<T: Serialize>(records: &[T], json: bool, describe: impl Fn(&T) -> String) {
    if json {
        println!("{}", serde_json::to_string_pretty(records).unwrap());
        return;
    }
    if records.is_empty() {
        println!("(none)");
    }
    for record in records {
        println!("{}", describe(record));
    }
}

fn print_record<T: Serialize>(record: &T, json: bool, line: String) {
    if json {
        println!("{}", serde_json::to_string_pretty(record).unwrap());
    } else {
        println!("{}", line);
    }
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        attachments_dir: cli_args.attachments_dir.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    // Opening runs any pending migrations.
    let store = SqliteRecordsStore::new(config.records_db_path())?;
    let vault = FileVault::new(&config.attachments_dir);
    let json = cli_args.json;

    match cli_args.command {
        Command::Init => {
            info!("Records database ready at {:?}", config.records_db_path());
            println!(
                "Database at {:?} is at schema version {}",
                config.records_db_path(),
                store.schema_version()?
            );
        }

        Command::Status => {
            let counts = store.record_counts()?;
            #[derive(Serialize)]
            struct Status {
                schema_version: usize,
                last_odt_number: i64,
                counts: records_store::RecordCounts,
                git_hash: &'static str,
            }
            let status = Status {
                schema_version: store.schema_version()?,
                last_odt_number: store.last_odt_number()?,
                counts,
                git_hash: GIT_HASH,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&status).unwrap());
            } else {
                println!("schema version:  {}", status.schema_version);
                println!("last ODT number: {}", status.last_odt_number);
                println!(
                    "records:         {} accounts, {} contacts, {} work orders, {} attachments",
                    status.counts.accounts,
                    status.counts.contacts,
                    status.counts.work_orders,
                    status.counts.file_attachments
                );
                println!("build:           {}", status.git_hash);
            }
        }

        Command::Account { command } => match command {
            AccountCommand::Add {
                name,
                ruc_code,
                account_type,
                city,
                phone,
                shipping_street,
            } => {
                let account = store.create_account(NewAccount {
                    name,
                    ruc_code,
                    account_type,
                    billing_address_city: city,
                    phone_office: phone,
                    shipping_address_street: shipping_street,
                })?;
                print_record(
                    &account,
                    json,
                    format!("Created account {} ({})", account.id, account.name),
                );
            }
            AccountCommand::List { all } => {
                let accounts = store.list_accounts(all)?;
                print_records(&accounts, json, |a| {
                    format!(
                        "{}  RUC {}  {}{}",
                        a.id,
                        a.ruc_code,
                        a.name,
                        if a.deleted { "  (deleted)" } else { "" }
                    )
                });
            }
            AccountCommand::Rm { account_id } => {
                if store.soft_delete_account(&account_id)? {
                    println!("Soft-deleted account {}", account_id);
                } else {
                    bail!("Account {} not found or already deleted", account_id);
                }
            }
        },

        Command::Contact { command } => match command {
            ContactCommand::Add {
                account_id,
                first_name,
                last_name,
                email,
                title,
                department,
                phone_mobile,
                phone_work,
                street,
            } => {
                let contact = store.create_contact(NewContact {
                    account_id,
                    first_name,
                    last_name,
                    email,
                    title,
                    department,
                    birthdate: None,
                    phone_mobile,
                    phone_work,
                    primary_address_street: street,
                })?;
                print_record(
                    &contact,
                    json,
                    format!(
                        "Created contact {} ({} {})",
                        contact.id, contact.first_name, contact.last_name
                    ),
                );
            }
            ContactCommand::List { account_id } => {
                let contacts = store.list_account_contacts(&account_id)?;
                print_records(&contacts, json, |c| {
                    format!("{}  {} {}  <{}>", c.id, c.first_name, c.last_name, c.email)
                });
            }
            ContactCommand::Rm { contact_id } => {
                if store.soft_delete_contact(&contact_id)? {
                    println!("Soft-deleted contact {}", contact_id);
                } else {
                    bail!("Contact {} not found or already deleted", contact_id);
                }
            }
        },

        Command::Odt { command } => match command {
            OdtCommand::Add {
                account_id,
                contact_id,
                total_cents,
                description,
                status,
            } => {
                let work_order = store.create_work_order(NewWorkOrder {
                    account_id,
                    contact_id,
                    description,
                    total_cents,
                    status,
                })?;
                print_record(
                    &work_order,
                    json,
                    format!("Created ODT #{} ({})", work_order.number, work_order.id),
                );
            }
            OdtCommand::List { account_id, all } => {
                let work_orders = store.list_account_work_orders(&account_id, all)?;
                print_records(&work_orders, json, |w| {
                    format!(
                        "#{:06}  {}  {:>10.2}  {}{}",
                        w.number,
                        w.id,
                        w.total_cents as f64 / 100.0,
                        w.status.as_str(),
                        if w.deleted { "  (deleted)" } else { "" }
                    )
                });
            }
            OdtCommand::Rm { work_order_id } => {
                if store.soft_delete_work_order(&work_order_id)? {
                    println!("Soft-deleted work order {}", work_order_id);
                } else {
                    bail!("Work order {} not found or already deleted", work_order_id);
                }
            }
        },

        Command::Attach { command } => match command {
            AttachCommand::Add { to, category, file } => {
                let (parent_kind, parent_id) = to;
                let data = std::fs::read(&file)
                    .with_context(|| format!("Failed to read file {:?}", file))?;
                let file_name = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("File {:?} has no usable name", file))?;

                let attachment =
                    store.add_attachment(parent_kind, &parent_id, category, file_name)?;
                vault.init()?;
                match vault.store(attachment.id, &attachment.file_name, &data) {
                    Ok(path) => {
                        print_record(
                            &attachment,
                            json,
                            format!("Stored attachment {} at {:?}", attachment.id, path),
                        );
                    }
                    Err(e) => {
                        // Keep the database consistent with the vault.
                        store.remove_attachment(attachment.id)?;
                        return Err(e.into());
                    }
                }
            }
            AttachCommand::List { to, category } => {
                let (parent_kind, parent_id) = to;
                let attachments = match category {
                    Some(category) => store.list_attachments_by_category(
                        parent_kind,
                        &parent_id,
                        category,
                    )?,
                    None => store.list_attachments(parent_kind, &parent_id)?,
                };
                print_records(&attachments, json, |a| {
                    format!("{}  {}  {}", a.id, a.category.as_str(), a.file_name)
                });
            }
            AttachCommand::Rm { attachment_id } => {
                if store.remove_attachment(attachment_id)? {
                    vault.remove(attachment_id)?;
                    println!("Removed attachment {}", attachment_id);
                } else {
                    bail!("Attachment {} not found", attachment_id);
                }
            }
        },
    }

    Ok(())
}
