mod file_vault;

pub use file_vault::{FileVault, FileVaultError};
