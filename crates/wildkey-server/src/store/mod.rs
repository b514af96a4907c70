pub mod audit;
pub mod db;
pub mod model;
pub mod settings;

pub use db::{generate_credential, Store};
pub use model::{CredentialRecord, KeyMeta, WILDCARD_IP};
