pub mod contexts;
pub mod database;
pub mod error;
pub mod responses;
pub mod rows;
pub mod schema;
pub mod templates;

pub use contexts::{ContextRepo, StoredContext};
pub use database::Database;
pub use error::StoreError;
pub use responses::ResponseRepo;
pub use templates::TemplateRepo;
