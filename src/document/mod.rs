pub mod extract;
pub mod store;

pub use extract::{FileTextExtractor, TextExtractor};
pub use store::{sanitize_file_name, DocumentStore, StoredDocument};
