pub mod cipher;
pub mod content;

pub use cipher::EnvelopeCipher;
pub use content::{ContentClient, ContentStoreConfig};
