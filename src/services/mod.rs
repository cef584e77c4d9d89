//! Service layer: encoding, file I/O and the saved-image collection

pub mod collection;
pub mod format;
pub mod io;

pub use collection::{CollectionEntry, ImageCollection};
pub use format::OutputFormatHandler;
pub use io::{ImageIOService, OutputPathAllocator};
