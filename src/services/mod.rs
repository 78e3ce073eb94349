pub mod file;

pub use file::{FileService, FileServiceOptions};
