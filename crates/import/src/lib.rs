pub mod archive;
pub mod coordinator;
pub mod csv;

pub use archive::{archive_file, archive_path, move_to_archive, prepare_archive};
pub use coordinator::{Coordinator, IngestError, IngestReport};
pub use csv::{read_raw, read_table, ParseError};
