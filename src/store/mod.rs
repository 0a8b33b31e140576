//! Message log storage
//!
//! - [`LogStore`] - Creates numbered log files, appends entries, loads logs
//! - [`LogCodec`] - The quoted, delimited row format used by the files

pub mod codec;
pub mod log_store;

pub use codec::{LogCodec, RawRecord, COLUMNS, FIELD_DELIMITER, LINE_TERMINATOR, QUOTE_CHAR};
pub use log_store::{log_file_name, next_log_number, parse_log_number, LogStore};
