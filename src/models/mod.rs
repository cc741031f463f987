pub mod plc_data;

pub use plc_data::{Credentials, ExtractedRecord, PlcDataType, ProjectHandle};
