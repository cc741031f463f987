pub mod microsoft;

pub use microsoft::{LoginVerdict, MicrosoftAuth};
