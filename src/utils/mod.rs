pub mod json;
pub mod time;
