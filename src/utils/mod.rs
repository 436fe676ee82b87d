pub mod path;
pub mod validation;
