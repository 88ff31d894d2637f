pub mod random;
pub mod url;
