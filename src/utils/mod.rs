pub mod browser;
pub mod output;
pub mod parse;
pub mod portal;
