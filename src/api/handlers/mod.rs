pub mod admin;
pub mod screener;
