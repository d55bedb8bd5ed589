pub mod fetch;
pub mod list;
pub mod setup;
pub mod ui;
