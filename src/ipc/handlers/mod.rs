pub mod core;
pub mod report_cards;
pub mod setup;
