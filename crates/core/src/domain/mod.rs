pub mod approval;
pub mod company;
pub mod history;
pub mod rule;
pub mod settings;
