pub mod brush;
pub mod history;
pub mod tools;
