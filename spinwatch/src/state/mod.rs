pub mod history;
pub mod window;
