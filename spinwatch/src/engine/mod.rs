pub mod analyzer;
pub mod dispatcher;
pub mod fusion;
