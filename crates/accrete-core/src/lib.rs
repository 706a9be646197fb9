pub mod assembler;
pub mod fsops;
pub mod handlers;
pub mod models;
pub mod persistence;
pub mod queue;
pub mod sqlite;
