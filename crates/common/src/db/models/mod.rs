//! SeaORM entity models

pub mod chat_turn;
