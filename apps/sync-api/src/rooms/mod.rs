pub mod chat;
pub mod control;
pub mod presence;
pub mod registry;
pub mod state;
pub mod sync;
