//! Infrastructure layer - database and events

pub mod db;
pub mod event;
