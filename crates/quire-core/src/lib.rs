//! quire-core - Core library for Quire
//!
//! Local note storage, the OAuth session that authorizes sync, and the
//! engine that pushes local changes to a remote folder and pulls remote
//! edits back. Shared by every Quire front end.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod storage;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Note, NoteId};
