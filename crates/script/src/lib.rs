//! Output-script classification.

pub mod standard;

pub use standard::{address_from_script, classify_script_pubkey, ScriptType};
