pub mod binding;
pub mod collection;
pub mod context;
pub mod download;
pub mod fingerprint;
pub mod local_mod;
pub mod metadata;
pub mod mod_file;
pub mod registry;
pub mod task_sheet;
pub mod transfer;
