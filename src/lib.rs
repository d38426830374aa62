pub mod blob;
pub mod record;
pub mod transaction;
