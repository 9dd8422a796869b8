pub mod flows;
pub mod memory;
pub mod security;

#[cfg(feature = "postgres")]
pub mod db;
