pub mod directory;
pub mod table_service;
