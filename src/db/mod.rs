pub mod db;
pub mod escrowdb;
pub mod jobdb;
pub mod userdb;
