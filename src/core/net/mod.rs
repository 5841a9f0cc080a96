pub mod connection;
pub mod fd;
pub mod socket;
