pub mod chat;
pub mod functions;
pub mod init;
