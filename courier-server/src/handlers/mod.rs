pub mod messages;
pub mod users;
pub mod ws;
