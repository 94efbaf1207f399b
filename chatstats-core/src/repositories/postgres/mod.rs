// chatstats-core/src/repositories/postgres/mod.rs

pub mod bots;
pub mod chat_members;
pub mod chats;
pub mod users;

pub use bots::PostgresBotRepository;
pub use chat_members::PostgresChatMemberRepository;
pub use chats::PostgresChatRepository;
pub use users::PostgresUserRepository;
