pub mod health;

pub use health::SqliteHealthRepository;
