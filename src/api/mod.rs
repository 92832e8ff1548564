// History / list API collaborator

pub mod history;

pub use history::{is_retryable, CattleRecord, DataPoint, HistoryClient, HttpHistoryClient};
