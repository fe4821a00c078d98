pub mod error;
pub mod scheduler;
pub mod similarity;
pub mod storage;
pub mod utils;
