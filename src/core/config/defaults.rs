pub const DEFAULT_TEMPLATE: &str = "vicuna-v1.1";
pub const DEFAULT_EDIT_INTERVAL_MS: u64 = 500;
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5000/v1";
pub const DEFAULT_LOG_FILTER: &str = "chatrelay=info";
