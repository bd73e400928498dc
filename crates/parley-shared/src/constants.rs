/// User search is skipped below this many characters
pub const SEARCH_MIN_QUERY_CHARS: usize = 2;

/// Maximum number of users returned by a search
pub const SEARCH_RESULT_LIMIT: usize = 5;

/// Backing-store collection names
pub const TABLE_USERS: &str = "users";
pub const TABLE_CHATS: &str = "chats";
pub const TABLE_MESSAGES: &str = "messages";

/// Default SQLite file name for local runs
pub const DEFAULT_DATABASE_FILE: &str = "parley.db";
