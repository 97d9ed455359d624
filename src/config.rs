pub const APP_ID: &str = "com.tally.Tally";
pub const APP_NAME: &str = "tally";

/// Environment variable overriding the database location.
pub const DB_PATH_ENV: &str = "TALLY_DB";
/// Environment variable naming the caller identity for the CLI.
pub const USER_ENV: &str = "TALLY_USER";
/// Environment variable overriding the keyring-stored model API key.
pub const API_KEY_ENV: &str = "TALLY_API_KEY";
