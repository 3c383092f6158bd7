//! Header names, paths and timing defaults shared by the pipeline and relay.

use std::time::Duration;

/// Identity header mirrored from `Credential::subject_id` on outbound calls
pub const SUBJECT_HEADER: &str = "x-user-id";

/// Side-channel header carrying the refresh token (opt-in only)
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

/// Response header carrying a server-rotated access token
pub const ROTATED_ACCESS_HEADER: &str = "x-access-token";

/// Response header carrying a server-rotated refresh token
pub const ROTATED_REFRESH_HEADER: &str = "x-refresh-token";

/// Path of the refresh endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "/refresh-token";

/// Upper bound on a single refresh call before it counts as a transport failure
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Requests slower than this are logged at warn level
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(5);
