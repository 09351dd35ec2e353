/// Assigned by the server when a socket connects. Never reused within a
/// process lifetime.
pub type ConnectionId = u64;

/// Opaque project identifier minted by the project CRUD layer. The
/// collaboration core never parses it.
pub type ProjectId = String;

/// Opaque user identifier minted by the auth layer.
pub type UserId = String;
