/// State of a long-lived session, checked before every sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    Healthy,
    /// Opened once but no longer usable; needs a fresh connect.
    Stale,
    /// Never opened, or closed on purpose.
    Absent,
}

impl ConnectionHealth {
    pub fn needs_connect(self) -> bool {
        !matches!(self, ConnectionHealth::Healthy)
    }
}

impl std::fmt::Display for ConnectionHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionHealth::Healthy => "healthy",
            ConnectionHealth::Stale => "stale",
            ConnectionHealth::Absent => "absent",
        };
        f.write_str(s)
    }
}
