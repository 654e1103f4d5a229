//! Device identity

/// Identity of the running device
pub trait DeviceIdentity: Send + Sync {
    /// Project identifier that prefixes firmware filenames
    fn project_id(&self) -> &str;

    /// Version string of the running firmware, e.g. `v1.0.0-1`
    fn firmware_version(&self) -> &str;
}

/// Fixed identity, typically read once from the application descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity {
    project_id: String,
    firmware_version: String,
}

impl StaticIdentity {
    /// Create an identity
    pub fn new(project_id: impl Into<String>, firmware_version: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            firmware_version: firmware_version.into(),
        }
    }
}

impl DeviceIdentity for StaticIdentity {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn firmware_version(&self) -> &str {
        &self.firmware_version
    }
}
