/// Tunables for the inventory engine.
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    /// Upper bound accepted for a piece length.
    pub max_length: f64,
    /// Upper bound accepted for a standard width.
    pub max_width: f64,
    /// Width substituted by repair for a non-positive platform width.
    pub default_width: f64,
    /// Length substituted by repair for a non-positive piece length.
    pub fallback_length: f64,
    /// Snapshots kept per entity id.
    pub snapshot_retention: usize,
    /// Page size used when pulling the remote list at startup.
    pub pull_page_size: usize,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            max_length: 10.0,
            max_width: 5.0,
            default_width: 0.30,
            fallback_length: 1.0,
            snapshot_retention: 5,
            pull_page_size: 50,
        }
    }
}
