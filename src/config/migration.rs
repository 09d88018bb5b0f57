//! Config schema migration support

use anyhow::Result;

/// Versioned on-disk structures that upgrade themselves in place
pub trait Migrate {
    fn current_version(&self) -> u32;

    fn target_version() -> u32;

    /// Step the structure forward to `target_version`
    fn migrate(&mut self) -> Result<()>;
}
