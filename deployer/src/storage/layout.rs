//! Script directory layout

use std::path::PathBuf;

use crate::filesys::file::File;

/// Template the mount script is rendered from
pub const MOUNT_TEMPLATE: &str = "cifsMountTemplate.sh";

/// Rendered mount script, run on every cluster node
pub const MOUNT_SCRIPT: &str = "cifsMount.sh";

/// Companion script that runs the mount script on every node
pub const MOUNT_SHARES_SCRIPT: &str = "mountShares.sh";

/// Layout of the local scripts directory
#[derive(Debug, Clone)]
pub struct ScriptLayout {
    /// Directory holding the template and companion script
    pub base_dir: PathBuf,
}

impl ScriptLayout {
    /// Create a new script layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the mount template file
    pub fn template_file(&self) -> File {
        File::new(self.base_dir.join(MOUNT_TEMPLATE))
    }

    /// Get the rendered mount script file
    pub fn mount_script_file(&self) -> File {
        File::new(self.base_dir.join(MOUNT_SCRIPT))
    }

    /// Get the companion mount-shares script file
    pub fn mount_shares_file(&self) -> File {
        File::new(self.base_dir.join(MOUNT_SHARES_SCRIPT))
    }
}

impl Default for ScriptLayout {
    fn default() -> Self {
        Self::new("scripts")
    }
}
