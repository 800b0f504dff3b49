//! acsdeploy library
//!
//! Mounts a shared file store on every node of a remote cluster over SSH and
//! launches a container workload on it, optionally staging the image through
//! a private registry first.

pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod storage;
pub mod utils;

/// Macro for creating trace information
#[macro_export]
macro_rules! trace {
    () => {
        format!("{}:{}", file!(), line!())
    };
}
