//! Deployment module

pub mod cluster;
pub mod docker;
pub mod fsm;
pub mod orchestrator;
pub mod report;
pub mod session;
pub mod template;
pub mod transfer;
