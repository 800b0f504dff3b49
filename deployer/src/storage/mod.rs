//! Local settings and script layout

pub mod layout;
pub mod settings;
