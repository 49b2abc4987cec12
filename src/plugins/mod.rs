//! Bundled plugins, built purely against the public session and hook APIs.

pub mod opercmds;
