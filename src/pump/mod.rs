//! Directional data pumps
//!
//! Each connection runs its pump inline once authenticated: producers
//! pump length-prefixed video frames toward the bridge, consumers pump
//! control lines back. Writer halves live in separate tasks fed by the
//! bridge channels, so a pump only ever touches its own read half.

pub mod control;
pub mod video;
