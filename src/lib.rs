//! Remote-control bridge for Sky Q set-top boxes: command delivery over the
//! box's remote-control port, status over its REST port, and the entity
//! handlers a home-automation host drives them through.

pub mod config;
pub mod device_control;
pub mod entity;
pub mod error;
pub mod session;

#[cfg(test)]
mod test_utils;
