pub mod config;
pub mod logging;

pub mod admission;
pub mod control;
pub mod descriptor;
pub mod endpoint;
pub mod executor;
pub mod manager;
pub mod retry;

#[cfg(test)]
mod testing;
