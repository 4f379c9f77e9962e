pub mod error;
pub mod flow;
pub mod pending;
pub mod queue;
pub mod scenario;
pub mod structure;
pub mod trace;

#[cfg(test)]
mod test;
