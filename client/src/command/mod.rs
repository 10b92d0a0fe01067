//! One module per subcommand (§6's command list), dispatched from
//! `cli::run`.

pub mod build;
pub mod build_derivations;
pub mod daemon;
pub mod fetch;
pub mod send;
pub mod sync;
