//! Client-side utilities for interactive use and benchmarking.

mod repl;
pub use repl::ClientRepl;

mod bench;
pub use bench::ClientBench;

/// Enum of supported client utility modes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ClientMode {
    Repl,
    Bench,
}

impl ClientMode {
    /// Parse command line string into ClientMode enum.
    pub fn parse_name(name: &str) -> Option<Self> {
        match &name.to_lowercase()[..] {
            "repl" => Some(Self::Repl),
            "bench" => Some(Self::Bench),
            _ => None,
        }
    }
}
