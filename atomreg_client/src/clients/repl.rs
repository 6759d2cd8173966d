//! Interactive REPL-style command-line interface client.

use std::io::{self, Write};
use std::str::SplitWhitespace;

use color_print::{cprint, cprintln};

use tokio::time::Instant;

use atomreg::{AtomRegError, ClientEndpoint, Key, OpOutcome, Value};

/// Prompt string at the start of line.
const PROMPT: &str = ">>>>> ";

/// Recognizable command types.
enum ReplCommand {
    /// Read a register.
    Get(Key),

    /// Write a register.
    Put(Key, Value),

    /// Print help message.
    PrintHelp,

    /// Client exit.
    Exit,

    /// Nothing read.
    Nothing,
}

/// Interactive REPL-style client struct.
pub struct ClientRepl {
    /// Register client endpoint.
    endpoint: ClientEndpoint,

    /// User input buffer.
    input_buf: String,
}

impl ClientRepl {
    /// Creates a new REPL-style client.
    pub fn new(endpoint: ClientEndpoint) -> Self {
        ClientRepl {
            endpoint,
            input_buf: String::new(),
        }
    }

    /// Prints the prompt string.
    #[inline]
    fn print_prompt() -> Result<(), AtomRegError> {
        cprint!("<bright-yellow>{}</>", PROMPT);
        io::stdout().flush()?;
        Ok(())
    }

    /// Prints (optionally) an error message and the help message.
    fn print_help(err: Option<&AtomRegError>) -> Result<(), AtomRegError> {
        if let Some(e) = err {
            cprintln!("<bright-red>✗</> {}", e);
        }
        println!("HELP: Supported commands are:");
        println!("          get <key>");
        println!("          put <key> <value>");
        println!("          help");
        println!("          exit");
        println!("      Keys and values are unsigned 64-bit integers");
        io::stdout().flush()?;
        Ok(())
    }

    /// Expect to get the next segment parsed as an integer.
    #[inline]
    fn expect_next_u64(
        segs: &mut SplitWhitespace,
    ) -> Result<u64, AtomRegError> {
        match segs.next() {
            Some(seg) => Ok(seg.parse::<u64>()?),
            None => Err(AtomRegError::msg("not enough args")),
        }
    }

    /// Parses a non-empty input line into a command.
    fn parse_command(line: &str) -> Result<ReplCommand, AtomRegError> {
        // split input line by whitespaces, getting an iterator of segments
        let mut segs = line.split_whitespace();
        let Some(cmd_type) = segs.next() else {
            return Ok(ReplCommand::Nothing);
        };

        // get command type, match case-insensitively
        match &cmd_type.to_lowercase()[..] {
            "get" => {
                let key = Self::expect_next_u64(&mut segs)?;
                Ok(ReplCommand::Get(key))
            }

            "put" => {
                let key = Self::expect_next_u64(&mut segs)?;
                let value = Self::expect_next_u64(&mut segs)?;
                Ok(ReplCommand::Put(key, value))
            }

            "help" => Ok(ReplCommand::PrintHelp),

            "exit" => Ok(ReplCommand::Exit),

            _ => Err(AtomRegError::msg(format!(
                "unrecognized command: {}",
                cmd_type
            ))),
        }
    }

    /// Reads in user input and parses into a command.
    fn read_command(&mut self) -> Result<ReplCommand, AtomRegError> {
        self.input_buf.clear();
        let nread = io::stdin().read_line(&mut self.input_buf)?;
        if nread == 0 {
            return Ok(ReplCommand::Exit);
        }

        match Self::parse_command(self.input_buf.trim()) {
            Ok(cmd) => Ok(cmd),
            Err(err) => {
                Self::print_help(Some(&err))?;
                Ok(ReplCommand::Nothing)
            }
        }
    }

    /// Prints operation outcome.
    fn print_result(outcome: OpOutcome, elapsed_ms: f64) {
        match outcome {
            OpOutcome::Read {
                rid,
                value,
                timestamp,
            } => {
                cprintln!(
                    "<bright-green>✓</> ({}) {} @ {} <<took {:.2} ms>>",
                    rid,
                    value,
                    timestamp,
                    elapsed_ms
                );
            }

            OpOutcome::Write { rid, timestamp } => {
                cprintln!(
                    "<bright-green>✓</> ({}) written @ {} <<took {:.2} ms>>",
                    rid,
                    timestamp,
                    elapsed_ms
                );
            }

            OpOutcome::Failed(failed) => {
                cprintln!("<bright-red>✗</> {}", failed);
            }
        }
    }

    /// One iteration of the REPL loop.
    async fn iter(&mut self) -> Result<bool, AtomRegError> {
        Self::print_prompt()?;

        let start = Instant::now();
        let outcome = match self.read_command()? {
            ReplCommand::Exit => {
                println!("Exiting...");
                return Ok(false);
            }

            ReplCommand::Nothing => return Ok(true),

            ReplCommand::PrintHelp => {
                Self::print_help(None)?;
                return Ok(true);
            }

            ReplCommand::Get(key) => self.endpoint.invoke_read(key).await?,

            ReplCommand::Put(key, value) => {
                self.endpoint.invoke_write(key, value).await?
            }
        };

        Self::print_result(outcome, start.elapsed().as_secs_f64() * 1000.0);
        io::stdout().flush()?;
        Ok(true)
    }

    /// Runs the REPL loop until exit.
    pub async fn run(&mut self) -> Result<(), AtomRegError> {
        println!(
            "Client {} on run {}; type 'help' for commands",
            self.endpoint.id(),
            self.endpoint.run_id()
        );
        while self.iter().await? {}
        Ok(())
    }
}

#[cfg(test)]
mod repl_tests {
    use super::*;

    #[test]
    fn parse_commands() -> Result<(), AtomRegError> {
        assert!(matches!(
            ClientRepl::parse_command("get 7")?,
            ReplCommand::Get(7)
        ));
        assert!(matches!(
            ClientRepl::parse_command("PUT 7 42")?,
            ReplCommand::Put(7, 42)
        ));
        assert!(matches!(
            ClientRepl::parse_command("exit")?,
            ReplCommand::Exit
        ));
        assert!(matches!(
            ClientRepl::parse_command("")?,
            ReplCommand::Nothing
        ));
        Ok(())
    }

    #[test]
    fn parse_bad_commands() {
        assert!(ClientRepl::parse_command("put 7").is_err());
        assert!(ClientRepl::parse_command("get abc").is_err());
        assert!(ClientRepl::parse_command("delete 7").is_err());
    }
}
