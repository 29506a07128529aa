//! Operator prompts.
//!
//! Standard output belongs to EncFS (it reads the password from there), so everything
//! addressed to the operator goes to standard error, and answers are read line by line
//! from standard input.

use std::io::{self, BufRead, BufReader, Write};

use crate::{Error, Result};

/// Line-oriented prompt/answer channel.
pub struct Console<R, W> {
    input: R,
    output: W,
}

impl Console<BufReader<io::Stdin>, io::Stderr> {
    /// Standard input for answers, standard error for prompts.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stderr())
    }
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Writes `text` as is, without waiting for an answer.
    pub fn message(&mut self, text: &str) -> Result<()> {
        self.output.write_all(text.as_bytes())?;
        self.output.flush()?;
        Ok(())
    }

    /// Writes `question` and returns the answer line, without its line terminator.
    ///
    /// `what` names the expected answer in the error raised if input is closed.
    pub fn prompt(&mut self, question: &str, what: &'static str) -> Result<String> {
        self.message(question)?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(Error::UnexpectedEof(what).into());
        }
        let answer_len = line.trim_end_matches(&['\n', '\r'][..]).len();
        line.truncate(answer_len);
        Ok(line)
    }

    /// Gives back the output half, e.g. to inspect what was written.
    pub fn into_output(self) -> W {
        self.output
    }
}
