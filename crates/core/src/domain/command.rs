// Command Domain Model
// Tokenizer + argument vector handed to the launcher

use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};

/// Split a command line into its argument vector.
///
/// Parts are delimited by unquoted spaces. A single or double quote opens a
/// span that runs to the next occurrence of the *same* quote; inside it,
/// spaces and the other quote character are literal. Quote characters are
/// dropped, so quoted and unquoted fragments concatenate into one token:
///
/// ```
/// use procrun_core::domain::split_command;
///
/// assert_eq!(split_command(r#"ls "/usr/"local/'apache-tomcat/'"#), vec!["ls", "/usr/local/apache-tomcat/"]);
/// assert_eq!(split_command(r#"a'b"c'd"#), vec![r#"ab"cd"#]);
/// ```
///
/// An unterminated quote closes at end of input. Empty input yields no tokens.
pub fn split_command(command: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut part = String::new();
    let mut has_part = false;
    let mut quote: Option<char> = None;

    for c in command.chars() {
        match c {
            ' ' if quote.is_none() => {
                if has_part {
                    parts.push(std::mem::take(&mut part));
                    has_part = false;
                }
            }
            '\'' | '"' => match quote {
                Some(open) if open == c => quote = None,
                Some(_) => {
                    part.push(c);
                    has_part = true;
                }
                None => quote = Some(c),
            },
            _ => {
                part.push(c);
                has_part = true;
            }
        }
    }

    if has_part {
        parts.push(part);
    }
    parts
}

/// Program name plus arguments (argv). Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec(Vec<String>);

impl CommandSpec {
    /// Build from an explicit argument vector
    ///
    /// # Errors
    /// - DomainError::EmptyCommand if `argv` is empty
    pub fn new<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        if argv.is_empty() {
            return Err(DomainError::EmptyCommand);
        }
        Ok(Self(argv))
    }

    /// Tokenize a shell-like command line (see [`split_command`])
    pub fn from_command_line(command: &str) -> Result<Self> {
        Self::new(split_command(command))
    }

    pub fn program(&self) -> &str {
        &self.0[0]
    }

    pub fn args(&self) -> &[String] {
        &self.0[1..]
    }

    pub fn argv(&self) -> &[String] {
        &self.0
    }

    /// Prepend a wrapper program (e.g. `sudo`)
    pub fn wrapped_with(mut self, program: impl Into<String>) -> Self {
        self.0.insert(0, program.into());
        self
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}
